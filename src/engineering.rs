// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-enclosure project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Engineering mode
//!
//! While engineering mode is enabled the dome skips the anti-flap and daytime
//! checks. It always expires: a timer disables it after its duration. The start
//! time and duration are exposed so an external store can resume it after a
//! restart with [`EngineeringMode::resume`].

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

#[derive(Debug, Default)]
struct EngineeringState {
    enabled: bool,
    started_at: Option<DateTime<Utc>>,
    duration: Option<Duration>,
    deadline: Option<Instant>,
    timer: Option<JoinHandle<()>>,
    generation: u64,
}

impl EngineeringState {
    fn clear(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation += 1;
        self.enabled = false;
        self.started_at = None;
        self.duration = None;
        self.deadline = None;
    }
}

/// Process-level engineering mode flag with automatic expiry.
#[derive(Debug)]
pub struct EngineeringMode {
    default_duration: Duration,
    state: Arc<Mutex<EngineeringState>>,
}

fn lock(state: &Mutex<EngineeringState>) -> MutexGuard<'_, EngineeringState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl EngineeringMode {
    pub fn new(default_duration: Duration) -> Self {
        Self {
            default_duration,
            state: Arc::new(Mutex::new(EngineeringState::default())),
        }
    }

    /// Enable engineering mode for `timeout`, or the default duration.
    ///
    /// Enabling while already enabled restarts the timer.
    pub fn enable(&self, timeout: Option<Duration>) {
        let duration = timeout.unwrap_or(self.default_duration);
        self.arm(Utc::now(), duration, duration);
        info!("Engineering mode enabled for {:?}", duration);
    }

    /// Disable engineering mode and cancel its timer.
    pub fn disable(&self) {
        let mut state = lock(&self.state);
        if state.enabled {
            info!("Engineering mode disabled");
        }
        state.clear();
    }

    pub fn is_enabled(&self) -> bool {
        lock(&self.state).enabled
    }

    /// When engineering mode was enabled.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        lock(&self.state).started_at
    }

    /// Total duration engineering mode was enabled for.
    pub fn duration(&self) -> Option<Duration> {
        lock(&self.state).duration
    }

    /// Time left before engineering mode expires.
    pub fn remaining(&self) -> Option<Duration> {
        let state = lock(&self.state);
        state
            .deadline
            .filter(|_| state.enabled)
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Re-enable engineering mode started at `started_at` for `duration`.
    ///
    /// Only the remaining time is armed. Returns `false` if it already expired.
    pub fn resume(&self, started_at: DateTime<Utc>, duration: Duration) -> bool {
        let elapsed = (Utc::now() - started_at).to_std().unwrap_or(Duration::ZERO);
        let Some(remaining) = duration.checked_sub(elapsed).filter(|d| !d.is_zero()) else {
            warn!(
                "Engineering mode started at {} for {:?} has expired. Not resuming.",
                started_at, duration
            );
            return false;
        };

        self.arm(started_at, duration, remaining);
        info!("Engineering mode resumed with {:?} remaining", remaining);
        true
    }

    fn arm(&self, started_at: DateTime<Utc>, duration: Duration, remaining: Duration) {
        let mut state = lock(&self.state);
        if let Some(previous) = state.timer.take() {
            previous.abort();
        }
        state.generation += 1;

        let generation = state.generation;
        let weak = Arc::downgrade(&self.state);
        let timer = tokio::spawn(async move {
            sleep(remaining).await;
            if let Some(shared) = weak.upgrade() {
                let mut state = lock(&shared);
                if state.generation == generation {
                    // Release our own handle rather than aborting the running timer.
                    state.timer.take();
                    state.clear();
                    info!("Engineering mode expired");
                }
            }
        });

        state.enabled = true;
        state.started_at = Some(started_at);
        state.duration = Some(duration);
        state.deadline = Some(Instant::now() + remaining);
        state.timer = Some(timer);
    }

    /// Cancel the expiry timer without changing the flag.
    pub fn shutdown(&self) {
        if let Some(timer) = lock(&self.state).timer.take() {
            timer.abort();
        }
    }
}
