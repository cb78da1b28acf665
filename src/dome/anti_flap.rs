// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-enclosure project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Anti-flap ledger
//!
//! Keeps the timestamps of recent open attempts and refuses a new one once
//! `threshold` attempts happened within the sliding `window`.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct AntiFlapLedger {
    threshold: usize,
    window: Duration,
    attempts: VecDeque<Instant>,
}

impl AntiFlapLedger {
    pub fn new(threshold: usize, window: Duration) -> Self {
        Self {
            threshold,
            window,
            attempts: VecDeque::with_capacity(threshold),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Drop the attempts older than the window.
    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.attempts.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                self.attempts.pop_front();
            } else {
                break;
            }
        }
    }

    /// Number of attempts within the window ending at `now`.
    pub fn attempts(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.attempts.len()
    }

    /// Whether an attempt at `now` would be accepted.
    pub fn allows(&mut self, now: Instant) -> bool {
        self.attempts(now) < self.threshold
    }

    /// Record an attempt at `now`, or refuse it with the current attempt count.
    ///
    /// Refused attempts are not recorded, so the ledger frees up as soon as the
    /// oldest accepted attempt leaves the window.
    pub fn check_and_record(&mut self, now: Instant) -> Result<(), usize> {
        let attempts = self.attempts(now);
        if attempts >= self.threshold {
            return Err(attempts);
        }
        self.attempts.push_back(now);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.attempts.clear();
    }
}
