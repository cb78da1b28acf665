// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-enclosure project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Roll-off dome controller
//!
//! The dome is driven by two coils: `motor_direction` selects the direction
//! (set for opening) and `drive_enabled` starts the drive. The PLC disables the
//! drive by itself once the `dome_open` or `dome_closed` limit switch is reached.
//!
//! ## Move policy
//!
//! Every [`DomeController::open`] and [`DomeController::close`] goes through
//! the same sequence:
//!
//! 1. open attempts are recorded in the anti-flap ledger and checked against
//!    the daytime lockout, unless engineering mode is active
//! 2. dome and safety status are refreshed from the PLC, bypassing the cache
//! 3. the move is refused if the enclosure is in local mode, an e-stop is
//!    active, a status is unknown or the drive reports an error
//! 4. a move already running in the same direction is awaited, one running
//!    in the opposite direction is stopped first
//! 5. the drive is enabled and monitored until the limit switch confirms
//!    arrival
//!
//! Each drive enable or stop starts a new move generation. Only the call that
//! enabled the drive in the current generation may disable it on timeout; a
//! call waiting on a superseded generation, or on a drive running the other
//! way, gives up with [`DomeError::StoppedBeforeLimit`].

pub mod anti_flap;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};
use serde_json::Value;
use tokio::time::{sleep, Instant};

use crate::config::DomeConfig;
use crate::error::DomeError;
use crate::modbus::{Modbus, RegisterValue};
use crate::module::{ExtraFields, ModuleCore, ModuleOutput, PlcModule};
use crate::safety::SafetyController;
use crate::status::{DomeStatus, SafetyStatus, StatusFlags};
use crate::utility::is_daytime;

pub use anti_flap::AntiFlapLedger;

/// Register group of the dome.
const DOME_GROUP: &str = "dome";

/// Register to status bit for the plain boolean dome registers.
const DOME_BITS: [(&str, DomeStatus); 7] = [
    ("dome_open", DomeStatus::OPEN),
    ("dome_closed", DomeStatus::CLOSED),
    ("drive_state", DomeStatus::DRIVE_AVAILABLE),
    ("drive_brake", DomeStatus::BRAKE_ENABLED),
    ("drive_error", DomeStatus::DRIVE_ERROR),
    ("overcurrent", DomeStatus::OVERCURRENT),
    ("overcurrent_mode", DomeStatus::OVERCURRENT_MODE),
];

/// Drive mode used for a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriveMode {
    #[default]
    Normal,
    /// Allows the drive to push through an overcurrent condition. Close only.
    Overcurrent,
}

/// Direction of a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Open,
    Close,
}

impl Direction {
    fn target(self) -> &'static str {
        match self {
            Direction::Open => "open",
            Direction::Close => "closed",
        }
    }

    fn limit_register(self) -> &'static str {
        match self {
            Direction::Open => "dome_open",
            Direction::Close => "dome_closed",
        }
    }

    fn limit_bit(self) -> DomeStatus {
        match self {
            Direction::Open => DomeStatus::OPEN,
            Direction::Close => DomeStatus::CLOSED,
        }
    }

    fn motor_bit(self) -> DomeStatus {
        match self {
            Direction::Open => DomeStatus::MOTOR_OPENING,
            Direction::Close => DomeStatus::MOTOR_CLOSING,
        }
    }
}

fn flag(values: &HashMap<String, RegisterValue>, name: &str) -> bool {
    values.get(name).is_some_and(RegisterValue::as_bool)
}

/// Controller for the roll-off dome.
pub struct DomeController {
    core: ModuleCore<DomeStatus>,
    modbus: Arc<Modbus>,
    safety: Arc<SafetyController>,
    config: DomeConfig,
    ledger: Mutex<AntiFlapLedger>,
    generation: AtomicU64,
}

/// The role of a call waiting for the dome to arrive.
#[derive(Debug, Clone, Copy)]
enum Waiter {
    /// Enabled the drive in this generation.
    Owner(u64),
    /// Waits on a move started by another call.
    Observer(u64),
}

impl Waiter {
    fn generation(self) -> u64 {
        match self {
            Waiter::Owner(generation) | Waiter::Observer(generation) => generation,
        }
    }
}

impl DomeController {
    pub fn new(modbus: Arc<Modbus>, safety: Arc<SafetyController>, config: DomeConfig) -> Self {
        let ledger = AntiFlapLedger::new(config.anti_flap_attempts(), config.anti_flap_window());
        Self {
            core: ModuleCore::new("dome", config.poll_interval()),
            modbus,
            safety,
            config,
            ledger: Mutex::new(ledger),
            generation: AtomicU64::new(0),
        }
    }

    fn ledger(&self) -> MutexGuard<'_, AntiFlapLedger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a new move generation, superseding every pending wait.
    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Number of open attempts within the anti-flap window.
    pub fn anti_flap_attempts(&self) -> usize {
        self.ledger().attempts(Instant::now())
    }

    /// Whether the sun is currently up at the enclosure.
    pub fn is_daytime(&self) -> bool {
        is_daytime(
            self.config.latitude,
            self.config.longitude,
            Utc::now(),
            self.config.daytime_tolerance(),
        )
    }

    /// Check the open policy without recording an attempt.
    ///
    /// Fails with the reason the dome cannot be opened right now: the daytime
    /// lockout or the anti-flap ledger. Both are lifted in engineering mode.
    pub async fn allowed_to_open(&self) -> Result<(), DomeError> {
        if self.safety.engineering_mode_active(true).await? {
            return Ok(());
        }

        if !self.config.daytime_allowed && self.is_daytime() {
            return Err(DomeError::Daytime);
        }

        let mut ledger = self.ledger();
        let now = Instant::now();
        if !ledger.allows(now) {
            return Err(DomeError::AntiFlap {
                attempts: ledger.attempts(now),
                window: ledger.window(),
            });
        }
        Ok(())
    }

    /// Open the dome.
    ///
    /// With `force` the drive is enabled even if the dome already reports open.
    pub async fn open(&self, force: bool) -> Result<(), DomeError> {
        self.move_to(Direction::Open, force, DriveMode::Normal).await
    }

    /// Close the dome, optionally in overcurrent mode.
    pub async fn close(&self, force: bool, mode: DriveMode) -> Result<(), DomeError> {
        self.move_to(Direction::Close, force, mode).await
    }

    /// Move the dome to the end position of `direction`.
    ///
    /// Overcurrent mode is refused for opening.
    pub async fn move_to(&self, direction: Direction, force: bool, mode: DriveMode) -> Result<(), DomeError> {
        if direction == Direction::Open && mode == DriveMode::Overcurrent {
            return Err(DomeError::InvalidDriveMode);
        }

        if direction == Direction::Open {
            self.check_open_policy().await?;
        }

        let status = self.update(false, false).await;
        let safety = self.safety.update(false, false).await;

        if status.is_unknown() {
            return Err(refuse(DomeError::UnknownStatus));
        }
        if safety.is_unknown() {
            return Err(refuse(DomeError::SafetyUnknown));
        }
        if !self.safety.is_remote().await {
            return Err(refuse(DomeError::NotRemote));
        }
        if safety.contains(SafetyStatus::E_STOP) || status.contains(DomeStatus::E_STOP) {
            return Err(refuse(DomeError::EStop));
        }
        if status.contains(DomeStatus::DRIVE_ERROR) {
            return Err(refuse(DomeError::DriveError));
        }

        if status.contains(DomeStatus::DRIVE_ENABLED) {
            if status.contains(direction.motor_bit()) {
                info!(
                    "Dome is already moving to the {} position. Waiting for the move to complete.",
                    direction.target()
                );
                let observer = Waiter::Observer(self.current_generation());
                self.wait_for_arrival(direction, observer).await?;
                self.update(true, false).await;
                return Ok(());
            }

            info!("Dome is moving in the opposite direction. Stopping it first.");
            self.stop().await?;
        } else if status.contains(direction.limit_bit()) && !force {
            info!("Dome is already {}", direction.target());
            return Ok(());
        }

        let generation = self.next_generation();
        let result = self.drive(direction, mode, generation).await;

        // A superseded move leaves the drive mode to the move that replaced it
        if self.modbus.contains("overcurrent_mode") && self.current_generation() == generation {
            if let Err(err) = self.modbus.write("overcurrent_mode", false).await {
                warn!("Failed resetting the dome drive mode: {}", err);
            }
        }
        self.update(true, false).await;

        if result.is_ok() {
            info!("Dome is {}", direction.target());
        }
        result
    }

    /// Record an open attempt and apply the daytime lockout.
    async fn check_open_policy(&self) -> Result<(), DomeError> {
        if self.safety.engineering_mode_active(true).await? {
            debug!("Engineering mode active. Skipping the anti-flap and daytime checks.");
            return Ok(());
        }

        {
            let mut ledger = self.ledger();
            if let Err(attempts) = ledger.check_and_record(Instant::now()) {
                return Err(refuse(DomeError::AntiFlap {
                    attempts,
                    window: ledger.window(),
                }));
            }
        }

        if !self.config.daytime_allowed && self.is_daytime() {
            return Err(refuse(DomeError::Daytime));
        }
        Ok(())
    }

    async fn drive(&self, direction: Direction, mode: DriveMode, generation: u64) -> Result<(), DomeError> {
        if self.modbus.contains("overcurrent_mode") {
            self.modbus
                .write("overcurrent_mode", mode == DriveMode::Overcurrent)
                .await?;
        }

        info!("Moving dome to {} ({:?} mode)", direction.target(), mode);
        self.modbus
            .write("motor_direction", direction == Direction::Open)
            .await?;
        self.modbus.write("drive_enabled", true).await?;
        self.update(true, true).await;

        self.wait_for_arrival(direction, Waiter::Owner(generation)).await
    }

    /// Poll the drive until the destination limit confirms arrival.
    async fn wait_for_arrival(&self, direction: Direction, waiter: Waiter) -> Result<(), DomeError> {
        let deadline = Instant::now() + self.config.movement_timeout();
        let mut disabled_since: Option<Instant> = None;

        loop {
            sleep(self.config.check_interval()).await;

            let values = self.modbus.read_group(DOME_GROUP, false).await?;
            let enabled = flag(&values, "drive_enabled");
            let arrived = flag(&values, direction.limit_register());

            if arrived && !enabled {
                return Ok(());
            }

            if self.current_generation() != waiter.generation() {
                warn!(
                    "Dome move to the {} position was superseded",
                    direction.target()
                );
                return Err(DomeError::StoppedBeforeLimit(direction.target()));
            }

            let opening = values.get("motor_direction").map(RegisterValue::as_bool);
            if enabled && opening.is_some_and(|opening| opening != (direction == Direction::Open)) {
                warn!(
                    "Dome drive is running away from the {} position",
                    direction.target()
                );
                return Err(DomeError::StoppedBeforeLimit(direction.target()));
            }

            let now = Instant::now();
            if enabled {
                disabled_since = None;
            } else {
                let since = *disabled_since.get_or_insert(now);
                if now.saturating_duration_since(since) >= self.config.arrival_grace() {
                    warn!(
                        "Dome drive disabled before reaching the {} limit",
                        direction.target()
                    );
                    return Err(DomeError::StoppedBeforeLimit(direction.target()));
                }
            }

            if now >= deadline {
                match waiter {
                    Waiter::Owner(generation) if self.current_generation() == generation => {
                        warn!("Dome move timed out. Disabling the drive.");
                        self.modbus.write("drive_enabled", false).await?;
                    }
                    _ => warn!(
                        "Timed out waiting for the dome to reach the {} position",
                        direction.target()
                    ),
                }
                return Err(DomeError::MoveTimeout(direction.target()));
            }
        }
    }

    /// Stop the dome if it is moving.
    pub async fn stop(&self) -> Result<(), DomeError> {
        if !self.modbus.read("drive_enabled", false).await?.as_bool() {
            debug!("Dome drive is not enabled. Nothing to stop.");
            return Ok(());
        }

        info!("Stopping the dome");
        self.next_generation();
        self.modbus.write("drive_enabled", false).await?;
        sleep(self.config.stop_settle()).await;
        self.update(true, false).await;
        Ok(())
    }

    /// Pulse the drive error reset of the PLC.
    pub async fn reset(&self) -> Result<(), DomeError> {
        info!("Resetting dome drive errors");
        self.modbus.write("dome_error_reset", true).await?;
        sleep(self.config.reset_pulse()).await;
        self.modbus.write("dome_error_reset", false).await?;
        self.update(true, false).await;
        Ok(())
    }

    fn percent_open(&self, values: &HashMap<String, RegisterValue>) -> Option<f64> {
        if self.config.full_open_mm <= 0.0 {
            return None;
        }
        let position = values.get("dome_position")?.as_f64()?;
        let percent = (position / self.config.full_open_mm * 100.0).clamp(0.0, 100.0);
        Some((percent * 10.0).round() / 10.0)
    }
}

fn refuse(err: DomeError) -> DomeError {
    warn!("Dome move refused: {}", err);
    err
}

#[async_trait]
impl PlcModule for DomeController {
    type Flags = DomeStatus;

    fn core(&self) -> &ModuleCore<DomeStatus> {
        &self.core
    }

    async fn derive_status(&self, use_cache: bool) -> anyhow::Result<ModuleOutput<DomeStatus>> {
        // One bulk read covers the dome group and the e-stop flag of the safety group
        let values = self.modbus.read_all(use_cache).await?;

        let mut status = DomeStatus::empty();
        for (name, bit) in DOME_BITS {
            if flag(&values, name) {
                status |= bit;
            }
        }

        if flag(&values, "drive_enabled") {
            status |= DomeStatus::DRIVE_ENABLED | DomeStatus::MOVING;
            if flag(&values, "motor_direction") {
                status |= DomeStatus::MOTOR_OPENING;
            } else {
                status |= DomeStatus::MOTOR_CLOSING;
            }
        }

        if flag(&values, "e_status") {
            status |= DomeStatus::E_STOP;
        }

        if !status.intersects(DomeStatus::OPEN | DomeStatus::CLOSED | DomeStatus::MOVING) {
            status |= DomeStatus::POSITION_UNKNOWN;
        }

        let mut extra = ExtraFields::new();
        if let Some(percent) = self.percent_open(&values) {
            extra.insert("percent_open".to_string(), Value::from(percent));
        }

        Ok(ModuleOutput::with_extra(status, extra))
    }
}
