// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-enclosure project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Dome controller configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings of the roll-off dome controller.
///
/// All durations are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DomeConfig {
    /// Allow opening the dome while the sun is up.
    pub daytime_allowed: bool,

    /// Margin around sunrise and sunset during which opening is still allowed.
    pub daytime_tolerance: f64,

    /// `[attempts, window]`: at most `attempts` open attempts within `window` seconds.
    pub anti_flap_tolerance: (usize, f64),

    /// Travel of the dome between the closed and open limits, in millimetres.
    pub full_open_mm: f64,

    /// Site latitude in degrees, positive north.
    pub latitude: f64,

    /// Site longitude in degrees, positive east.
    pub longitude: f64,

    /// Upper bound for a complete open or close move.
    pub movement_timeout: f64,

    /// Interval between checks while the dome is moving.
    pub check_interval: f64,

    /// Time allowed for the limit switch to confirm once the drive disabled itself.
    pub arrival_grace: f64,

    /// Settle delay after stopping the drive.
    pub stop_settle: f64,

    /// Duration of the error reset pulse.
    pub reset_pulse: f64,

    /// Status polling interval.
    pub poll_interval: f64,
}

impl DomeConfig {
    pub fn daytime_tolerance(&self) -> Duration {
        Duration::from_secs_f64(self.daytime_tolerance)
    }

    pub fn anti_flap_window(&self) -> Duration {
        Duration::from_secs_f64(self.anti_flap_tolerance.1)
    }

    pub fn anti_flap_attempts(&self) -> usize {
        self.anti_flap_tolerance.0
    }

    pub fn movement_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.movement_timeout)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs_f64(self.check_interval)
    }

    pub fn arrival_grace(&self) -> Duration {
        Duration::from_secs_f64(self.arrival_grace)
    }

    pub fn stop_settle(&self) -> Duration {
        Duration::from_secs_f64(self.stop_settle)
    }

    pub fn reset_pulse(&self) -> Duration {
        Duration::from_secs_f64(self.reset_pulse)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval)
    }
}

impl Default for DomeConfig {
    fn default() -> Self {
        Self {
            daytime_allowed: false,
            daytime_tolerance: 600.0,
            anti_flap_tolerance: (3, 600.0),
            full_open_mm: 1000.0,
            // Las Campanas Observatory
            latitude: -29.0146,
            longitude: -70.6926,
            movement_timeout: 300.0,
            check_interval: 0.5,
            arrival_grace: 5.0,
            stop_settle: 2.0,
            reset_pulse: 1.0,
            poll_interval: 5.0,
        }
    }
}
