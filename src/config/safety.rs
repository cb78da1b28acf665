// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-enclosure project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Safety controller configuration

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings of the safety and interlock monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    /// O2 percentage below which a room is in alarm.
    pub o2_threshold: f64,

    /// Factor converting the raw O2 register value to a percentage.
    pub o2_scale: f64,

    /// Room name to O2 register name.
    pub o2_sensors: BTreeMap<String, String>,

    /// Treat the enclosure as remote even if the PLC reports local mode.
    pub override_local_mode: bool,

    /// Duration of the e-stop relay reset pulse, in seconds.
    pub reset_pulse: f64,

    /// Status polling interval, in seconds.
    pub poll_interval: f64,
}

impl SafetyConfig {
    pub fn reset_pulse(&self) -> Duration {
        Duration::from_secs_f64(self.reset_pulse)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval)
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        let o2_sensors = [
            ("utilities_room", "o2_percent_utilities"),
            ("spectrograph_room", "o2_percent_spectrograph"),
        ]
        .into_iter()
        .map(|(room, register)| (room.to_string(), register.to_string()))
        .collect();

        Self {
            o2_threshold: 19.5,
            o2_scale: 0.1,
            o2_sensors,
            override_local_mode: false,
            reset_pulse: 1.0,
            poll_interval: 2.0,
        }
    }
}
