// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-enclosure project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Engineering mode and heartbeat configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings of the engineering mode override.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineeringModeConfig {
    /// Duration of engineering mode when enabled without an explicit timeout, in seconds.
    pub default_duration: f64,
}

impl EngineeringModeConfig {
    pub fn default_duration(&self) -> Duration {
        Duration::from_secs_f64(self.default_duration)
    }
}

impl Default for EngineeringModeConfig {
    fn default() -> Self {
        Self {
            default_duration: 3600.0,
        }
    }
}

/// Settings of the periodic heartbeat sent to the PLC.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,

    /// Interval between heartbeats, in seconds.
    pub interval: f64,
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval)
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: 5.0,
        }
    }
}
