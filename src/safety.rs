// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-enclosure project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Safety controller
//!
//! Monitors the interlocks of the enclosure: doors, local mode, e-stops, rain
//! sensor, dome lockout and the O2 sensors of the utilities and spectrograph
//! rooms. It also tracks when the PLC last acknowledged a heartbeat.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde_json::Value;
use tokio::time::sleep;

use crate::config::SafetyConfig;
use crate::engineering::EngineeringMode;
use crate::error::ModbusError;
use crate::modbus::{Modbus, RegisterValue};
use crate::module::{ExtraFields, ModuleCore, ModuleOutput, PlcModule};
use crate::status::{SafetyStatus, StatusFlags};

/// Register to status bit for the plain boolean interlocks.
const INTERLOCKS: [(&str, SafetyStatus); 9] = [
    ("door_closed", SafetyStatus::DOOR_CLOSED),
    ("door_locked", SafetyStatus::DOOR_LOCKED),
    ("local", SafetyStatus::LOCAL),
    ("e_status", SafetyStatus::E_STOP),
    ("rain_sensor_alarm", SafetyStatus::RAIN_SENSOR_ALARM),
    ("dome_lockout", SafetyStatus::DOME_LOCKED),
    ("dome_error", SafetyStatus::DOME_ERROR),
    ("hardware_bypass", SafetyStatus::HARDWARE_BYPASS),
    ("software_bypass", SafetyStatus::SOFTWARE_BYPASS),
];

/// Reading of one O2 sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum O2Reading {
    /// Oxygen percentage at or above the threshold.
    Normal(f64),
    /// Oxygen percentage below the threshold.
    Alarm(f64),
    /// The sensor reports an impossible value.
    Fault(f64),
}

impl O2Reading {
    /// Classify a raw O2 register value.
    pub fn classify(raw: f64, scale: f64, threshold: f64) -> Self {
        let percent = raw * scale;
        if percent <= 0.0 || percent > 100.0 {
            O2Reading::Fault(percent)
        } else if percent < threshold {
            O2Reading::Alarm(percent)
        } else {
            O2Reading::Normal(percent)
        }
    }

    pub fn percent(&self) -> f64 {
        match self {
            O2Reading::Normal(p) | O2Reading::Alarm(p) | O2Reading::Fault(p) => *p,
        }
    }
}

/// Handles the enclosure safety features.
pub struct SafetyController {
    core: ModuleCore<SafetyStatus>,
    modbus: Arc<Modbus>,
    config: SafetyConfig,
    engineering: Arc<EngineeringMode>,
    last_heartbeat_ack: Mutex<Option<DateTime<Utc>>>,
}

impl SafetyController {
    pub fn new(modbus: Arc<Modbus>, config: SafetyConfig, engineering: Arc<EngineeringMode>) -> Self {
        Self {
            core: ModuleCore::new("safety", config.poll_interval()),
            modbus,
            config,
            engineering,
            last_heartbeat_ack: Mutex::new(None),
        }
    }

    /// Whether the enclosure can be operated remotely.
    ///
    /// True unless the PLC is in local mode, or if `override_local_mode` is set.
    /// An unknown safety status is never considered remote.
    pub async fn is_remote(&self) -> bool {
        if self.config.override_local_mode {
            return true;
        }

        let status = self.update(false, true).await;
        !status.is_unknown() && !status.contains(SafetyStatus::LOCAL)
    }

    /// Whether engineering mode is active.
    ///
    /// With `include_bypasses`, the hardware and software bypass registers of
    /// the PLC also count.
    pub async fn engineering_mode_active(&self, include_bypasses: bool) -> Result<bool, ModbusError> {
        if self.engineering.is_enabled() {
            return Ok(true);
        }
        if !include_bypasses {
            return Ok(false);
        }

        for name in ["hardware_bypass", "software_bypass"] {
            if self.modbus.contains(name) && self.modbus.read(name, true).await?.as_bool() {
                debug!("PLC reports {} active", name);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Trigger an emergency stop.
    pub async fn emergency_stop(&self) -> Result<(), ModbusError> {
        warn!("Triggering emergency stop");
        self.modbus.write("e_stop", true).await?;
        self.update(true, false).await;
        Ok(())
    }

    /// Pulse the e-stop relay reset.
    pub async fn reset_e_stops(&self) -> Result<(), ModbusError> {
        info!("Resetting e-stops");
        self.modbus.write("e_relay_reset", true).await?;
        sleep(self.config.reset_pulse()).await;
        self.modbus.write("e_relay_reset", false).await?;
        self.update(true, false).await;
        Ok(())
    }

    /// Set the heartbeat register of the PLC.
    pub async fn heartbeat(&self) -> Result<(), ModbusError> {
        debug!("Setting heartbeat");
        self.modbus.write("hb_set", true).await
    }

    /// When the PLC last acknowledged a heartbeat.
    pub fn last_heartbeat_ack(&self) -> Option<DateTime<Utc>> {
        *self
            .last_heartbeat_ack
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Current readings of the O2 sensors, by room.
    pub async fn o2_readings(&self, use_cache: bool) -> Result<HashMap<String, O2Reading>, ModbusError> {
        let values = self.modbus.read_group("safety", use_cache).await?;
        self.classify_o2(&values, use_cache).await
    }

    async fn classify_o2(
        &self,
        values: &HashMap<String, RegisterValue>,
        use_cache: bool,
    ) -> Result<HashMap<String, O2Reading>, ModbusError> {
        let mut readings = HashMap::new();
        for (room, register) in &self.config.o2_sensors {
            let value = match values.get(register) {
                Some(value) => value.clone(),
                None if self.modbus.contains(register) => {
                    self.modbus.read(register, use_cache).await?
                }
                None => continue,
            };
            let raw = value.as_f64().unwrap_or(0.0);
            readings.insert(
                room.clone(),
                O2Reading::classify(raw, self.config.o2_scale, self.config.o2_threshold),
            );
        }
        Ok(readings)
    }
}

#[async_trait]
impl PlcModule for SafetyController {
    type Flags = SafetyStatus;

    fn core(&self) -> &ModuleCore<SafetyStatus> {
        &self.core
    }

    async fn derive_status(&self, use_cache: bool) -> anyhow::Result<ModuleOutput<SafetyStatus>> {
        let values = self.modbus.read_group("safety", use_cache).await?;
        let flag = |name: &str| values.get(name).is_some_and(RegisterValue::as_bool);

        let mut status = SafetyStatus::empty();
        for (name, bit) in INTERLOCKS {
            if flag(name) {
                status |= bit;
            }
        }

        let mut extra = ExtraFields::new();
        for (room, reading) in self.classify_o2(&values, use_cache).await? {
            match reading {
                O2Reading::Alarm(_) => status |= SafetyStatus::o2_alarm(&room).unwrap_or(SafetyStatus::empty()),
                O2Reading::Fault(_) => status |= SafetyStatus::o2_fault(&room).unwrap_or(SafetyStatus::empty()),
                O2Reading::Normal(_) => {}
            }
            let percent = (reading.percent() * 10.0).round() / 10.0;
            extra.insert(format!("o2_percent_{}", room), Value::from(percent));
        }

        if flag("hb_ack") {
            *self
                .last_heartbeat_ack
                .lock()
                .unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
        }

        Ok(ModuleOutput::with_extra(status, extra))
    }
}
