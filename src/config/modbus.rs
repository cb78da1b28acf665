// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-enclosure project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus TCP client configuration
//!
//! This module defines the connection settings for the enclosure PLC and the
//! register catalog mapping symbolic names to PLC addresses.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::modbus::register::{BlockType, Decoder};

/// One entry of the register catalog.
///
/// # Example
///
/// ```yaml
/// dome_position:
///   address: 100
///   mode: holding_register
///   count: 2
///   decoder: float32
///   group: dome
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterConfig {
    /// Zero-based PDU address.
    pub address: u16,

    /// Data block of the register. Defaults to `coil`.
    #[serde(default)]
    pub mode: BlockType,

    /// Number of bits or words spanned by the register.
    #[serde(default = "default_count")]
    pub count: u16,

    /// Logical group, e.g. `dome` or `safety`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// Decoder applied to the raw words.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoder: Option<Decoder>,

    /// Refuse writes even if the block is writable.
    #[serde(default)]
    pub readonly: bool,
}

fn default_count() -> u16 {
    1
}

impl RegisterConfig {
    fn new(address: u16, mode: BlockType, group: &str) -> Self {
        Self {
            address,
            mode,
            count: 1,
            group: Some(group.to_string()),
            decoder: None,
            readonly: false,
        }
    }
}

/// Connection settings and register catalog for the enclosure PLC.
///
/// Timeouts and delays are expressed in seconds in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModbusConfig {
    /// Host name or IP address of the PLC.
    pub host: String,

    /// TCP port of the PLC. Default value is 502, the standard Modbus TCP port.
    pub port: u16,

    /// Modbus unit identifier.
    pub slave: u8,

    /// Time to live of cached register values.
    pub cache_timeout: f64,

    /// Budget for acquiring the connection lock and for the TCP connect.
    pub connection_timeout: f64,

    /// A session holding the lock longer than this is closed by the watchdog.
    pub lock_timeout: f64,

    /// Budget for a single request/response exchange.
    pub request_timeout: f64,

    /// Attempts per operation on transport failures.
    pub max_retries: u32,

    /// Delay between attempts.
    pub retry_delay: f64,

    /// Register catalog, by symbolic name.
    pub registers: BTreeMap<String, RegisterConfig>,
}

impl ModbusConfig {
    pub fn cache_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.cache_timeout)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.connection_timeout)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.lock_timeout)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay)
    }
}

/// Register map of the enclosure PLC.
fn default_registers() -> BTreeMap<String, RegisterConfig> {
    use BlockType::*;

    let mut registers = BTreeMap::new();
    let mut add = |name: &str, register: RegisterConfig| {
        registers.insert(name.to_string(), register);
    };

    // Dome drive
    add("drive_enabled", RegisterConfig::new(100, Coil, "dome"));
    add("motor_direction", RegisterConfig::new(101, Coil, "dome"));
    add("overcurrent_mode", RegisterConfig::new(102, Coil, "dome"));
    add("dome_error_reset", RegisterConfig::new(103, Coil, "dome"));
    add("dome_open", RegisterConfig::new(100, DiscreteInput, "dome"));
    add("dome_closed", RegisterConfig::new(101, DiscreteInput, "dome"));
    add("drive_state", RegisterConfig::new(102, DiscreteInput, "dome"));
    add("drive_brake", RegisterConfig::new(103, DiscreteInput, "dome"));
    add("overcurrent", RegisterConfig::new(104, DiscreteInput, "dome"));
    add("drive_error", RegisterConfig::new(105, DiscreteInput, "dome"));
    add(
        "dome_position",
        RegisterConfig {
            count: 2,
            decoder: Some(Decoder::Float32),
            readonly: true,
            ..RegisterConfig::new(100, HoldingRegister, "dome")
        },
    );

    // Safety and interlocks
    add("e_stop", RegisterConfig::new(200, Coil, "safety"));
    add("e_relay_reset", RegisterConfig::new(201, Coil, "safety"));
    add("hb_set", RegisterConfig::new(202, Coil, "safety"));
    add("door_closed", RegisterConfig::new(200, DiscreteInput, "safety"));
    add("door_locked", RegisterConfig::new(201, DiscreteInput, "safety"));
    add("local", RegisterConfig::new(202, DiscreteInput, "safety"));
    add("e_status", RegisterConfig::new(203, DiscreteInput, "safety"));
    add("rain_sensor_alarm", RegisterConfig::new(204, DiscreteInput, "safety"));
    add("dome_lockout", RegisterConfig::new(205, DiscreteInput, "safety"));
    add("dome_error", RegisterConfig::new(206, DiscreteInput, "safety"));
    add("hardware_bypass", RegisterConfig::new(207, DiscreteInput, "safety"));
    add("software_bypass", RegisterConfig::new(208, DiscreteInput, "safety"));
    add("hb_ack", RegisterConfig::new(209, DiscreteInput, "safety"));
    add(
        "o2_percent_utilities",
        RegisterConfig::new(200, InputRegister, "safety"),
    );
    add(
        "o2_percent_spectrograph",
        RegisterConfig::new(201, InputRegister, "safety"),
    );

    registers
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 502,
            slave: 1,
            cache_timeout: 1.0,
            connection_timeout: 1.0,
            lock_timeout: 5.0,
            request_timeout: 2.0,
            max_retries: 3,
            retry_delay: 0.1,
            registers: default_registers(),
        }
    }
}
