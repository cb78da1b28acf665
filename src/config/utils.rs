// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-enclosure project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration utilities
//!
//! This module provides utility functions for working with configuration
//! settings, including validation and schema management.

use anyhow::{Context, Result};
use log::debug;

use super::Config;
use crate::modbus::register::{BlockType, Decoder};
use crate::status::SafetyStatus;

/// Output the embedded JSON schema to the console.
///
/// This function is called when the `--show-config-schema` flag is provided
/// on the command line.
///
/// ### Example
///
/// ```bash
/// ./rust_enclosure --show-config-schema > config_schema.json
/// ```
pub fn output_config_schema() -> Result<()> {
    let schema_str = include_str!("../../resources/config.schema.json");

    let schema: serde_json::Value =
        serde_json::from_str(schema_str).context("Failed to parse JSON schema")?;

    let formatted_schema =
        serde_json::to_string_pretty(&schema).context("Failed to format JSON schema")?;

    println!("{}", formatted_schema);

    Ok(())
}

/// Check if a string is a valid IP address or a plausible host name.
pub fn is_valid_host(host: &str) -> bool {
    if host.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }

    !host.is_empty()
        && host.len() <= 253
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
                && !label.starts_with('-')
                && !label.ends_with('-')
        })
}

/// Validate rules the JSON schema cannot express.
///
/// ### Checks
///
/// * every register fits in the 16-bit address space of its block
/// * `float32` registers are word registers spanning exactly two words
/// * the anti-flap threshold and window are positive
/// * every O2 sensor refers to a configured register
pub fn validate_specific_rules(config: &Config) -> Result<()> {
    debug!("Performing additional validation checks");

    if !is_valid_host(&config.modbus.host) {
        anyhow::bail!("Invalid Modbus host: {:?}", config.modbus.host);
    }

    for (name, register) in &config.modbus.registers {
        let end = u32::from(register.address) + u32::from(register.count.max(1)) - 1;
        if end > u32::from(u16::MAX) {
            anyhow::bail!(
                "Register {:?} at address {} with count {} exceeds the address space",
                name,
                register.address,
                register.count
            );
        }

        if register.decoder == Some(Decoder::Float32) {
            if register.mode.is_bit() {
                anyhow::bail!(
                    "Register {:?} uses the float32 decoder but is a {} register",
                    name,
                    register.mode
                );
            }
            if register.count != 2 {
                anyhow::bail!(
                    "Register {:?} uses the float32 decoder and must span 2 words, not {}",
                    name,
                    register.count
                );
            }
        }

        if register.mode == BlockType::InputRegister && !register.readonly {
            debug!("Register {:?} is an input register and will be read-only", name);
        }
    }

    let (attempts, window) = config.dome.anti_flap_tolerance;
    if attempts == 0 || window <= 0.0 {
        anyhow::bail!(
            "Invalid anti-flap tolerance [{}, {}]: both values must be positive",
            attempts,
            window
        );
    }

    for (room, register) in &config.safety.o2_sensors {
        if SafetyStatus::o2_alarm(room).is_none() {
            anyhow::bail!(
                "Unknown O2 sensor room {:?}, expected one of {:?}",
                room,
                SafetyStatus::O2_ROOMS
            );
        }
        if !config.modbus.registers.contains_key(register) {
            anyhow::bail!(
                "O2 sensor for {:?} refers to unknown register {:?}",
                room,
                register
            );
        }
    }

    Ok(())
}
