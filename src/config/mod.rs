// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-enclosure project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration management for the enclosure controller
//!
//! This module provides functionality for loading, validating, and applying
//! configuration settings for the enclosure controller. The configuration
//! is backed by a YAML file and validated against a JSON schema for robustness.
//!
//! ## Configuration Structure
//!
//! The configuration is organized as a nested structure with sections:
//! - `modbus`: PLC connection settings and register catalog
//! - `dome`: Dome motion policy (anti-flap, daytime lockout, timeouts)
//! - `safety`: O2 thresholds and local mode override
//! - `engineering_mode`: Default duration of the engineering override
//! - `heartbeat`: Periodic heartbeat sent to the PLC
//!
//! ## Usage
//!
//! ```no_run
//! use rust_enclosure::config::Config;
//! use std::path::Path;
//!
//! // Load config from file, creates a default if not found
//! let mut config = Config::from_file(Path::new("config.yaml")).unwrap();
//!
//! // Apply command line overrides if needed
//! config.apply_args(Some("10.8.38.21".to_string()), Some(502));
//!
//! println!("PLC at {}:{}", config.modbus.host, config.modbus.port);
//! ```

pub mod dome;
pub mod engineering;
pub mod modbus;
pub mod safety;
pub mod utils;

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, error};
use serde::{Deserialize, Serialize};

pub use dome::DomeConfig;
pub use engineering::{EngineeringModeConfig, HeartbeatConfig};
pub use modbus::{ModbusConfig, RegisterConfig};
pub use safety::SafetyConfig;
pub use utils::{output_config_schema, validate_specific_rules};

/// Root configuration structure.
///
/// Every section has a default so a partial YAML file is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub modbus: ModbusConfig,

    #[serde(default)]
    pub dome: DomeConfig,

    #[serde(default)]
    pub safety: SafetyConfig,

    #[serde(default)]
    pub engineering_mode: EngineeringModeConfig,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

impl Config {
    /// Write a `*.sample.yaml` file with the default values next to `path`.
    fn create_sample_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        let sample_path = path.with_extension("sample.yaml");
        debug!("Creating sample configuration file at {:?}", sample_path);

        if let Some(parent) = sample_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                debug!("Creating parent directory: {:?}", parent);
                fs::create_dir_all(parent).with_context(|| {
                    format!(
                        "Failed to create parent directory for sample config at {:?}",
                        parent
                    )
                })?;
            }
        }

        Self::default()
            .save_to_file(&sample_path)
            .with_context(|| format!("Failed to save sample config to {:?}", sample_path))?;

        error!(
            "Sample configuration file created at {:?}\nPlease edit and rename it",
            sample_path
        );
        Ok(())
    }

    /// Load the configuration from a YAML file.
    ///
    /// If the file does not exist, the default configuration is written to
    /// `path` and returned. If it fails schema validation, deserialization or
    /// [`validate_specific_rules`], a sample file is written next to it and
    /// the error is returned.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(
                "Configuration file not found at {:?}, creating default",
                path
            );
            let default_config = Self::default();
            default_config.save_to_file(path)?;
            return Ok(default_config);
        }

        debug!("Loading configuration from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at {:?}", path))?;

        Self::from_yaml(&contents).inspect_err(|_| {
            if let Err(e) = Self::create_sample_config(path) {
                error!("Failed to create sample config: {}", e);
            }
        })
    }

    /// Parse and validate a configuration from YAML text.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        // YAML to a generic value, then to JSON for validation
        let yaml_value: serde_yml::Value =
            serde_yml::from_str(contents).context("Failed to parse YAML configuration")?;
        let json_value = serde_json::to_value(&yaml_value)
            .context("Failed to convert YAML to JSON for validation")?;

        let schema_str = include_str!("../../resources/config.schema.json");
        let schema: serde_json::Value =
            serde_json::from_str(schema_str).context("Failed to parse JSON schema")?;

        let validator = jsonschema::draft202012::options()
            .should_validate_formats(true)
            .build(&schema)?;

        debug!("Validating configuration against schema");
        if let Err(error) = validator.validate(&json_value) {
            error!("Configuration validation error before deserialization");
            anyhow::bail!("Configuration validation failed: {}", error);
        }

        debug!("Schema validation passed, deserializing into Config structure");
        let config: Config = serde_yml::from_str(contents).map_err(|err| {
            error!("Configuration deserialization error: {}", err);
            anyhow::anyhow!("Failed to deserialize configuration: {}", err)
        })?;

        if let Err(err) = validate_specific_rules(&config) {
            error!("Configuration specific validation error: {}", err);
            return Err(err);
        }

        Ok(config)
    }

    /// Save the configuration to a YAML file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml =
            serde_yml::to_string(self).context("Failed to serialize configuration to YAML")?;

        let mut file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create config file at {:?}", path.as_ref()))?;

        file.write_all(yaml.as_bytes())
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Apply command line overrides.
    pub fn apply_args(&mut self, modbus_host: Option<String>, modbus_port: Option<u16>) {
        if let Some(host) = modbus_host {
            debug!("Overriding Modbus host from command line: {}", host);
            self.modbus.host = host;
        }

        if let Some(port) = modbus_port {
            debug!("Overriding Modbus port from command line: {}", port);
            self.modbus.port = port;
        }
    }
}
