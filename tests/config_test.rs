// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-enclosure project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use anyhow::Result;
use rust_enclosure::config::Config;
use rust_enclosure::modbus::{BlockType, Decoder};
use std::fs;
use tempfile::tempdir;

#[test]
fn test_config_load_and_save() -> Result<()> {
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");

    let mut config = Config::default();
    config.modbus.host = "10.8.38.21".to_string();
    config.dome.anti_flap_tolerance = (5, 300.0);
    config.safety.o2_threshold = 19.0;
    config.save_to_file(&config_path)?;

    let loaded_config = Config::from_file(&config_path)?;
    assert_eq!(loaded_config.modbus.host, "10.8.38.21");
    assert_eq!(loaded_config.dome.anti_flap_tolerance, (5, 300.0));
    assert_eq!(loaded_config.safety.o2_threshold, 19.0);
    assert_eq!(loaded_config.modbus.registers, config.modbus.registers);

    // Missing file: the default configuration is written and returned
    let non_existent_path = temp_dir.path().join("non_existent.yaml");
    let default_config = Config::from_file(&non_existent_path)?;
    assert!(non_existent_path.exists());
    assert_eq!(default_config.modbus.port, 502);
    assert_eq!(default_config.dome.anti_flap_tolerance, (3, 600.0));

    Ok(())
}

#[test]
fn test_apply_args() {
    let mut config = Config::default();
    config.apply_args(Some("plc.lco.cl".to_string()), Some(5020));
    assert_eq!(config.modbus.host, "plc.lco.cl");
    assert_eq!(config.modbus.port, 5020);

    config.apply_args(None, None);
    assert_eq!(config.modbus.host, "plc.lco.cl");
}

#[test]
fn test_partial_yaml() -> Result<()> {
    let yaml = r#"
modbus:
  host: 10.8.38.21
  registers:
    dome_open: {address: 10, mode: coil, group: dome}
    dome_position: {address: 100, mode: holding_register, count: 2, decoder: float32, group: dome}
    e_status: {address: 40, mode: discrete_input, group: safety, readonly: true}
dome:
  anti_flap_tolerance: [2, 120]
safety:
  o2_sensors: {}
"#;

    let config = Config::from_yaml(yaml)?;
    assert_eq!(config.modbus.port, 502);
    assert_eq!(config.modbus.registers.len(), 3);

    let position = &config.modbus.registers["dome_position"];
    assert_eq!(position.mode, BlockType::HoldingRegister);
    assert_eq!(position.decoder, Some(Decoder::Float32));
    assert_eq!(position.count, 2);

    let dome_open = &config.modbus.registers["dome_open"];
    assert_eq!(dome_open.count, 1);
    assert!(!dome_open.readonly);
    assert!(config.modbus.registers["e_status"].readonly);

    assert_eq!(config.dome.anti_flap_attempts(), 2);
    assert!(!config.dome.daytime_allowed);
    Ok(())
}

#[test]
fn test_schema_rejects_unknown_fields() {
    let yaml = r#"
modbus:
  host: 127.0.0.1
  baudrate: 9600
"#;
    let err = Config::from_yaml(yaml).unwrap_err();
    assert!(err.to_string().contains("validation failed"));
}

#[test]
fn test_schema_rejects_bad_register_mode() {
    let yaml = r#"
modbus:
  registers:
    dome_open: {address: 10, mode: analog_output}
safety:
  o2_sensors: {}
"#;
    assert!(Config::from_yaml(yaml).is_err());
}

#[test]
fn test_invalid_file_creates_sample() -> Result<()> {
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(
        &config_path,
        "dome:\n  anti_flap_tolerance: [0, 600]\n",
    )?;

    assert!(Config::from_file(&config_path).is_err());
    assert!(temp_dir.path().join("config.sample.yaml").exists());
    Ok(())
}

#[test]
fn test_example_config_is_valid() -> Result<()> {
    let config = Config::from_yaml(include_str!("../config.example.yaml"))?;
    assert_eq!(config.modbus.registers, Config::default().modbus.registers);
    assert!(config.heartbeat.enabled);
    Ok(())
}

#[test]
fn test_schema_output() {
    assert!(rust_enclosure::config::output_config_schema().is_ok());
}
