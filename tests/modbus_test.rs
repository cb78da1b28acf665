// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-enclosure project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Tests for the register layer against the simulated PLC
//!
//! These tests start a simulator on an ephemeral port and exercise the real
//! Modbus/TCP client: caching, write visibility, bulk reads, the connection
//! lock and the error classification.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_enclosure::error::ModbusError;
use rust_enclosure::modbus::{Modbus, PlcSimulator, RegisterValue};
use tokio::time;
use tokio_modbus::ExceptionCode;

use common::{start_simulator, test_config};

async fn setup() -> (Modbus, PlcSimulator) {
    let mut config = test_config();
    let simulator = PlcSimulator::new(&config.modbus);
    start_simulator(simulator.clone(), &mut config).await;
    (Modbus::new(&config.modbus), simulator)
}

#[tokio::test]
async fn test_cached_read_within_ttl() {
    let (modbus, simulator) = setup().await;
    simulator.set("door_closed", true).unwrap();

    let first = modbus.read("door_closed", true).await.unwrap();
    let second = modbus.read("door_closed", true).await.unwrap();
    assert_eq!(first, RegisterValue::Bool(true));
    assert_eq!(second, first);
    assert_eq!(simulator.counts().reads(), 1);

    time::sleep(Duration::from_millis(600)).await;
    modbus.read("door_closed", true).await.unwrap();
    assert_eq!(simulator.counts().reads(), 2);
}

#[tokio::test]
async fn test_uncached_read_hits_the_wire() {
    let (modbus, simulator) = setup().await;

    modbus.read("local", false).await.unwrap();
    simulator.set("local", true).unwrap();
    let value = modbus.read("local", false).await.unwrap();

    assert!(value.as_bool());
    assert_eq!(simulator.counts().read_discrete_inputs, 2);
}

#[tokio::test]
async fn test_write_is_visible_before_next_poll() {
    let (modbus, simulator) = setup().await;

    modbus.write("e_stop", true).await.unwrap();
    let value = modbus.read("e_stop", true).await.unwrap();

    assert_eq!(value, RegisterValue::Bool(true));
    assert_eq!(simulator.counts().reads(), 0);
    assert_eq!(simulator.counts().write_single_coil, 1);
    assert_eq!(simulator.writes_to("e_stop"), vec![RegisterValue::Bool(true)]);
}

#[tokio::test]
async fn test_read_only_register_is_rejected() {
    let (modbus, simulator) = setup().await;

    let err = modbus.write("dome_position", 10.0f32).await.unwrap_err();
    assert!(matches!(err, ModbusError::ReadOnly(_)));
    assert_eq!(simulator.counts().total(), 0);
}

#[tokio::test]
async fn test_float32_word_order() {
    let (modbus, simulator) = setup().await;
    simulator.set("dome_position", 512.5f32).unwrap();

    let value = modbus.read("dome_position", false).await.unwrap();
    assert_eq!(value, RegisterValue::Float(512.5));
    assert_eq!(simulator.counts().read_holding_registers, 1);
}

#[tokio::test]
async fn test_exceptions_are_not_retried() {
    let (modbus, simulator) = setup().await;
    simulator.inject_exception("door_closed", ExceptionCode::IllegalDataAddress);

    let err = modbus.read("door_closed", false).await.unwrap_err();
    assert!(matches!(err, ModbusError::Exception { .. }));
    assert!(!err.is_transport());
    assert_eq!(simulator.counts().read_discrete_inputs, 1);
}

#[tokio::test]
async fn test_failed_write_names_the_register() {
    let (modbus, simulator) = setup().await;
    simulator.inject_exception("hb_set", ExceptionCode::ServerDeviceFailure);

    let err = modbus.write("hb_set", true).await.unwrap_err();
    match err {
        ModbusError::WriteFailed { register, .. } => assert_eq!(register, "hb_set"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(modbus.cache().get("hb_set").is_none());
}

#[tokio::test]
async fn test_unknown_register() {
    let (modbus, _simulator) = setup().await;
    let err = modbus.read("not_a_register", false).await.unwrap_err();
    assert!(matches!(err, ModbusError::UnknownRegister(_)));
}

#[tokio::test]
async fn test_read_all_uses_one_request_per_block() {
    let (modbus, simulator) = setup().await;
    simulator.set("o2_percent_utilities", 209u16).unwrap();
    simulator.set("dome_position", 250.0f32).unwrap();

    let values = modbus.read_all(false).await.unwrap();
    assert_eq!(values.len(), modbus.registers().count());
    assert_eq!(values["o2_percent_utilities"], RegisterValue::Int(209));
    assert_eq!(values["dome_position"], RegisterValue::Float(250.0));

    let counts = simulator.counts();
    assert_eq!(counts.read_coils, 1);
    assert_eq!(counts.read_discrete_inputs, 1);
    assert_eq!(counts.read_holding_registers, 1);
    assert_eq!(counts.read_input_registers, 1);

    // Every entry is live, the snapshot is served from the cache
    modbus.read_all(true).await.unwrap();
    assert_eq!(simulator.counts().reads(), 4);

    let safety = modbus.read_group("safety", true).await.unwrap();
    assert!(safety.contains_key("e_status"));
    assert!(!safety.contains_key("drive_enabled"));
}

#[tokio::test]
async fn test_lock_is_exclusive() {
    let mut config = test_config();
    config.modbus.connection_timeout = 0.1;
    config.modbus.max_retries = 2;
    let simulator = PlcSimulator::new(&config.modbus);
    start_simulator(simulator.clone(), &mut config).await;
    let modbus = Modbus::new(&config.modbus);

    let session = modbus.connection().connect().await.unwrap();
    assert!(modbus.connection().is_locked());

    let err = modbus.read("door_closed", false).await.unwrap_err();
    assert!(matches!(err, ModbusError::LockTimeout(_)));
    assert!(err.is_transport());
    assert_eq!(simulator.counts().reads(), 0);

    session.disconnect().await;
    assert!(!modbus.connection().is_locked());
    assert!(modbus.read("door_closed", false).await.is_ok());
}

#[tokio::test]
async fn test_watchdog_releases_stale_session() {
    let mut config = test_config();
    config.modbus.lock_timeout = 0.2;
    config.modbus.connection_timeout = 1.0;
    let simulator = PlcSimulator::new(&config.modbus);
    start_simulator(simulator.clone(), &mut config).await;
    let modbus = Modbus::new(&config.modbus);

    let _stale = modbus.connection().connect().await.unwrap();
    let value = modbus.read("door_closed", false).await;
    assert!(value.is_ok());
}

#[tokio::test]
async fn test_cancelled_read_releases_the_lock() {
    let mut config = test_config();
    config.modbus.lock_timeout = 5.0;
    config.modbus.request_timeout = 2.0;
    let simulator = PlcSimulator::new(&config.modbus);
    start_simulator(simulator.clone(), &mut config).await;
    let modbus = Arc::new(Modbus::new(&config.modbus));

    simulator.set_response_delay(Some(Duration::from_millis(1500)));
    let reader = {
        let modbus = modbus.clone();
        tokio::spawn(async move { modbus.read("door_closed", false).await })
    };
    while simulator.counts().reads() == 0 {
        time::sleep(Duration::from_millis(10)).await;
    }
    assert!(modbus.connection().is_locked());

    reader.abort();
    assert!(reader.await.unwrap_err().is_cancelled());
    assert!(!modbus.connection().is_locked());

    simulator.set_response_delay(None);
    let started = Instant::now();
    simulator.set("door_closed", true).unwrap();
    let value = modbus.read("door_closed", false).await.unwrap();
    assert!(value.as_bool());
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_unreachable_controller() {
    let mut config = test_config();
    config.modbus.host = "127.0.0.1".to_string();
    config.modbus.port = 1;
    config.modbus.connection_timeout = 0.2;
    config.modbus.max_retries = 2;
    let modbus = Modbus::new(&config.modbus);

    let err = modbus.read("door_closed", false).await.unwrap_err();
    assert!(err.is_transport());
    assert_eq!(
        err.user_message(),
        rust_enclosure::error::CONTROLLER_UNREACHABLE
    );
    assert!(!modbus.connection().is_locked());
}
