// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-enclosure project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Safety controller tests against the simulated PLC

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_enclosure::config::Config;
use rust_enclosure::modbus::{PlcSimulator, RegisterValue};
use rust_enclosure::module::{Notification, Notifier, PlcModule};
use rust_enclosure::plc::Plc;
use rust_enclosure::safety::O2Reading;
use rust_enclosure::status::{SafetyStatus, StatusFlags};
use tokio::time;

use common::{start_simulator, test_config};

async fn setup(mut config: Config) -> (Plc, PlcSimulator) {
    let simulator = PlcSimulator::new(&config.modbus);
    // Normal atmosphere in both rooms
    simulator.set("o2_percent_utilities", 209u16).unwrap();
    simulator.set("o2_percent_spectrograph", 209u16).unwrap();
    start_simulator(simulator.clone(), &mut config).await;
    (Plc::new(&config), simulator)
}

#[derive(Default)]
struct Capture {
    notifications: Mutex<Vec<Notification>>,
}

#[async_trait]
impl Notifier for Capture {
    async fn notify(&self, notification: Notification) {
        self.notifications.lock().unwrap().push(notification);
    }
}

#[tokio::test]
async fn test_interlock_bits() {
    let (plc, simulator) = setup(test_config()).await;
    simulator.set("door_closed", true).unwrap();
    simulator.set("door_locked", true).unwrap();
    simulator.set("rain_sensor_alarm", true).unwrap();

    let status = plc.safety.update(false, false).await;
    assert_eq!(
        status,
        SafetyStatus::DOOR_CLOSED | SafetyStatus::DOOR_LOCKED | SafetyStatus::RAIN_SENSOR_ALARM
    );
    assert!(plc.safety.is_remote().await);
}

#[tokio::test]
async fn test_o2_alarm_and_fault() {
    let (plc, simulator) = setup(test_config()).await;
    simulator.set("o2_percent_utilities", 180u16).unwrap();
    simulator.set("o2_percent_spectrograph", 0u16).unwrap();

    let status = plc.safety.update(false, false).await;
    assert!(status.contains(SafetyStatus::O2_ALARM_UTILITIES_ROOM));
    assert!(status.contains(SafetyStatus::O2_FAULT_SPECTROGRAPH_ROOM));
    assert!(!status.contains(SafetyStatus::O2_ALARM_SPECTROGRAPH_ROOM));

    let extra = plc.safety.core().extra();
    assert_eq!(
        extra.get("o2_percent_utilities_room").and_then(|v| v.as_f64()),
        Some(18.0)
    );

    let readings = plc.safety.o2_readings(true).await.unwrap();
    assert!(matches!(readings["utilities_room"], O2Reading::Alarm(_)));
    assert!(matches!(readings["spectrograph_room"], O2Reading::Fault(_)));
}

#[tokio::test]
async fn test_emergency_stop_and_reset() {
    let (plc, simulator) = setup(test_config()).await;

    plc.safety.emergency_stop().await.unwrap();
    assert!(plc.safety.status().contains(SafetyStatus::E_STOP));

    plc.safety.reset_e_stops().await.unwrap();
    assert_eq!(
        simulator.writes_to("e_relay_reset"),
        vec![RegisterValue::Bool(true), RegisterValue::Bool(false)]
    );
    assert!(!plc.safety.status().contains(SafetyStatus::E_STOP));
}

#[tokio::test]
async fn test_heartbeat_ack() {
    let (plc, simulator) = setup(test_config()).await;
    assert!(plc.safety.last_heartbeat_ack().is_none());

    plc.safety.heartbeat().await.unwrap();
    assert_eq!(simulator.writes_to("hb_set"), vec![RegisterValue::Bool(true)]);

    plc.safety.update(false, false).await;
    assert!(plc.safety.last_heartbeat_ack().is_some());
}

#[tokio::test]
async fn test_engineering_mode_and_bypasses() {
    let (plc, simulator) = setup(test_config()).await;
    assert!(!plc.safety.engineering_mode_active(true).await.unwrap());

    simulator.set("software_bypass", true).unwrap();
    assert!(plc.safety.engineering_mode_active(true).await.unwrap());
    assert!(!plc.safety.engineering_mode_active(false).await.unwrap());

    plc.engineering.enable(None);
    assert!(plc.safety.engineering_mode_active(false).await.unwrap());
    plc.engineering.disable();
}

#[tokio::test]
async fn test_unknown_when_unreachable() {
    let mut config = test_config();
    config.modbus.port = 1;
    config.modbus.connection_timeout = 0.1;
    config.modbus.max_retries = 1;
    let plc = Plc::new(&config);

    let status = plc.safety.update(false, false).await;
    assert!(status.is_unknown());
    assert!(!plc.safety.is_remote().await);
}

#[tokio::test]
async fn test_polling_notifies_changes() {
    let mut config = test_config();
    config.safety.poll_interval = 0.1;
    config.modbus.cache_timeout = 0.05;
    let (plc, simulator) = setup(config).await;

    let capture = Arc::new(Capture::default());
    plc.set_notifier(capture.clone());
    plc.start();
    time::sleep(Duration::from_millis(250)).await;

    simulator.set("local", true).unwrap();
    time::sleep(Duration::from_millis(300)).await;
    plc.shutdown().await;

    let notifications = capture.notifications.lock().unwrap().clone();
    let safety: Vec<&Notification> = notifications
        .iter()
        .filter(|n| n.module == "safety")
        .collect();

    assert_eq!(safety.first().map(|n| n.label.as_str()), Some("UNKNOWN"));
    let last = safety.last().unwrap();
    assert!(last.label.contains("LOCAL"));
    assert_eq!(last.value & SafetyStatus::LOCAL.bits(), SafetyStatus::LOCAL.bits());
    assert!(!plc.safety.core().is_polling());
}
