// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-enclosure project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Shared helpers for the integration tests: a configuration with short
//! timings and a simulated PLC listening on an ephemeral port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use rust_enclosure::config::{Config, RegisterConfig};
use rust_enclosure::modbus::{BlockType, PlcSimulator};
use tokio::task::JoinHandle;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Default register map with timings suited to tests.
pub fn test_config() -> Config {
    let mut config = Config::default();

    config.modbus.cache_timeout = 0.5;
    config.modbus.connection_timeout = 0.5;
    config.modbus.lock_timeout = 5.0;
    config.modbus.request_timeout = 1.0;
    config.modbus.max_retries = 3;
    config.modbus.retry_delay = 0.02;

    config.dome.daytime_allowed = true;
    config.dome.check_interval = 0.05;
    config.dome.arrival_grace = 0.5;
    config.dome.movement_timeout = 5.0;
    config.dome.stop_settle = 0.05;
    config.dome.reset_pulse = 0.05;
    config.dome.poll_interval = 60.0;

    config.safety.reset_pulse = 0.05;
    config.safety.poll_interval = 60.0;

    config
}

/// Register with a group and the default count.
pub fn register(address: u16, mode: BlockType, group: &str) -> RegisterConfig {
    RegisterConfig {
        address,
        mode,
        count: 1,
        group: Some(group.to_string()),
        decoder: None,
        readonly: false,
    }
}

/// Start a simulator for the registers of `config` and point `config` at it.
pub async fn start_simulator(
    simulator: PlcSimulator,
    config: &mut Config,
) -> JoinHandle<()> {
    init_logger();

    let address = SocketAddr::from_str("127.0.0.1:0").unwrap();
    let (address, handle) = simulator.start(address).await.unwrap();
    config.modbus.host = address.ip().to_string();
    config.modbus.port = address.port();

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(20)).await;
    handle
}
