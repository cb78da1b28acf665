// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-enclosure project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus communication module
//!
//! This module provides the Modbus TCP client used to talk to the enclosure
//! PLC, plus a simulated PLC used by the tests.
//!
//! ## Key Components
//!
//! - [`Register`]: an entry of the register catalog, loaded from configuration.
//! - [`ModbusConnection`]: exclusive lock and connect/disconnect bracket.
//! - [`Modbus`]: named register reads and writes with retries and caching,
//!   and bulk reads of the whole register map.
//! - [`PlcSimulator`]: a Modbus TCP server emulating the PLC.
//!
//! ## Usage
//!
//! ```no_run
//! use rust_enclosure::config::Config;
//! use rust_enclosure::modbus::Modbus;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::default();
//! let modbus = Modbus::new(&config.modbus);
//!
//! let closed = modbus.read("dome_closed", true).await?;
//! modbus.write("hb_set", true).await?;
//! let safety = modbus.read_group("safety", false).await?;
//! # Ok(())
//! # }
//! ```

pub mod bulk;
pub mod cache;
pub mod client;
pub mod connection;
pub mod register;
pub mod simulator;

pub use bulk::{plan_reads, ReadPlan};
pub use cache::RegisterCache;
pub use client::Modbus;
pub use connection::{ModbusConnection, ModbusSession};
pub use register::{BlockType, Decoder, RawData, Register, RegisterValue};
pub use simulator::{PlcSimulator, TransactionCounts, WriteRecord};
