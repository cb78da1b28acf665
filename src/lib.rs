// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-enclosure project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Rust Enclosure library
//!
//! Controller for an observatory enclosure PLC over Modbus/TCP: register
//! access with caching and bulk reads, status modules with change
//! notifications, and the dome and safety policies built on top of them.

pub mod config;
pub mod daemon;
pub mod dome;
pub mod engineering;
pub mod error;
pub mod modbus;
pub mod module;
pub mod plc;
pub mod safety;
pub mod status;
pub mod utility;

pub use config::Config;
pub use error::{DomeError, ModbusError};
pub use plc::Plc;
