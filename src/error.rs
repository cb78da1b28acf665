// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-enclosure project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Error types for the enclosure controller
//!
//! Errors fall into three families:
//!
//! - **Transport** errors (lock or connect timeouts, socket failures). These are
//!   retried by the register accessor and eventually surface as a generic
//!   "failed to reach controller" message.
//! - **Protocol** errors, i.e. the PLC answered with a Modbus exception code.
//!   They are never retried.
//! - **Policy** errors raised by the dome and safety controllers when an
//!   operation is refused. Their message is meant for the operator verbatim.

use std::time::Duration;

use thiserror::Error;
use tokio_modbus::ExceptionCode;

/// Generic message shown to operators for transport failures.
pub const CONTROLLER_UNREACHABLE: &str = "Failed to reach the enclosure controller";

/// Errors raised by the Modbus register layer.
#[derive(Error, Debug)]
pub enum ModbusError {
    #[error("Timed out waiting for the connection lock to {0}")]
    LockTimeout(String),
    #[error("Timed out connecting to server at {0}")]
    ConnectTimeout(String),
    #[error("Failed connecting to server at {endpoint}: {reason}")]
    Connection { endpoint: String, reason: String },
    #[error("Transport error: {0}")]
    Transport(#[from] tokio_modbus::Error),
    #[error("Request timed out after {0:?}")]
    RequestTimeout(Duration),
    #[error("Invalid response for register {register:?}: {code:?}")]
    Exception {
        register: String,
        code: ExceptionCode,
    },
    #[error("Unknown register {0:?}")]
    UnknownRegister(String),
    #[error("Register {0:?} is read-only")]
    ReadOnly(String),
    #[error("Failed writing register {register:?}: {source}")]
    WriteFailed {
        register: String,
        #[source]
        source: Box<ModbusError>,
    },
    #[error("Session was released by the connection watchdog")]
    SessionReleased,
    #[error("Invalid value for register {register:?}: {reason}")]
    InvalidValue { register: String, reason: String },
}

impl ModbusError {
    /// Whether the error comes from the transport and the operation may be retried.
    pub fn is_transport(&self) -> bool {
        match self {
            ModbusError::LockTimeout(_)
            | ModbusError::ConnectTimeout(_)
            | ModbusError::Connection { .. }
            | ModbusError::Transport(_)
            | ModbusError::RequestTimeout(_)
            | ModbusError::SessionReleased => true,
            ModbusError::WriteFailed { source, .. } => source.is_transport(),
            _ => false,
        }
    }

    /// Message suitable for the operator-facing layer.
    pub fn user_message(&self) -> String {
        if self.is_transport() {
            CONTROLLER_UNREACHABLE.to_string()
        } else {
            self.to_string()
        }
    }
}

/// Errors raised by the dome controller when a move is refused or fails.
#[derive(Error, Debug)]
pub enum DomeError {
    #[error("Dome is not in remote mode")]
    NotRemote,
    #[error("E-stops are pressed")]
    EStop,
    #[error("Anti-flap mechanism triggered: {attempts} open attempts in the last {window:?}")]
    AntiFlap { attempts: usize, window: Duration },
    #[error("Dome cannot be opened during daytime")]
    Daytime,
    #[error("Dome status is unknown")]
    UnknownStatus,
    #[error("Safety status is unknown")]
    SafetyUnknown,
    #[error("Dome drive reports an error condition")]
    DriveError,
    #[error("Overcurrent mode can only be used to close the dome")]
    InvalidDriveMode,
    #[error("Dome did not reach the {0} position before the movement timeout")]
    MoveTimeout(&'static str),
    #[error("Dome drive stopped before reaching the {0} limit. Was it stopped manually?")]
    StoppedBeforeLimit(&'static str),
    #[error(transparent)]
    Modbus(#[from] ModbusError),
}

impl DomeError {
    /// Message suitable for the operator-facing layer.
    pub fn user_message(&self) -> String {
        match self {
            DomeError::Modbus(err) => err.user_message(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_get_generic_message() {
        let err = ModbusError::ConnectTimeout("127.0.0.1:502".to_string());
        assert!(err.is_transport());
        assert_eq!(err.user_message(), CONTROLLER_UNREACHABLE);

        let wrapped = DomeError::from(err);
        assert_eq!(wrapped.user_message(), CONTROLLER_UNREACHABLE);
    }

    #[test]
    fn test_protocol_and_policy_errors_are_verbatim() {
        let err = ModbusError::Exception {
            register: "drive_enabled".to_string(),
            code: ExceptionCode::IllegalDataAddress,
        };
        assert!(!err.is_transport());
        assert!(err.user_message().contains("drive_enabled"));

        let policy = DomeError::NotRemote;
        assert_eq!(policy.user_message(), "Dome is not in remote mode");
    }

    #[test]
    fn test_write_failure_keeps_transport_class() {
        let err = ModbusError::WriteFailed {
            register: "e_stop".to_string(),
            source: Box::new(ModbusError::SessionReleased),
        };
        assert!(err.is_transport());
        assert!(err.to_string().contains("e_stop"));
    }
}
