// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-enclosure project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus TCP connection manager
//!
//! The PLC accepts only a handful of concurrent sessions, so the client never
//! keeps a connection open between logical operations. Every operation is
//! bracketed as *acquire lock → connect → one exchange → disconnect → release*.
//!
//! [`ModbusConnection::connect`] returns a [`ModbusSession`] that owns the
//! exclusive lock for its whole lifetime. A watchdog task armed on connect
//! closes the session and releases the lock after `lock_timeout`, even if the
//! holder never calls [`ModbusSession::disconnect`]. Dropping a session (for
//! example when the task owning it is cancelled) also releases the lock.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_modbus::client::{tcp, Client, Context, Reader, Writer};
use tokio_modbus::Slave;

use super::register::{BlockType, RawData};
use crate::config::ModbusConfig;
use crate::error::ModbusError;

/// Owner of the TCP endpoint and of the exclusive connection lock.
#[derive(Debug)]
pub struct ModbusConnection {
    host: String,
    port: u16,
    slave: u8,
    connection_timeout: Duration,
    lock_timeout: Duration,
    request_timeout: Duration,
    lock: Arc<Mutex<()>>,
}

/// The live part of a session. Dropping it closes the socket and releases the lock.
struct ActiveSession {
    context: Context,
    _guard: OwnedMutexGuard<()>,
}

/// An open, exclusive session with the PLC.
pub struct ModbusSession {
    endpoint: String,
    request_timeout: Duration,
    slot: Arc<Mutex<Option<ActiveSession>>>,
    watchdog: JoinHandle<()>,
}

impl ModbusConnection {
    /// Create a connection manager from the `modbus` configuration section.
    pub fn new(config: &ModbusConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            slave: config.slave,
            connection_timeout: config.connection_timeout(),
            lock_timeout: config.lock_timeout(),
            request_timeout: config.request_timeout(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// `host:port` of the PLC.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether a session currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.lock.try_lock().is_err()
    }

    /// Acquire the lock and open a TCP session.
    ///
    /// Both the lock wait and the TCP connect are bounded by the connection
    /// timeout. On any failure the lock is released before returning.
    pub async fn connect(&self) -> Result<ModbusSession, ModbusError> {
        let endpoint = self.endpoint();

        let guard = timeout(self.connection_timeout, self.lock.clone().lock_owned())
            .await
            .map_err(|_| ModbusError::LockTimeout(endpoint.clone()))?;

        debug!("Trying to connect to modbus server on {}", endpoint);

        let address = self.resolve(&endpoint).await?;
        let context = match timeout(
            self.connection_timeout,
            tcp::connect_slave(address, Slave(self.slave)),
        )
        .await
        {
            Ok(Ok(context)) => context,
            Ok(Err(err)) => {
                return Err(ModbusError::Connection {
                    endpoint,
                    reason: err.to_string(),
                })
            }
            Err(_) => return Err(ModbusError::ConnectTimeout(endpoint)),
        };

        debug!("Connected to {}", endpoint);

        let slot = Arc::new(Mutex::new(Some(ActiveSession {
            context,
            _guard: guard,
        })));
        let watchdog = spawn_watchdog(&slot, self.lock_timeout, endpoint.clone());

        Ok(ModbusSession {
            endpoint,
            request_timeout: self.request_timeout,
            slot,
            watchdog,
        })
    }

    async fn resolve(&self, endpoint: &str) -> Result<SocketAddr, ModbusError> {
        let lookup = timeout(
            self.connection_timeout,
            tokio::net::lookup_host((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| ModbusError::ConnectTimeout(endpoint.to_string()))?;

        lookup
            .map_err(|err| ModbusError::Connection {
                endpoint: endpoint.to_string(),
                reason: err.to_string(),
            })?
            .next()
            .ok_or_else(|| ModbusError::Connection {
                endpoint: endpoint.to_string(),
                reason: "address did not resolve".to_string(),
            })
    }
}

/// Close the session after `lock_timeout` unless it is gone by then.
fn spawn_watchdog(
    slot: &Arc<Mutex<Option<ActiveSession>>>,
    lock_timeout: Duration,
    endpoint: String,
) -> JoinHandle<()> {
    let slot = Arc::downgrade(slot);
    tokio::spawn(async move {
        sleep(lock_timeout).await;

        let Some(slot) = slot.upgrade() else {
            return;
        };
        let active = slot.lock().await.take();
        if let Some(mut active) = active {
            warn!(
                "Session with {} held for more than {:?}. Releasing the connection lock.",
                endpoint, lock_timeout
            );
            if let Err(err) = active.context.disconnect().await {
                debug!("Error closing session with {}: {}", endpoint, err);
            }
        }
    })
}

impl ModbusSession {
    /// `host:port` of the PLC.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Read `count` bits or words starting at `address`.
    ///
    /// `label` names the register (or block) in protocol errors.
    pub async fn read(
        &self,
        label: &str,
        block: BlockType,
        address: u16,
        count: u16,
    ) -> Result<RawData, ModbusError> {
        let mut slot = self.slot.lock().await;
        let active = slot.as_mut().ok_or(ModbusError::SessionReleased)?;
        let context = &mut active.context;
        let limit = self.request_timeout;

        let response = match block {
            BlockType::Coil => timeout(limit, context.read_coils(address, count))
                .await
                .map(|r| r.map(|r| r.map(RawData::Bits))),
            BlockType::DiscreteInput => timeout(limit, context.read_discrete_inputs(address, count))
                .await
                .map(|r| r.map(|r| r.map(RawData::Bits))),
            BlockType::HoldingRegister => {
                timeout(limit, context.read_holding_registers(address, count))
                    .await
                    .map(|r| r.map(|r| r.map(RawData::Words)))
            }
            BlockType::InputRegister => timeout(limit, context.read_input_registers(address, count))
                .await
                .map(|r| r.map(|r| r.map(RawData::Words))),
        };

        flatten(response, label, limit)
    }

    /// Write a single coil.
    pub async fn write_coil(&self, label: &str, address: u16, value: bool) -> Result<(), ModbusError> {
        let mut slot = self.slot.lock().await;
        let active = slot.as_mut().ok_or(ModbusError::SessionReleased)?;
        let limit = self.request_timeout;
        let response = timeout(limit, active.context.write_single_coil(address, value)).await;
        flatten(response, label, limit)
    }

    /// Write one or more consecutive holding registers.
    pub async fn write_registers(
        &self,
        label: &str,
        address: u16,
        words: &[u16],
    ) -> Result<(), ModbusError> {
        let mut slot = self.slot.lock().await;
        let active = slot.as_mut().ok_or(ModbusError::SessionReleased)?;
        let limit = self.request_timeout;
        let response = match words {
            [word] => timeout(limit, active.context.write_single_register(address, *word)).await,
            _ => timeout(limit, active.context.write_multiple_registers(address, words)).await,
        };
        flatten(response, label, limit)
    }

    /// Close the session and release the lock, even if closing fails.
    pub async fn disconnect(self) {
        self.watchdog.abort();

        let active = self.slot.lock().await.take();
        if let Some(mut active) = active {
            if let Err(err) = active.context.disconnect().await {
                debug!("Error closing session with {}: {}", self.endpoint, err);
            }
        }

        debug!("Disconnected from {}", self.endpoint);
    }
}

impl Drop for ModbusSession {
    fn drop(&mut self) {
        // The slot is only shared weakly with the watchdog, so dropping the
        // session drops the socket and the lock guard as well.
        self.watchdog.abort();
    }
}

fn flatten<T>(
    response: Result<tokio_modbus::Result<T>, tokio::time::error::Elapsed>,
    label: &str,
    limit: Duration,
) -> Result<T, ModbusError> {
    match response {
        Err(_) => Err(ModbusError::RequestTimeout(limit)),
        Ok(Err(err)) => Err(ModbusError::Transport(err)),
        Ok(Ok(Err(code))) => Err(ModbusError::Exception {
            register: label.to_string(),
            code,
        }),
        Ok(Ok(Ok(value))) => Ok(value),
    }
}
