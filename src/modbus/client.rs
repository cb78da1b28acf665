// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-enclosure project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register accessor
//!
//! [`Modbus`] is the register catalog together with the connection manager
//! and the value cache. Individual registers are read and written by name;
//! each wire operation is a bracketed session retried on transport failures.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use tokio::time::sleep;

use super::cache::RegisterCache;
use super::connection::ModbusConnection;
use super::register::{BlockType, RawData, Register, RegisterValue};
use crate::config::ModbusConfig;
use crate::error::ModbusError;

/// Named PLC registers accessible over Modbus/TCP.
#[derive(Debug)]
pub struct Modbus {
    connection: ModbusConnection,
    registers: BTreeMap<String, Register>,
    cache: RegisterCache,
    max_retries: u32,
    retry_delay: Duration,
}

impl Modbus {
    /// Build the register catalog and connection manager from configuration.
    pub fn new(config: &ModbusConfig) -> Self {
        let registers = config
            .registers
            .iter()
            .map(|(name, register)| (name.clone(), Register::from_config(name, register)))
            .collect();

        Self {
            connection: ModbusConnection::new(config),
            registers,
            cache: RegisterCache::new(config.cache_timeout()),
            max_retries: config.max_retries.max(1),
            retry_delay: config.retry_delay(),
        }
    }

    /// The connection manager.
    pub fn connection(&self) -> &ModbusConnection {
        &self.connection
    }

    /// The register value cache.
    pub fn cache(&self) -> &RegisterCache {
        &self.cache
    }

    /// Look up a register by name.
    pub fn register(&self, name: &str) -> Result<&Register, ModbusError> {
        self.registers
            .get(name)
            .ok_or_else(|| ModbusError::UnknownRegister(name.to_string()))
    }

    /// Whether a register called `name` is configured.
    pub fn contains(&self, name: &str) -> bool {
        self.registers.contains_key(name)
    }

    /// All configured registers, ordered by name.
    pub fn registers(&self) -> impl Iterator<Item = &Register> {
        self.registers.values()
    }

    /// Read a register.
    ///
    /// With `use_cache` a live cache entry is returned without touching the
    /// wire. Otherwise the register is read in its own session and the cache
    /// refreshed.
    pub async fn read(&self, name: &str, use_cache: bool) -> Result<RegisterValue, ModbusError> {
        let register = self.register(name)?;

        if use_cache {
            if let Some(value) = self.cache.get(name) {
                return Ok(value);
            }
        }

        let value = self
            .with_retries(name, || self.read_once(register))
            .await?;
        self.cache.set(name, value.clone());

        Ok(value)
    }

    async fn read_once(&self, register: &Register) -> Result<RegisterValue, ModbusError> {
        let session = self.connection.connect().await?;
        let raw = session
            .read(&register.name, register.block, register.address, register.count)
            .await;
        session.disconnect().await;

        register.decode(raw?)
    }

    /// Write a register.
    ///
    /// On success the cache entry is set to the written value so the write is
    /// visible to subsequent cached reads straight away.
    pub async fn write(
        &self,
        name: &str,
        value: impl Into<RegisterValue>,
    ) -> Result<(), ModbusError> {
        let register = self.register(name)?;
        if register.read_only {
            return Err(ModbusError::ReadOnly(name.to_string()));
        }

        let value = value.into();
        let stored = match register.block {
            BlockType::Coil => {
                let bit = value.as_bool();
                self.with_retries(name, || self.write_coil_once(register, bit))
                    .await
                    .map(|_| RegisterValue::Bool(bit))
            }
            _ => {
                let words = register.encode_words(&value)?;
                self.with_retries(name, || self.write_words_once(register, &words))
                    .await
                    .and_then(|_| register.decode(RawData::Words(words.clone())))
            }
        };

        match stored {
            Ok(stored) => {
                debug!("Wrote {} to register {:?}", stored, name);
                self.cache.set(name, stored);
                Ok(())
            }
            Err(err) => Err(ModbusError::WriteFailed {
                register: name.to_string(),
                source: Box::new(err),
            }),
        }
    }

    async fn write_coil_once(&self, register: &Register, value: bool) -> Result<(), ModbusError> {
        let session = self.connection.connect().await?;
        let result = session
            .write_coil(&register.name, register.address, value)
            .await;
        session.disconnect().await;
        result
    }

    async fn write_words_once(&self, register: &Register, words: &[u16]) -> Result<(), ModbusError> {
        let session = self.connection.connect().await?;
        let result = session
            .write_registers(&register.name, register.address, words)
            .await;
        session.disconnect().await;
        result
    }

    /// Run a bracketed operation, retrying transport failures.
    pub(crate) async fn with_retries<T, F, Fut>(&self, what: &str, mut operation: F) -> Result<T, ModbusError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ModbusError>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transport() && attempt < self.max_retries => {
                    warn!(
                        "Attempt {}/{} on {:?} failed: {}. Retrying.",
                        attempt, self.max_retries, what, err
                    );
                    attempt += 1;
                    sleep(self.retry_delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
