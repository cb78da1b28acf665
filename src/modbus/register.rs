// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-enclosure project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register catalog types and value decoding
//!
//! A [`Register`] maps a symbolic name to a PDU address inside one of the four
//! Modbus data blocks. Registers are built once from the configuration and
//! never mutated afterwards.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::RegisterConfig;
use crate::error::ModbusError;

/// The four Modbus addressable data blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    /// Read-write bit (function codes 0x01, 0x05, 0x0F)
    Coil,
    /// Read-only bit (function code 0x02)
    DiscreteInput,
    /// Read-write word (function codes 0x03, 0x06, 0x10)
    HoldingRegister,
    /// Read-only word (function code 0x04)
    InputRegister,
}

impl BlockType {
    /// Whether the block holds single bits rather than 16-bit words.
    pub fn is_bit(self) -> bool {
        matches!(self, BlockType::Coil | BlockType::DiscreteInput)
    }

    /// Whether the block can be written through the Modbus protocol.
    pub fn is_writable(self) -> bool {
        matches!(self, BlockType::Coil | BlockType::HoldingRegister)
    }

    /// Maximum number of elements the protocol allows in one read request.
    pub fn max_read_quantity(self) -> u16 {
        if self.is_bit() {
            2000
        } else {
            125
        }
    }
}

impl Default for BlockType {
    fn default() -> Self {
        BlockType::Coil
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlockType::Coil => "coil",
            BlockType::DiscreteInput => "discrete_input",
            BlockType::HoldingRegister => "holding_register",
            BlockType::InputRegister => "input_register",
        };
        f.write_str(name)
    }
}

/// Decoders applied to the raw words of a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decoder {
    /// IEEE 754 single precision float over two words. Big-endian byte order
    /// inside each word, little-endian word order across the pair.
    Float32,
}

impl Decoder {
    /// Number of words the decoder consumes.
    pub fn word_count(self) -> u16 {
        match self {
            Decoder::Float32 => 2,
        }
    }
}

/// A decoded register value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegisterValue {
    Bool(bool),
    Int(u16),
    Float(f32),
    Bits(Vec<bool>),
    Words(Vec<u16>),
}

impl RegisterValue {
    /// Interpret the value as a boolean. Integers are true when non-zero.
    pub fn as_bool(&self) -> bool {
        match self {
            RegisterValue::Bool(value) => *value,
            RegisterValue::Int(value) => *value != 0,
            RegisterValue::Float(value) => *value != 0.0,
            RegisterValue::Bits(bits) => bits.first().copied().unwrap_or(false),
            RegisterValue::Words(words) => words.first().is_some_and(|w| *w != 0),
        }
    }

    /// Interpret the value as a floating point number, if it is scalar.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RegisterValue::Bool(value) => Some(if *value { 1.0 } else { 0.0 }),
            RegisterValue::Int(value) => Some(f64::from(*value)),
            RegisterValue::Float(value) => Some(f64::from(*value)),
            _ => None,
        }
    }
}

impl From<bool> for RegisterValue {
    fn from(value: bool) -> Self {
        RegisterValue::Bool(value)
    }
}

impl From<u16> for RegisterValue {
    fn from(value: u16) -> Self {
        RegisterValue::Int(value)
    }
}

impl From<f32> for RegisterValue {
    fn from(value: f32) -> Self {
        RegisterValue::Float(value)
    }
}

impl fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterValue::Bool(value) => write!(f, "{}", value),
            RegisterValue::Int(value) => write!(f, "{}", value),
            RegisterValue::Float(value) => write!(f, "{}", value),
            RegisterValue::Bits(bits) => write!(f, "{:?}", bits),
            RegisterValue::Words(words) => write!(f, "{:?}", words),
        }
    }
}

/// Raw data returned by a wire read, before decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum RawData {
    Bits(Vec<bool>),
    Words(Vec<u16>),
}

/// A named PLC register.
#[derive(Debug, Clone, PartialEq)]
pub struct Register {
    /// Unique symbolic name.
    pub name: String,
    /// Zero-based PDU address.
    pub address: u16,
    /// Data block the register lives in.
    pub block: BlockType,
    /// Number of bits or words spanned by the register.
    pub count: u16,
    /// Optional decoder applied to the raw words.
    pub decoder: Option<Decoder>,
    /// Logical group, e.g. `dome` or `safety`.
    pub group: Option<String>,
    /// Whether writes are refused regardless of block type.
    pub read_only: bool,
}

impl Register {
    /// Build a register from its configuration entry.
    pub fn from_config(name: &str, config: &RegisterConfig) -> Self {
        let count = match config.decoder {
            Some(decoder) => config.count.max(decoder.word_count()),
            None => config.count.max(1),
        };

        Self {
            name: name.to_string(),
            address: config.address,
            block: config.mode,
            count,
            decoder: config.decoder,
            group: config.group.clone(),
            read_only: config.readonly || !config.mode.is_writable(),
        }
    }

    /// Last address covered by the register.
    pub fn end_address(&self) -> u32 {
        u32::from(self.address) + u32::from(self.count) - 1
    }

    /// Whether the register belongs to `group`.
    pub fn in_group(&self, group: &str) -> bool {
        self.group.as_deref() == Some(group)
    }

    /// Decode the raw data of this register.
    ///
    /// `raw` must hold exactly the bits or words spanned by the register.
    pub fn decode(&self, raw: RawData) -> Result<RegisterValue, ModbusError> {
        match raw {
            RawData::Bits(mut bits) => {
                if bits.len() < usize::from(self.count) {
                    return Err(self.invalid(format!(
                        "expected {} bits, got {}",
                        self.count,
                        bits.len()
                    )));
                }
                bits.truncate(usize::from(self.count));
                if self.count == 1 {
                    Ok(RegisterValue::Bool(bits[0]))
                } else {
                    Ok(RegisterValue::Bits(bits))
                }
            }
            RawData::Words(mut words) => {
                if words.len() < usize::from(self.count) {
                    return Err(self.invalid(format!(
                        "expected {} words, got {}",
                        self.count,
                        words.len()
                    )));
                }
                words.truncate(usize::from(self.count));
                match self.decoder {
                    Some(Decoder::Float32) => Ok(RegisterValue::Float(decode_float32(
                        words[0], words[1],
                    ))),
                    None if self.count == 1 => Ok(RegisterValue::Int(words[0])),
                    None => Ok(RegisterValue::Words(words)),
                }
            }
        }
    }

    /// Encode a value into the words to write to a holding register.
    pub fn encode_words(&self, value: &RegisterValue) -> Result<Vec<u16>, ModbusError> {
        match (self.decoder, value) {
            (Some(Decoder::Float32), value) => {
                let float = value
                    .as_f64()
                    .ok_or_else(|| self.invalid("expected a scalar value".to_string()))?;
                let (low, high) = encode_float32(float as f32);
                Ok(vec![low, high])
            }
            (None, RegisterValue::Int(word)) => Ok(vec![*word]),
            (None, RegisterValue::Bool(bit)) => Ok(vec![u16::from(*bit)]),
            (None, RegisterValue::Words(words)) if words.len() == usize::from(self.count) => {
                Ok(words.clone())
            }
            (None, other) => Err(self.invalid(format!("cannot encode {} as words", other))),
        }
    }

    fn invalid(&self, reason: String) -> ModbusError {
        ModbusError::InvalidValue {
            register: self.name.clone(),
            reason,
        }
    }
}

/// Decode a float stored as `[low word, high word]`, each word big-endian.
pub fn decode_float32(low: u16, high: u16) -> f32 {
    f32::from_bits((u32::from(high) << 16) | u32::from(low))
}

/// Split a float into `(low word, high word)`.
pub fn encode_float32(value: f32) -> (u16, u16) {
    let bits = value.to_bits();
    ((bits & 0xFFFF) as u16, (bits >> 16) as u16)
}
