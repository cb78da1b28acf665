// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-enclosure project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Bulk register reader
//!
//! Reading N registers one by one costs N round trips. Instead, the address
//! span of every data block is covered with as few requests as the protocol
//! allows and the buffers are sliced back into named registers.

use std::collections::{BTreeMap, HashMap};

use log::debug;

use super::client::Modbus;
use super::register::{BlockType, RawData, Register, RegisterValue};
use crate::error::ModbusError;

/// One wire read covering a contiguous address range of a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPlan {
    pub block: BlockType,
    pub start: u16,
    pub count: u16,
}

impl ReadPlan {
    fn covers(&self, register: &Register) -> bool {
        register.block == self.block
            && register.address >= self.start
            && register.end_address() < u32::from(self.start) + u32::from(self.count)
    }
}

/// Compute the minimal set of reads covering all `registers`.
///
/// Requests are bounded by the per-transaction limit of each block type and
/// never split a register across two requests.
pub fn plan_reads<'a, I>(registers: I) -> Vec<ReadPlan>
where
    I: IntoIterator<Item = &'a Register>,
{
    let mut by_block: BTreeMap<BlockType, Vec<&Register>> = BTreeMap::new();
    for register in registers {
        by_block.entry(register.block).or_default().push(register);
    }

    let mut plans = Vec::new();
    for (block, mut registers) in by_block {
        registers.sort_by_key(|r| r.address);
        let limit = u32::from(block.max_read_quantity());

        let mut current: Option<(u16, u32)> = None;
        for register in registers {
            let end = register.end_address();
            current = match current {
                Some((start, current_end)) if end - u32::from(start) < limit => {
                    Some((start, current_end.max(end)))
                }
                Some((start, current_end)) => {
                    plans.push(ReadPlan {
                        block,
                        start,
                        count: (current_end - u32::from(start) + 1) as u16,
                    });
                    Some((register.address, end))
                }
                None => Some((register.address, end)),
            };
        }

        if let Some((start, end)) = current {
            plans.push(ReadPlan {
                block,
                start,
                count: (end - u32::from(start) + 1) as u16,
            });
        }
    }

    plans
}

/// Slice the raw buffers of `plans` into decoded register values.
fn slice_results(
    registers: &[&Register],
    plans: &[ReadPlan],
    buffers: &[RawData],
) -> Result<HashMap<String, RegisterValue>, ModbusError> {
    let mut values = HashMap::with_capacity(registers.len());

    for register in registers {
        let (plan, buffer) = plans
            .iter()
            .zip(buffers)
            .find(|(plan, _)| plan.covers(register))
            .ok_or_else(|| ModbusError::InvalidValue {
                register: register.name.clone(),
                reason: "register not covered by any read".to_string(),
            })?;

        let offset = usize::from(register.address - plan.start);
        let end = offset + usize::from(register.count);
        let raw = match buffer {
            RawData::Bits(bits) => RawData::Bits(bits.get(offset..end).unwrap_or_default().to_vec()),
            RawData::Words(words) => {
                RawData::Words(words.get(offset..end).unwrap_or_default().to_vec())
            }
        };

        values.insert(register.name.clone(), register.decode(raw)?);
    }

    Ok(values)
}

impl Modbus {
    /// Read every configured register.
    ///
    /// With `use_cache`, the cached snapshot is returned when every entry is
    /// still live. Otherwise all blocks are read inside a single session and
    /// the cache refreshed for every register at once.
    pub async fn read_all(
        &self,
        use_cache: bool,
    ) -> Result<HashMap<String, RegisterValue>, ModbusError> {
        let registers: Vec<&Register> = self.registers().collect();
        if registers.is_empty() {
            return Ok(HashMap::new());
        }

        if use_cache {
            if let Some(snapshot) = self
                .cache()
                .snapshot(registers.iter().map(|r| r.name.as_str()))
            {
                return Ok(snapshot);
            }
        }

        let plans = plan_reads(registers.iter().copied());
        let values = self
            .with_retries("all registers", || self.read_plans_once(&registers, &plans))
            .await?;

        self.cache().set_many(&values);
        Ok(values)
    }

    /// Read all registers tagged with `group`.
    pub async fn read_group(
        &self,
        group: &str,
        use_cache: bool,
    ) -> Result<HashMap<String, RegisterValue>, ModbusError> {
        let values = self.read_all(use_cache).await?;
        Ok(values
            .into_iter()
            .filter(|(name, _)| {
                self.register(name)
                    .map(|r| r.in_group(group))
                    .unwrap_or(false)
            })
            .collect())
    }

    async fn read_plans_once(
        &self,
        registers: &[&Register],
        plans: &[ReadPlan],
    ) -> Result<HashMap<String, RegisterValue>, ModbusError> {
        let session = self.connection().connect().await?;

        let mut buffers = Vec::with_capacity(plans.len());
        let mut failure = None;
        for plan in plans {
            let label = format!("{} block at {}", plan.block, plan.start);
            match session.read(&label, plan.block, plan.start, plan.count).await {
                Ok(buffer) => buffers.push(buffer),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        session.disconnect().await;

        if let Some(err) = failure {
            return Err(err);
        }

        debug!(
            "Read {} registers in {} requests",
            registers.len(),
            plans.len()
        );
        slice_results(registers, plans, &buffers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::register::Decoder;

    fn register(name: &str, block: BlockType, address: u16, count: u16) -> Register {
        Register {
            name: name.to_string(),
            address,
            block,
            count,
            decoder: None,
            group: None,
            read_only: false,
        }
    }

    #[test]
    fn test_coils_are_read_in_one_request() {
        let registers = vec![
            register("a", BlockType::Coil, 10, 1),
            register("b", BlockType::Coil, 500, 1),
            register("c", BlockType::Coil, 3, 1),
        ];
        let plans = plan_reads(&registers);
        assert_eq!(
            plans,
            vec![ReadPlan {
                block: BlockType::Coil,
                start: 3,
                count: 498
            }]
        );
    }

    #[test]
    fn test_holding_registers_are_chunked() {
        let mut registers = vec![
            register("a", BlockType::HoldingRegister, 0, 1),
            register("b", BlockType::HoldingRegister, 124, 1),
            register("c", BlockType::HoldingRegister, 200, 1),
        ];
        // A float straddling the 125 word boundary starts a new chunk.
        let mut float = register("f", BlockType::HoldingRegister, 124, 2);
        float.decoder = Some(Decoder::Float32);
        registers[1] = float;

        let plans = plan_reads(&registers);
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].start, 0);
        assert_eq!(plans[0].count, 1);
        assert_eq!(plans[1].start, 124);
        assert_eq!(plans[1].count, 77);
    }

    #[test]
    fn test_one_plan_per_block_type() {
        let registers = vec![
            register("coil", BlockType::Coil, 1, 1),
            register("input", BlockType::DiscreteInput, 1, 1),
            register("hr", BlockType::HoldingRegister, 1, 1),
            register("ir", BlockType::InputRegister, 1, 1),
        ];
        let plans = plan_reads(&registers);
        assert_eq!(plans.len(), 4);
    }

    #[test]
    fn test_slice_results_decodes_each_register() {
        let mut float = register("position", BlockType::HoldingRegister, 12, 2);
        float.decoder = Some(Decoder::Float32);
        let registers = vec![
            register("open", BlockType::Coil, 10, 1),
            register("closed", BlockType::Coil, 11, 1),
            register("counter", BlockType::HoldingRegister, 10, 1),
            float,
        ];
        let refs: Vec<&Register> = registers.iter().collect();
        let plans = plan_reads(refs.iter().copied());

        let buffers: Vec<RawData> = plans
            .iter()
            .map(|plan| match plan.block {
                BlockType::Coil => RawData::Bits(vec![true, false]),
                _ => RawData::Words(vec![7, 0, 0x0000, 0x4120]),
            })
            .collect();

        let values = slice_results(&refs, &plans, &buffers).unwrap();
        assert_eq!(values["open"], RegisterValue::Bool(true));
        assert_eq!(values["closed"], RegisterValue::Bool(false));
        assert_eq!(values["counter"], RegisterValue::Int(7));
        assert_eq!(values["position"], RegisterValue::Float(10.0));
    }
}
