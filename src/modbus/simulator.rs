// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-enclosure project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Simulated enclosure PLC
//!
//! For avoiding confusion with the Modbus master/slave terminology, this module uses
//! the terms "server" and "client" instead. The simulator is the server holding the
//! register memory, the enclosure controller is the client.
//!
//! [`PlcSimulator`] serves the register map of a [`ModbusConfig`] over Modbus/TCP.
//! Each data block is dense up to the highest configured address; requests beyond
//! it fail with `IllegalDataAddress`. A few behaviour rules, keyed by register name,
//! emulate the PLC logic the controller relies on:
//!
//! | Write | Effect |
//! |-------|--------|
//! | `e_stop ← 1` | `e_status ← 1` |
//! | `e_relay_reset ← 1` | `e_status ← 0`, `e_stop ← 0` |
//! | `hb_set ← 1` | `hb_ack ← 1` |
//! | `dome_error_reset ← 1` | `drive_error ← 0` |
//! | `drive_enabled ← 1` | dome motion, when enabled with [`PlcSimulator::with_dome_motion`] |
//! | `drive_enabled ← 0` | aborts a simulated motion |

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, error, info};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_modbus::prelude::*;
use tokio_modbus::server::tcp::{accept_tcp_connection, Server};

use super::register::{BlockType, Decoder, RawData, Register, RegisterValue};
use crate::config::ModbusConfig;
use crate::error::ModbusError;

/// Number of requests served, per function.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionCounts {
    pub read_coils: usize,
    pub read_discrete_inputs: usize,
    pub read_holding_registers: usize,
    pub read_input_registers: usize,
    pub write_single_coil: usize,
    pub write_multiple_coils: usize,
    pub write_single_register: usize,
    pub write_multiple_registers: usize,
}

impl TransactionCounts {
    /// Total number of read requests.
    pub fn reads(&self) -> usize {
        self.read_coils
            + self.read_discrete_inputs
            + self.read_holding_registers
            + self.read_input_registers
    }

    /// Total number of write requests.
    pub fn writes(&self) -> usize {
        self.write_single_coil
            + self.write_multiple_coils
            + self.write_single_register
            + self.write_multiple_registers
    }

    /// Total number of requests.
    pub fn total(&self) -> usize {
        self.reads() + self.writes()
    }
}

/// A write received over the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    /// Register name, or `block@address` for unnamed addresses.
    pub register: String,
    pub value: RegisterValue,
}

#[derive(Debug, Default)]
struct Memory {
    coils: Vec<bool>,
    discrete_inputs: Vec<bool>,
    holding_registers: Vec<u16>,
    input_registers: Vec<u16>,
}

impl Memory {
    fn bits_mut(&mut self, block: BlockType) -> Option<&mut Vec<bool>> {
        match block {
            BlockType::Coil => Some(&mut self.coils),
            BlockType::DiscreteInput => Some(&mut self.discrete_inputs),
            _ => None,
        }
    }

    fn words_mut(&mut self, block: BlockType) -> Option<&mut Vec<u16>> {
        match block {
            BlockType::HoldingRegister => Some(&mut self.holding_registers),
            BlockType::InputRegister => Some(&mut self.input_registers),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct SimulatorState {
    registers: HashMap<String, Register>,
    memory: Mutex<Memory>,
    counts: Mutex<TransactionCounts>,
    writes: Mutex<Vec<WriteRecord>>,
    exceptions: Mutex<HashMap<String, ExceptionCode>>,
    dome_move_time: Mutex<Option<Duration>>,
    motion: Mutex<Option<JoinHandle<()>>>,
    response_delay: Mutex<Option<Duration>>,
}

/// A Modbus/TCP server emulating the enclosure PLC.
#[derive(Debug, Clone)]
pub struct PlcSimulator {
    state: Arc<SimulatorState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Read `cnt` elements starting at `addr`, or fail if the range is out of bounds.
fn block_read<T: Copy>(block: &[T], addr: u16, cnt: u16) -> Result<Vec<T>, ExceptionCode> {
    let start = usize::from(addr);
    let end = start + usize::from(cnt);
    match block.get(start..end) {
        Some(values) if cnt > 0 => Ok(values.to_vec()),
        _ => {
            error!("SIMULATOR: Exception::IllegalDataAddress reading {cnt} at {addr}");
            Err(ExceptionCode::IllegalDataAddress)
        }
    }
}

/// Write `values` starting at `addr`, or fail if the range is out of bounds.
fn block_write<T: Copy>(block: &mut [T], addr: u16, values: &[T]) -> Result<(), ExceptionCode> {
    let start = usize::from(addr);
    let end = start + values.len();
    match block.get_mut(start..end) {
        Some(slots) => {
            slots.copy_from_slice(values);
            Ok(())
        }
        None => {
            error!(
                "SIMULATOR: Exception::IllegalDataAddress writing {} at {addr}",
                values.len()
            );
            Err(ExceptionCode::IllegalDataAddress)
        }
    }
}

impl PlcSimulator {
    /// Create a simulator serving the registers of `config`, all set to zero.
    pub fn new(config: &ModbusConfig) -> Self {
        let registers: HashMap<String, Register> = config
            .registers
            .iter()
            .map(|(name, register)| (name.clone(), Register::from_config(name, register)))
            .collect();

        let size = |block: BlockType| {
            registers
                .values()
                .filter(|r| r.block == block)
                .map(|r| r.end_address() as usize + 1)
                .max()
                .unwrap_or(0)
        };

        let memory = Memory {
            coils: vec![false; size(BlockType::Coil)],
            discrete_inputs: vec![false; size(BlockType::DiscreteInput)],
            holding_registers: vec![0; size(BlockType::HoldingRegister)],
            input_registers: vec![0; size(BlockType::InputRegister)],
        };

        Self {
            state: Arc::new(SimulatorState {
                registers,
                memory: Mutex::new(memory),
                counts: Mutex::new(TransactionCounts::default()),
                writes: Mutex::new(Vec::new()),
                exceptions: Mutex::new(HashMap::new()),
                dome_move_time: Mutex::new(None),
                motion: Mutex::new(None),
                response_delay: Mutex::new(None),
            }),
        }
    }

    /// Emulate the dome drive. A move completes `move_time` after the drive is enabled.
    pub fn with_dome_motion(self, move_time: Duration) -> Self {
        *lock(&self.state.dome_move_time) = Some(move_time);
        self
    }

    /// Set a register directly, bypassing the protocol. Works for read-only blocks too.
    pub fn set(&self, name: &str, value: impl Into<RegisterValue>) -> Result<(), ModbusError> {
        let register = self.register(name)?;
        let mut memory = lock(&self.state.memory);
        set_register(&mut memory, register, &value.into())
    }

    /// Current value of a register.
    pub fn get(&self, name: &str) -> Result<RegisterValue, ModbusError> {
        let register = self.register(name)?;
        let mut memory = lock(&self.state.memory);
        get_register(&mut memory, register)
    }

    /// Requests served so far.
    pub fn counts(&self) -> TransactionCounts {
        *lock(&self.state.counts)
    }

    /// Every write received over the wire, oldest first.
    pub fn writes(&self) -> Vec<WriteRecord> {
        lock(&self.state.writes).clone()
    }

    /// Writes received for one register.
    pub fn writes_to(&self, name: &str) -> Vec<RegisterValue> {
        lock(&self.state.writes)
            .iter()
            .filter(|record| record.register == name)
            .map(|record| record.value.clone())
            .collect()
    }

    /// Answer every request touching `name` with `code`.
    pub fn inject_exception(&self, name: &str, code: ExceptionCode) {
        lock(&self.state.exceptions).insert(name.to_string(), code);
    }

    /// Hold every response for `delay`, or answer at once with `None`.
    pub fn set_response_delay(&self, delay: Option<Duration>) {
        *lock(&self.state.response_delay) = delay;
    }

    /// Remove all injected exceptions.
    pub fn clear_exceptions(&self) {
        lock(&self.state.exceptions).clear();
    }

    fn register(&self, name: &str) -> Result<&Register, ModbusError> {
        self.state
            .registers
            .get(name)
            .ok_or_else(|| ModbusError::UnknownRegister(name.to_string()))
    }

    /// Serve Modbus/TCP clients on `listener` until the task is aborted.
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        let server = Server::new(listener);

        let on_connected = move |stream, socket_addr| {
            let service = self.clone();
            async move { accept_tcp_connection(stream, socket_addr, move |_| Ok(Some(service.clone()))) }
        };

        let on_process_error = |err| {
            error!("Simulator error: {err}");
        };

        server.serve(&on_connected, on_process_error).await?;
        Ok(())
    }

    /// Bind `address` and serve in a background task.
    ///
    /// Returns the bound address, which differs from `address` when port 0 is used.
    pub async fn start(self, address: SocketAddr) -> anyhow::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(address).await?;
        let local_addr = listener.local_addr()?;
        info!("PLC simulator listening on {}", local_addr);

        let handle = tokio::spawn(async move {
            if let Err(e) = self.serve(listener).await {
                error!("Simulator error: {}", e);
            }
        });

        Ok((local_addr, handle))
    }

    fn handle(&self, req: Request<'static>) -> Result<Response, ExceptionCode> {
        self.count(&req);
        self.check_injected(&req)?;

        let state = &self.state;
        match req {
            Request::ReadCoils(addr, cnt) => {
                block_read(&lock(&state.memory).coils, addr, cnt).map(Response::ReadCoils)
            }
            Request::ReadDiscreteInputs(addr, cnt) => {
                block_read(&lock(&state.memory).discrete_inputs, addr, cnt)
                    .map(Response::ReadDiscreteInputs)
            }
            Request::ReadHoldingRegisters(addr, cnt) => {
                block_read(&lock(&state.memory).holding_registers, addr, cnt)
                    .map(Response::ReadHoldingRegisters)
            }
            Request::ReadInputRegisters(addr, cnt) => {
                block_read(&lock(&state.memory).input_registers, addr, cnt)
                    .map(Response::ReadInputRegisters)
            }
            Request::WriteSingleCoil(addr, value) => {
                self.write_bits(addr, std::slice::from_ref(&value))?;
                Ok(Response::WriteSingleCoil(addr, value))
            }
            Request::WriteMultipleCoils(addr, values) => {
                self.write_bits(addr, &values)?;
                Ok(Response::WriteMultipleCoils(addr, values.len() as u16))
            }
            Request::WriteSingleRegister(addr, value) => {
                self.write_words(addr, std::slice::from_ref(&value))?;
                Ok(Response::WriteSingleRegister(addr, value))
            }
            Request::WriteMultipleRegisters(addr, values) => {
                self.write_words(addr, &values)?;
                Ok(Response::WriteMultipleRegisters(addr, values.len() as u16))
            }
            _ => {
                error!(
                    "SIMULATOR: Exception::IllegalFunction - Unimplemented function code in request: {req:?}"
                );
                Err(ExceptionCode::IllegalFunction)
            }
        }
    }

    fn count(&self, req: &Request<'static>) {
        let mut counts = lock(&self.state.counts);
        match req {
            Request::ReadCoils(..) => counts.read_coils += 1,
            Request::ReadDiscreteInputs(..) => counts.read_discrete_inputs += 1,
            Request::ReadHoldingRegisters(..) => counts.read_holding_registers += 1,
            Request::ReadInputRegisters(..) => counts.read_input_registers += 1,
            Request::WriteSingleCoil(..) => counts.write_single_coil += 1,
            Request::WriteMultipleCoils(..) => counts.write_multiple_coils += 1,
            Request::WriteSingleRegister(..) => counts.write_single_register += 1,
            Request::WriteMultipleRegisters(..) => counts.write_multiple_registers += 1,
            _ => {}
        }
    }

    fn check_injected(&self, req: &Request<'static>) -> Result<(), ExceptionCode> {
        let (block, addr, cnt) = match req {
            Request::ReadCoils(addr, cnt) => (BlockType::Coil, *addr, *cnt),
            Request::ReadDiscreteInputs(addr, cnt) => (BlockType::DiscreteInput, *addr, *cnt),
            Request::ReadHoldingRegisters(addr, cnt) => (BlockType::HoldingRegister, *addr, *cnt),
            Request::ReadInputRegisters(addr, cnt) => (BlockType::InputRegister, *addr, *cnt),
            Request::WriteSingleCoil(addr, _) => (BlockType::Coil, *addr, 1),
            Request::WriteMultipleCoils(addr, values) => {
                (BlockType::Coil, *addr, values.len() as u16)
            }
            Request::WriteSingleRegister(addr, _) => (BlockType::HoldingRegister, *addr, 1),
            Request::WriteMultipleRegisters(addr, values) => {
                (BlockType::HoldingRegister, *addr, values.len() as u16)
            }
            _ => return Ok(()),
        };

        let exceptions = lock(&self.state.exceptions);
        let first = u32::from(addr);
        let last = first + u32::from(cnt.max(1)) - 1;
        for (name, code) in exceptions.iter() {
            if let Some(register) = self.state.registers.get(name) {
                if register.block == block
                    && u32::from(register.address) <= last
                    && register.end_address() >= first
                {
                    debug!("SIMULATOR: injecting {:?} for {}", code, name);
                    return Err(*code);
                }
            }
        }
        Ok(())
    }

    fn register_at(&self, block: BlockType, addr: u16) -> Option<&Register> {
        self.state
            .registers
            .values()
            .find(|r| r.block == block && r.address == addr)
    }

    fn write_bits(&self, addr: u16, values: &[bool]) -> Result<(), ExceptionCode> {
        {
            let mut memory = lock(&self.state.memory);
            block_write(&mut memory.coils, addr, values)?;
        }

        for (offset, value) in values.iter().enumerate() {
            let address = addr + offset as u16;
            let name = match self.register_at(BlockType::Coil, address) {
                Some(register) => register.name.clone(),
                None => format!("{}@{}", BlockType::Coil, address),
            };
            self.log_write(&name, RegisterValue::Bool(*value));
            self.apply_rules(&name, *value);
        }
        Ok(())
    }

    fn write_words(&self, addr: u16, values: &[u16]) -> Result<(), ExceptionCode> {
        {
            let mut memory = lock(&self.state.memory);
            block_write(&mut memory.holding_registers, addr, values)?;
        }

        match self.register_at(BlockType::HoldingRegister, addr) {
            Some(register) => {
                let value = register
                    .decode(RawData::Words(values.to_vec()))
                    .unwrap_or_else(|_| RegisterValue::Words(values.to_vec()));
                let name = register.name.clone();
                let active = value.as_bool();
                self.log_write(&name, value);
                self.apply_rules(&name, active);
            }
            None => self.log_write(
                &format!("{}@{}", BlockType::HoldingRegister, addr),
                RegisterValue::Words(values.to_vec()),
            ),
        }
        Ok(())
    }

    fn log_write(&self, register: &str, value: RegisterValue) {
        debug!("SIMULATOR: {} <- {}", register, value);
        lock(&self.state.writes).push(WriteRecord {
            register: register.to_string(),
            value,
        });
    }

    /// Set a named register if it exists. Rules silently skip missing registers.
    fn set_named(&self, name: &str, value: bool) {
        if let Some(register) = self.state.registers.get(name) {
            let mut memory = lock(&self.state.memory);
            if let Err(err) = set_register(&mut memory, register, &RegisterValue::Bool(value)) {
                error!("SIMULATOR: failed to set {}: {}", name, err);
            }
        }
    }

    fn get_named(&self, name: &str) -> bool {
        self.state
            .registers
            .get(name)
            .and_then(|register| get_register(&mut lock(&self.state.memory), register).ok())
            .is_some_and(|value| value.as_bool())
    }

    fn apply_rules(&self, name: &str, value: bool) {
        match (name, value) {
            ("e_stop", true) => self.set_named("e_status", true),
            ("e_relay_reset", true) => {
                self.set_named("e_status", false);
                self.set_named("e_stop", false);
            }
            ("hb_set", true) => self.set_named("hb_ack", true),
            ("dome_error_reset", true) => self.set_named("drive_error", false),
            ("drive_enabled", true) => self.start_motion(),
            ("drive_enabled", false) => self.abort_motion(),
            _ => {}
        }
    }

    fn start_motion(&self) {
        let Some(move_time) = *lock(&self.state.dome_move_time) else {
            return;
        };

        self.abort_motion();
        self.set_named("dome_open", false);
        self.set_named("dome_closed", false);

        let simulator = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(move_time).await;
            let opening = simulator.get_named("motor_direction");
            let limit = if opening { "dome_open" } else { "dome_closed" };
            debug!("SIMULATOR: dome reached {}", limit);
            simulator.set_named(limit, true);
            simulator.set_named("drive_enabled", false);
        });

        *lock(&self.state.motion) = Some(task);
    }

    fn abort_motion(&self) {
        if let Some(task) = lock(&self.state.motion).take() {
            if !task.is_finished() {
                debug!("SIMULATOR: dome motion aborted");
            }
            task.abort();
        }
    }
}

fn set_register(
    memory: &mut Memory,
    register: &Register,
    value: &RegisterValue,
) -> Result<(), ModbusError> {
    let invalid = || ModbusError::InvalidValue {
        register: register.name.clone(),
        reason: "address outside the simulated block".to_string(),
    };

    if register.block.is_bit() {
        let bits = match value {
            RegisterValue::Bits(bits) => bits.clone(),
            other => vec![other.as_bool()],
        };
        let block = memory.bits_mut(register.block).ok_or_else(invalid)?;
        block_write(block, register.address, &bits).map_err(|_| invalid())
    } else {
        let words = match (register.decoder, value) {
            (Some(Decoder::Float32), _) | (None, RegisterValue::Words(_)) => {
                register.encode_words(value)?
            }
            (None, other) => vec![other.as_f64().map(|v| v as u16).unwrap_or(0)],
        };
        let block = memory.words_mut(register.block).ok_or_else(invalid)?;
        block_write(block, register.address, &words).map_err(|_| invalid())
    }
}

fn get_register(memory: &mut Memory, register: &Register) -> Result<RegisterValue, ModbusError> {
    let raw = if register.block.is_bit() {
        memory
            .bits_mut(register.block)
            .and_then(|block| block_read(block, register.address, register.count).ok())
            .map(RawData::Bits)
    } else {
        memory
            .words_mut(register.block)
            .and_then(|block| block_read(block, register.address, register.count).ok())
            .map(RawData::Words)
    };

    match raw {
        Some(raw) => register.decode(raw),
        None => Err(ModbusError::InvalidValue {
            register: register.name.clone(),
            reason: "address outside the simulated block".to_string(),
        }),
    }
}

impl tokio_modbus::server::Service for PlcSimulator {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Exception>> + Send>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        debug!("SIMULATOR: received {:?}", req);
        let response = self.handle(req);
        let delay = *lock(&self.state.response_delay);
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegisterConfig;

    fn config() -> ModbusConfig {
        let mut config = ModbusConfig::default();
        config.registers.clear();
        let mut add = |name: &str, address, mode, count, decoder| {
            config.registers.insert(
                name.to_string(),
                RegisterConfig {
                    address,
                    mode,
                    count,
                    group: None,
                    decoder,
                    readonly: false,
                },
            );
        };
        add("e_stop", 2, BlockType::Coil, 1, None);
        add("e_relay_reset", 3, BlockType::Coil, 1, None);
        add("e_status", 4, BlockType::DiscreteInput, 1, None);
        add("position", 10, BlockType::HoldingRegister, 2, Some(Decoder::Float32));
        config
    }

    #[test]
    fn test_blocks_are_dense_up_to_highest_address() {
        let simulator = PlcSimulator::new(&config());
        let memory = lock(&simulator.state.memory);
        assert_eq!(memory.coils.len(), 4);
        assert_eq!(memory.discrete_inputs.len(), 5);
        assert_eq!(memory.holding_registers.len(), 12);
        assert!(memory.input_registers.is_empty());
    }

    #[test]
    fn test_out_of_range_read_is_illegal_address() {
        let simulator = PlcSimulator::new(&config());
        assert!(matches!(
            simulator.handle(Request::ReadCoils(0, 5)),
            Err(ExceptionCode::IllegalDataAddress)
        ));
        assert!(simulator.handle(Request::ReadCoils(0, 4)).is_ok());
    }

    #[test]
    fn test_e_stop_rules() {
        let simulator = PlcSimulator::new(&config());
        simulator.handle(Request::WriteSingleCoil(2, true)).unwrap();
        assert_eq!(simulator.get("e_status").unwrap(), RegisterValue::Bool(true));

        simulator.handle(Request::WriteSingleCoil(3, true)).unwrap();
        assert_eq!(simulator.get("e_status").unwrap(), RegisterValue::Bool(false));
        assert_eq!(simulator.get("e_stop").unwrap(), RegisterValue::Bool(false));

        assert_eq!(simulator.counts().write_single_coil, 2);
        assert_eq!(simulator.writes_to("e_stop"), vec![RegisterValue::Bool(true)]);
    }

    #[test]
    fn test_float_register_round_trip() {
        let simulator = PlcSimulator::new(&config());
        simulator.set("position", 512.25f32).unwrap();
        assert_eq!(
            simulator.get("position").unwrap(),
            RegisterValue::Float(512.25)
        );
    }

    #[test]
    fn test_injected_exception() {
        let simulator = PlcSimulator::new(&config());
        simulator.inject_exception("e_status", ExceptionCode::ServerDeviceFailure);
        assert!(matches!(
            simulator.handle(Request::ReadDiscreteInputs(0, 5)),
            Err(ExceptionCode::ServerDeviceFailure)
        ));
        simulator.clear_exceptions();
        assert!(simulator.handle(Request::ReadDiscreteInputs(0, 5)).is_ok());
    }
}
