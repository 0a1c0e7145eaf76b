//! Per-connection RSP state machine
//!
//! [`SessionDispatcher`] decodes each received packet into a
//! [`Command`](crate::rsp::Command), drives the target, the hardware
//! breakpoint allocator and the flash staging area, and sends the reply.
//! It outlives individual connections so that persistent (extended-remote)
//! mode can hand the same target to the next client.

use super::documents::{self, TARGET_XML};
use super::monitor::{self, MonitorVerb};
use super::registers::{self, GENERAL_REGISTERS};
use crate::config::Config;
use crate::debugger::{
    ChipProfile, CoreRegister, FlashDriver, HardwareResourceAllocator, Target, TargetStatus,
    WatchFunction,
};
use crate::error::{BreakpointError, TargetError, TransportError};
use crate::flash::FlashStagingArea;
use crate::rsp::codec;
use crate::rsp::{BreakpointKind, Command, Connection, PacketTransport};
use crate::semihosting::{ConsoleSemihosting, Semihosting, BKPT_SEMIHOSTING};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Stop reply: halted on SIGTRAP
const STOP_TRAP: &[u8] = b"S05";
const OK: &[u8] = b"OK";
/// Rejected request: allocation, staging or register lookup failure
const ERR_REJECTED: &[u8] = b"E00";
const ERR_MALFORMED: &[u8] = b"E01";
const ERR_FLASH_COMMIT: &[u8] = b"E08";
/// Target did not complete a memory or register access
const ERR_ACCESS: &[u8] = b"E0e";

/// Where the session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    WaitingClient,
    Attached,
    Running,
    Halted,
    Killed,
}

/// Whether the connection continues after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Disconnect,
}

/// Tunables taken from the configuration at startup
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub packet_size: usize,
    pub max_transfer_size: usize,
    pub poll_interval: Duration,
    pub reset_on_connect: bool,
    pub persistent: bool,
    pub semihosting: bool,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            packet_size: config.session.packet_size,
            max_transfer_size: config.session.max_transfer_size,
            poll_interval: Duration::from_millis(config.server.poll_interval_ms),
            reset_on_connect: config.debugger.reset_on_connect,
            persistent: config.server.persistent,
            semihosting: config.semihosting.enabled,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// The RSP command dispatcher for one target
pub struct SessionDispatcher<T> {
    target: T,
    chip: ChipProfile,
    settings: SessionSettings,
    breakpoints: HardwareResourceAllocator,
    flash: FlashStagingArea,
    semihosting: Box<dyn Semihosting + Send>,
    semihosting_enabled: bool,
    attached: bool,
    persistent: bool,
    state: RunState,
}

impl<T: Target + FlashDriver> SessionDispatcher<T> {
    pub fn new(target: T, chip: ChipProfile, settings: SessionSettings) -> Self {
        Self {
            target,
            chip,
            semihosting_enabled: settings.semihosting,
            persistent: settings.persistent,
            settings,
            breakpoints: HardwareResourceAllocator::new(),
            flash: FlashStagingArea::new(),
            semihosting: Box::new(ConsoleSemihosting::new()),
            attached: false,
            state: RunState::WaitingClient,
        }
    }

    /// Replace the console semihosting handler.
    pub fn with_semihosting(mut self, semihosting: Box<dyn Semihosting + Send>) -> Self {
        self.semihosting = semihosting;
        self
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut T {
        &mut self.target
    }

    pub fn into_target(self) -> T {
        self.target
    }

    pub fn chip(&self) -> &ChipProfile {
        &self.chip
    }

    pub fn allocator(&self) -> &HardwareResourceAllocator {
        &self.breakpoints
    }

    pub fn staging(&self) -> &FlashStagingArea {
        &self.flash
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn semihosting_enabled(&self) -> bool {
        self.semihosting_enabled
    }

    /// Prepare the target for a newly accepted client.
    pub fn begin_connection(&mut self) -> Result<(), TargetError> {
        self.persistent = self.settings.persistent;
        self.flash.discard();

        if self.settings.reset_on_connect {
            self.target.reset()?;
        }
        self.target.halt()?;
        self.breakpoints
            .reset(&mut self.target)
            .map_err(into_target_error)?;

        self.attached = true;
        self.state = RunState::Attached;
        info!(
            "Client attached to {} ({} code comparators)",
            self.chip.name,
            self.breakpoints.breakpoints().len()
        );
        Ok(())
    }

    /// Return to the idle state once the client is gone.
    pub fn end_connection(&mut self) {
        self.attached = false;
        self.flash.discard();
        self.state = if self.persistent {
            RunState::WaitingClient
        } else {
            RunState::Killed
        };
    }

    /// Exchange packets until the client detaches, kills or disconnects.
    ///
    /// A closed connection is a normal end of session; other transport
    /// failures are returned.
    pub fn serve<C: Connection>(
        &mut self,
        transport: &mut PacketTransport<C>,
    ) -> Result<(), TransportError> {
        let result = loop {
            let flow = transport
                .receive()
                .and_then(|packet| self.handle_packet(&packet, transport));
            match flow {
                Ok(Flow::Continue) => {}
                Ok(Flow::Disconnect) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        match result {
            Err(TransportError::ConnectionClosed) => {
                info!("Client closed the connection");
                Ok(())
            }
            other => other,
        }
    }

    /// Decode and answer one packet.
    pub fn handle_packet<C: Connection>(
        &mut self,
        packet: &[u8],
        transport: &mut PacketTransport<C>,
    ) -> Result<Flow, TransportError> {
        let command = match Command::parse(packet) {
            Ok(command) => command,
            Err(e) => {
                warn!("{}", e);
                transport.send(ERR_MALFORMED)?;
                return Ok(Flow::Continue);
            }
        };

        match command {
            Command::Continue(address) => {
                let reply = self.continue_execution(address, transport)?;
                transport.send(&reply)?;
                Ok(Flow::Continue)
            }
            Command::Detach => {
                transport.send(OK)?;
                info!("Client detached, resuming target");
                if let Err(e) = self.target.resume() {
                    warn!("Failed to resume target on detach: {}", e);
                }
                self.attached = false;
                self.state = RunState::Running;
                Ok(Flow::Disconnect)
            }
            Command::Kill => {
                info!("Kill request");
                self.attached = false;
                self.state = RunState::Killed;
                Ok(Flow::Disconnect)
            }
            Command::VKill => {
                transport.send(OK)?;
                info!("Kill request");
                self.attached = false;
                self.state = RunState::Killed;
                Ok(Flow::Disconnect)
            }
            other => {
                if let Some(reply) = self.execute(other) {
                    transport.send(&reply)?;
                }
                Ok(Flow::Continue)
            }
        }
    }

    /// Run a command that completes without polling the connection.
    /// `None` means the command has no reply.
    fn execute(&mut self, command: Command) -> Option<Vec<u8>> {
        let reply = match command {
            Command::ReadRegisters => self.read_general_registers(),
            Command::WriteRegisters(data) => self.write_general_registers(&data),
            Command::ReadRegister(index) => self.read_register(index),
            Command::WriteRegister { index, value } => self.write_register(index, value),
            Command::ReadMemory { address, length } => self.read_memory(address, length),
            Command::WriteMemory { address, data } => self.write_memory(address, &data),
            Command::Step(address) => self.step(address),
            Command::HaltReason => STOP_TRAP.to_vec(),
            Command::Restart => {
                info!("Restart requested");
                if let Err(e) = self.reset_target(false) {
                    error!("Restart failed: {}", e);
                }
                return None;
            }
            Command::ExtendedMode => {
                debug!("Extended mode enabled");
                self.persistent = true;
                OK.to_vec()
            }
            Command::InsertBreakpoint { kind, address, length } => {
                self.insert_breakpoint(kind, address, length)
            }
            Command::RemoveBreakpoint { kind, address, .. } => {
                self.remove_breakpoint(kind, address)
            }
            Command::FlashErase { address, length } => {
                match self.flash.declare_block(&self.chip, address, length) {
                    Ok(()) => OK.to_vec(),
                    Err(e) => {
                        warn!("{}", e);
                        ERR_REJECTED.to_vec()
                    }
                }
            }
            Command::FlashWrite { address, data } => match self.flash.populate(address, &data) {
                Ok(_) => OK.to_vec(),
                Err(e) => {
                    warn!("{}", e);
                    ERR_REJECTED.to_vec()
                }
            },
            Command::FlashDone => self.commit_flash(),
            Command::Supported => format!(
                "PacketSize={:x};qXfer:memory-map:read+;qXfer:features:read+",
                self.settings.packet_size
            )
            .into_bytes(),
            Command::ReadXfer { object, annex, offset, length } => {
                match (object.as_str(), annex.as_str()) {
                    ("memory-map", "") => {
                        let map = self.chip.memory_map_document();
                        documents::xfer_window(map.as_bytes(), offset, length)
                    }
                    ("features", "target.xml") => {
                        documents::xfer_window(TARGET_XML.as_bytes(), offset, length)
                    }
                    _ => {
                        debug!("No qXfer document {}:{}", object, annex);
                        ERR_REJECTED.to_vec()
                    }
                }
            }
            Command::MonitorCommand(line) => self.monitor(&line),
            Command::Attached => vec![if self.attached { b'1' } else { b'0' }],
            Command::CurrentThread => b"QC1".to_vec(),
            Command::ThreadInfoFirst => b"m1".to_vec(),
            Command::ThreadInfoNext => b"l".to_vec(),
            Command::SetThread | Command::ThreadAlive => OK.to_vec(),
            Command::Unsupported => Vec::new(),
            Command::Continue(_) | Command::Detach | Command::Kill | Command::VKill => {
                unreachable!("handled with connection access")
            }
        };
        Some(reply)
    }

    fn read_general_registers(&mut self) -> Vec<u8> {
        let mut reply = String::with_capacity(GENERAL_REGISTERS as usize * 8);
        for index in 0..GENERAL_REGISTERS {
            match self.target.read_register(CoreRegister::General(index as u8)) {
                Ok(value) => reply.push_str(&codec::encode_u32_le(value)),
                Err(e) => {
                    warn!("Reading r{} failed: {}", index, e);
                    return ERR_ACCESS.to_vec();
                }
            }
        }
        reply.into_bytes()
    }

    fn write_general_registers(&mut self, data: &[u8]) -> Vec<u8> {
        if data.len() < GENERAL_REGISTERS as usize * 4 {
            warn!("G packet carries only {} bytes", data.len());
            return ERR_MALFORMED.to_vec();
        }
        for (index, word) in data.chunks_exact(4).take(GENERAL_REGISTERS as usize).enumerate() {
            let value = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            if let Err(e) = self.target.write_register(CoreRegister::General(index as u8), value) {
                warn!("Writing r{} failed: {}", index, e);
                return ERR_ACCESS.to_vec();
            }
        }
        OK.to_vec()
    }

    fn read_register(&mut self, index: u32) -> Vec<u8> {
        let Some(reg) = registers::core_register(index) else {
            debug!("{}", TargetError::InvalidRegister(index));
            return ERR_REJECTED.to_vec();
        };
        match self.target.read_register(reg) {
            Ok(value) => codec::encode_u32_le(value).into_bytes(),
            Err(e) => {
                warn!("Reading {:?} failed: {}", reg, e);
                ERR_ACCESS.to_vec()
            }
        }
    }

    fn write_register(&mut self, index: u32, value: u32) -> Vec<u8> {
        let Some(reg) = registers::core_register(index) else {
            debug!("{}", TargetError::InvalidRegister(index));
            return ERR_REJECTED.to_vec();
        };
        match self.target.write_register(reg, value) {
            Ok(()) => OK.to_vec(),
            Err(e) => {
                warn!("Writing {:?} failed: {}", reg, e);
                ERR_ACCESS.to_vec()
            }
        }
    }

    fn read_memory(&mut self, address: u32, length: u32) -> Vec<u8> {
        // Hex doubles the size; a short read keeps the reply within PacketSize.
        let max_read = (self.settings.packet_size.saturating_sub(1) / 2) as u32;
        if length > max_read {
            debug!("Read of {} bytes at 0x{:08x} clamped to {}", length, address, max_read);
        }
        let length = length.min(max_read);
        if address as u64 + length as u64 > 1 << 32 {
            return ERR_MALFORMED.to_vec();
        }
        let mut data = Vec::with_capacity(length as usize);
        let chunk = self.settings.max_transfer_size.max(4);
        let mut offset = 0usize;
        while offset < length as usize {
            let len = chunk.min(length as usize - offset);
            match read_split(&mut self.target, address + offset as u32, len) {
                Ok(bytes) => data.extend_from_slice(&bytes),
                Err(e) => {
                    warn!("Memory read at 0x{:08x} failed: {}", address + offset as u32, e);
                    return ERR_ACCESS.to_vec();
                }
            }
            offset += len;
        }
        codec::encode_hex(&data).into_bytes()
    }

    fn write_memory(&mut self, address: u32, data: &[u8]) -> Vec<u8> {
        if address as u64 + data.len() as u64 > 1 << 32 {
            return ERR_MALFORMED.to_vec();
        }
        let chunk = self.settings.max_transfer_size.max(4);
        for (i, part) in data.chunks(chunk).enumerate() {
            let at = address + (i * chunk) as u32;
            if let Err(e) = write_split(&mut self.target, at, part) {
                warn!("Memory write at 0x{:08x} failed: {}", at, e);
                return ERR_ACCESS.to_vec();
            }
        }
        OK.to_vec()
    }

    fn step(&mut self, address: Option<u32>) -> Vec<u8> {
        let result = address
            .map(|pc| self.target.write_register(CoreRegister::PC, pc))
            .transpose()
            .and_then(|_| self.target.step());
        if let Err(e) = result {
            warn!("Step failed: {}", e);
        }
        self.state = RunState::Halted;
        STOP_TRAP.to_vec()
    }

    fn insert_breakpoint(&mut self, kind: BreakpointKind, address: u32, length: u32) -> Vec<u8> {
        let result = match watch_function(kind) {
            // Flash-resident code cannot take software breakpoints.
            None => self.breakpoints.set_breakpoint(&mut self.target, address),
            Some(function) => {
                self.breakpoints
                    .set_watchpoint(&mut self.target, function, address, length)
            }
        };
        match result {
            Ok(_) => OK.to_vec(),
            Err(e) => {
                warn!("Cannot insert {:?} at 0x{:08x}: {}", kind, address, e);
                ERR_REJECTED.to_vec()
            }
        }
    }

    fn remove_breakpoint(&mut self, kind: BreakpointKind, address: u32) -> Vec<u8> {
        let result = match watch_function(kind) {
            None => self.breakpoints.clear_breakpoint(&mut self.target, address),
            Some(_) => self.breakpoints.clear_watchpoint(&mut self.target, address),
        };
        match result {
            Ok(()) => OK.to_vec(),
            Err(e) => {
                warn!("Cannot remove {:?} at 0x{:08x}: {}", kind, address, e);
                ERR_REJECTED.to_vec()
            }
        }
    }

    fn commit_flash(&mut self) -> Vec<u8> {
        let target = &mut self.target;
        let result = self.flash.commit(&self.chip, |address, data| {
            target.erase_page(address)?;
            target.write(address, data)
        });

        match result {
            Ok(summary) => {
                info!("Programmed {} bytes of flash", summary.bytes);
                if let Err(e) = self.reset_target(false) {
                    error!("Reset after flashing failed: {}", e);
                }
                OK.to_vec()
            }
            Err(e) => {
                error!("{}", e);
                ERR_FLASH_COMMIT.to_vec()
            }
        }
    }

    /// Reset and halt the core, then clear the comparators the reset may
    /// have left behind.
    fn reset_target(&mut self, hard: bool) -> Result<(), BreakpointError> {
        if hard {
            self.target.hard_reset()?;
            self.target.halt()?;
        } else {
            self.target.reset()?;
        }
        self.breakpoints.reset(&mut self.target)?;
        self.state = RunState::Halted;
        Ok(())
    }

    fn monitor(&mut self, line: &str) -> Vec<u8> {
        info!("Monitor command: {}", line);
        let result = match MonitorVerb::parse(line) {
            MonitorVerb::Resume => self.target.resume().map(|_| self.state = RunState::Running),
            MonitorVerb::Halt => self.target.halt().map(|_| self.state = RunState::Halted),
            MonitorVerb::Reset => self.reset_target(false).map_err(into_target_error),
            MonitorVerb::JtagReset => self.reset_target(true).map_err(into_target_error),
            MonitorVerb::Semihosting(enabled) => {
                info!("Semihosting {}", if enabled { "enabled" } else { "disabled" });
                self.semihosting_enabled = enabled;
                Ok(())
            }
            MonitorVerb::Unknown(verb) => {
                warn!("Unknown monitor command '{}'", verb);
                return codec::encode_hex(monitor::unknown_reply(&verb).as_bytes()).into_bytes();
            }
        };
        match result {
            Ok(()) => OK.to_vec(),
            Err(e) => {
                error!("Monitor command '{}' failed: {}", line, e);
                ERR_ACCESS.to_vec()
            }
        }
    }

    /// Resume and poll until the core halts or the debugger interrupts.
    fn continue_execution<C: Connection>(
        &mut self,
        address: Option<u32>,
        transport: &mut PacketTransport<C>,
    ) -> Result<Vec<u8>, TransportError> {
        let resumed = address
            .map(|pc| self.target.write_register(CoreRegister::PC, pc))
            .transpose()
            .and_then(|_| self.target.resume());
        if let Err(e) = resumed {
            warn!("Resume failed: {}", e);
            return Ok(ERR_ACCESS.to_vec());
        }
        self.state = RunState::Running;
        debug!("Target running");

        loop {
            if transport.poll_interrupt()? {
                info!("Interrupted by debugger, halting target");
                if let Err(e) = self.target.halt() {
                    error!("Halt failed: {}", e);
                }
                break;
            }

            match self.target.status() {
                Ok(TargetStatus::Halted) => match self.service_semihosting() {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        error!("Semihosting request failed: {}", e);
                        break;
                    }
                },
                Ok(TargetStatus::Running) => {}
                Err(e) => {
                    error!("Status query failed: {}", e);
                    if let Err(e) = self.target.halt() {
                        error!("Halt failed: {}", e);
                    }
                    break;
                }
            }

            thread::sleep(self.settings.poll_interval);
        }

        self.state = RunState::Halted;
        Ok(STOP_TRAP.to_vec())
    }

    /// Serve a semihosting request if the core halted on `BKPT 0xAB`.
    /// Returns true when the core was resumed.
    fn service_semihosting(&mut self) -> Result<bool, TargetError> {
        if !self.semihosting_enabled {
            return Ok(false);
        }
        let pc = self.target.read_register(CoreRegister::PC)?;
        let opcode = self.target.read_memory_u8(pc, 2)?;
        if opcode.len() != 2 || u16::from_le_bytes([opcode[0], opcode[1]]) != BKPT_SEMIHOSTING {
            return Ok(false);
        }

        let operation = self.target.read_register(CoreRegister::General(0))?;
        let parameter = self.target.read_register(CoreRegister::General(1))?;
        let result = self.semihosting.dispatch(&mut self.target, operation, parameter)?;
        debug!(
            "Semihosting op 0x{:02x} (0x{:08x}) -> 0x{:08x}",
            operation, parameter, result
        );

        self.target.write_register(CoreRegister::General(0), result)?;
        self.target.write_register(CoreRegister::PC, pc + 2)?;
        self.target.resume()?;
        Ok(true)
    }
}

fn into_target_error(error: BreakpointError) -> TargetError {
    match error {
        BreakpointError::Target(e) => e,
        other => TargetError::Probe(other.to_string()),
    }
}

/// DWT function for watchpoint kinds; `None` for code breakpoints.
fn watch_function(kind: BreakpointKind) -> Option<WatchFunction> {
    match kind {
        BreakpointKind::Software | BreakpointKind::Hardware => None,
        BreakpointKind::WriteWatch => Some(WatchFunction::Write),
        BreakpointKind::ReadWatch => Some(WatchFunction::Read),
        BreakpointKind::AccessWatch => Some(WatchFunction::Access),
    }
}

/// `[address, address + len)` as unaligned head, word-aligned middle and
/// unaligned tail, as `(start, length)` pairs.
fn split_aligned(address: u32, len: usize) -> [(u32, usize); 3] {
    let start = address as u64;
    let end = start + len as u64;
    let middle_start = ((start + 3) & !3).min(end);
    let middle_end = (end & !3).max(middle_start);
    [
        (address, (middle_start - start) as usize),
        (middle_start as u32, (middle_end - middle_start) as usize),
        (middle_end as u32, (end - middle_end) as usize),
    ]
}

fn read_split(target: &mut dyn Target, address: u32, len: usize) -> Result<Vec<u8>, TargetError> {
    let [head, middle, tail] = split_aligned(address, len);
    let mut data = Vec::with_capacity(len);
    if head.1 > 0 {
        data.extend(target.read_memory_u8(head.0, head.1)?);
    }
    if middle.1 > 0 {
        data.extend(target.read_memory(middle.0, middle.1)?);
    }
    if tail.1 > 0 {
        data.extend(target.read_memory_u8(tail.0, tail.1)?);
    }
    Ok(data)
}

fn write_split(target: &mut dyn Target, address: u32, data: &[u8]) -> Result<(), TargetError> {
    let [head, middle, tail] = split_aligned(address, data.len());
    if head.1 > 0 {
        target.write_memory_u8(head.0, &data[..head.1])?;
    }
    if middle.1 > 0 {
        target.write_memory(middle.0, &data[head.1..head.1 + middle.1])?;
    }
    if tail.1 > 0 {
        target.write_memory_u8(tail.0, &data[head.1 + middle.1..])?;
    }
    Ok(())
}
