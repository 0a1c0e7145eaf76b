//! Target backend driving a real chip through probe-rs

use super::chip::ChipProfile;
use super::discovery::ProbeDiscovery;
use super::target::{
    CoreIdentity, CoreRegister, FlashDriver, Target, TargetStatus, CPUID, DHCSR, DHCSR_DBGKEY,
};
use crate::config::DebuggerConfig;
use crate::error::{Result, ServerError, TargetError};
use probe_rs::flashing::DownloadOptions;
use probe_rs::probe::WireProtocol;
use probe_rs::{Core, CoreStatus, MemoryInterface, Permissions, RegisterId, Session};
use std::time::Duration;
use tracing::{debug, info};

/// DCRSR selector holding CONTROL, FAULTMASK, BASEPRI and PRIMASK, one byte each
const SPECIAL_REGISTERS: u16 = 0x14;

/// DCRSR REGSEL value for a core register
fn selector(reg: CoreRegister) -> u16 {
    match reg {
        CoreRegister::General(n) => n as u16,
        CoreRegister::Xpsr => 0x10,
        CoreRegister::Msp => 0x11,
        CoreRegister::Psp => 0x12,
        CoreRegister::Control
        | CoreRegister::FaultMask
        | CoreRegister::BasePri
        | CoreRegister::PriMask => SPECIAL_REGISTERS,
        CoreRegister::Fpscr => 0x21,
        CoreRegister::Float(n) => 0x40 + n as u16,
    }
}

/// Bit offset of a packed special register inside selector 0x14
fn packed_shift(reg: CoreRegister) -> Option<u32> {
    match reg {
        CoreRegister::PriMask => Some(0),
        CoreRegister::BasePri => Some(8),
        CoreRegister::FaultMask => Some(16),
        CoreRegister::Control => Some(24),
        _ => None,
    }
}

/// A probe-rs session on core 0 of the selected chip
pub struct ProbeTarget {
    session: Session,
    halt_timeout: Duration,
    verify_flash: bool,
}

impl ProbeTarget {
    /// Open the configured probe and attach to the chip
    pub fn attach(config: &DebuggerConfig, chip: &ChipProfile) -> Result<Self> {
        let probe_info = ProbeDiscovery::select(config.probe_serial.as_deref())?;

        info!("Opening probe: {}", probe_info.identifier);
        let mut probe = probe_info.open().map_err(|e| {
            ServerError::ConnectionFailed(format!(
                "Failed to open probe '{}': {}",
                probe_info.identifier, e
            ))
        })?;
        probe
            .select_protocol(WireProtocol::Swd)
            .map_err(|e| ServerError::ConnectionFailed(format!("SWD not available: {}", e)))?;
        let speed = probe
            .set_speed(config.speed_khz)
            .map_err(|e| ServerError::ConnectionFailed(format!("Failed to set speed: {}", e)))?;
        debug!("Probe speed set to {} kHz", speed);

        info!("Attaching to target: {}", chip.probe_rs_name);
        let session = if config.connect_under_reset {
            probe.attach_under_reset(chip.probe_rs_name.as_str(), Permissions::default())
        } else {
            probe.attach(chip.probe_rs_name.as_str(), Permissions::default())
        }
        .map_err(|e| {
            ServerError::ConnectionFailed(format!(
                "Failed to attach to target '{}': {}",
                chip.probe_rs_name, e
            ))
        })?;

        Ok(Self {
            session,
            halt_timeout: Duration::from_millis(config.halt_timeout_ms),
            verify_flash: config.verify_flash,
        })
    }

    fn core(&mut self) -> std::result::Result<Core<'_>, TargetError> {
        Ok(self.session.core(0)?)
    }

    /// Core 0, provided it is halted
    fn halted_core(&mut self) -> std::result::Result<Core<'_>, TargetError> {
        let mut core = self.core()?;
        if !core.core_halted()? {
            return Err(TargetError::NotHalted);
        }
        Ok(core)
    }
}

impl Target for ProbeTarget {
    fn core_identity(&mut self) -> std::result::Result<CoreIdentity, TargetError> {
        let cpuid = self.core()?.read_word_32(CPUID as u64)?;
        let identity = CoreIdentity::from_cpuid(cpuid);
        debug!("CPUID 0x{:08x}: {}", cpuid, identity);
        Ok(identity)
    }

    fn status(&mut self) -> std::result::Result<TargetStatus, TargetError> {
        match self.core()?.status()? {
            CoreStatus::Halted(_) => Ok(TargetStatus::Halted),
            _ => Ok(TargetStatus::Running),
        }
    }

    fn halt(&mut self) -> std::result::Result<(), TargetError> {
        let timeout = self.halt_timeout;
        self.core()?.halt(timeout)?;
        Ok(())
    }

    fn resume(&mut self) -> std::result::Result<(), TargetError> {
        self.core()?.run()?;
        Ok(())
    }

    fn step(&mut self) -> std::result::Result<(), TargetError> {
        self.halted_core()?.step()?;
        Ok(())
    }

    fn reset(&mut self) -> std::result::Result<(), TargetError> {
        let timeout = self.halt_timeout;
        self.core()?.reset_and_halt(timeout)?;
        Ok(())
    }

    fn hard_reset(&mut self) -> std::result::Result<(), TargetError> {
        let timeout = self.halt_timeout;
        let mut core = self.core()?;
        core.reset()?;
        core.halt(timeout)?;
        Ok(())
    }

    fn read_register(&mut self, reg: CoreRegister) -> std::result::Result<u32, TargetError> {
        let value: u32 = self.halted_core()?.read_core_reg(RegisterId(selector(reg)))?;
        Ok(match packed_shift(reg) {
            Some(shift) => (value >> shift) & 0xff,
            None => value,
        })
    }

    fn write_register(
        &mut self,
        reg: CoreRegister,
        value: u32,
    ) -> std::result::Result<(), TargetError> {
        let id = RegisterId(selector(reg));
        let mut core = self.halted_core()?;
        let value = match packed_shift(reg) {
            Some(shift) => {
                let packed: u32 = core.read_core_reg(id)?;
                (packed & !(0xff << shift)) | ((value & 0xff) << shift)
            }
            None => value,
        };
        core.write_core_reg(id, value)?;
        Ok(())
    }

    fn read_memory(
        &mut self,
        address: u32,
        len: usize,
    ) -> std::result::Result<Vec<u8>, TargetError> {
        let mut words = vec![0u32; len / 4];
        self.core()?.read_32(address as u64, &mut words)?;
        Ok(words.iter().flat_map(|word| word.to_le_bytes()).collect())
    }

    fn write_memory(&mut self, address: u32, data: &[u8]) -> std::result::Result<(), TargetError> {
        let words: Vec<u32> = data
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        self.core()?.write_32(address as u64, &words)?;
        Ok(())
    }

    fn read_memory_u8(
        &mut self,
        address: u32,
        len: usize,
    ) -> std::result::Result<Vec<u8>, TargetError> {
        let mut data = vec![0u8; len];
        self.core()?.read_8(address as u64, &mut data)?;
        Ok(data)
    }

    fn write_memory_u8(
        &mut self,
        address: u32,
        data: &[u8],
    ) -> std::result::Result<(), TargetError> {
        self.core()?.write_8(address as u64, data)?;
        Ok(())
    }

    fn read_debug_word(&mut self, address: u32) -> std::result::Result<u32, TargetError> {
        Ok(self.core()?.read_word_32(address as u64)?)
    }

    fn write_debug_word(
        &mut self,
        address: u32,
        value: u32,
    ) -> std::result::Result<(), TargetError> {
        self.core()?.write_word_32(address as u64, value)?;
        Ok(())
    }

    fn release(&mut self) -> std::result::Result<(), TargetError> {
        let mut core = self.core()?;
        core.run()?;
        core.write_word_32(DHCSR as u64, DHCSR_DBGKEY)?;
        info!("Target released from debug mode");
        Ok(())
    }
}

impl FlashDriver for ProbeTarget {
    fn erase_page(&mut self, address: u32) -> std::result::Result<(), TargetError> {
        // The flash loader erases every sector it programs during commit.
        debug!("Page 0x{:08x} will be erased by the flash loader", address);
        Ok(())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> std::result::Result<(), TargetError> {
        let mut loader = self.session.target().flash_loader();
        loader.add_data(address as u64, data).map_err(|e| {
            TargetError::Probe(format!("Flash data rejected at 0x{:08x}: {}", address, e))
        })?;

        let mut options = DownloadOptions::default();
        options.verify = self.verify_flash;
        options.keep_unwritten_bytes = true;
        loader
            .commit(&mut self.session, options)
            .map_err(|e| TargetError::Probe(format!("Flash programming failed: {}", e)))?;

        debug!("Programmed {} bytes at 0x{:08x}", data.len(), address);
        Ok(())
    }
}
