//! Narrow interfaces to the halted Cortex-M core and its flash controller
//!
//! The GDB session never talks to the probe directly. Everything it needs from
//! the hardware goes through [`Target`] and [`FlashDriver`], which keeps the
//! protocol logic testable against a simulated core.

use crate::error::TargetError;

/// CPUID register in the System Control Space
pub const CPUID: u32 = 0xE000_ED00;

/// Debug Halting Control and Status Register
pub const DHCSR: u32 = 0xE000_EDF0;

/// Writing this to DHCSR with every control bit clear takes the core out of debug mode.
pub const DHCSR_DBGKEY: u32 = 0xA05F_0000;

/// A Cortex-M core register as seen by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreRegister {
    /// r0-r15 (r13 = sp, r14 = lr, r15 = pc)
    General(u8),
    Xpsr,
    Msp,
    Psp,
    Control,
    FaultMask,
    BasePri,
    PriMask,
    /// s0-s31
    Float(u8),
    Fpscr,
}

impl CoreRegister {
    pub const SP: CoreRegister = CoreRegister::General(13);
    pub const LR: CoreRegister = CoreRegister::General(14);
    pub const PC: CoreRegister = CoreRegister::General(15);
}

/// Run state reported by the core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    Running,
    Halted,
}

/// Core variant, decoded from the CPUID part number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreIdentity {
    CortexM0,
    CortexM0Plus,
    CortexM3,
    CortexM4,
    CortexM7,
    CortexM23,
    CortexM33,
    Unknown(u16),
}

impl CoreIdentity {
    /// Decode the PARTNO field (bits 15:4) of CPUID
    pub fn from_cpuid(cpuid: u32) -> Self {
        match ((cpuid >> 4) & 0xfff) as u16 {
            0xc20 => CoreIdentity::CortexM0,
            0xc60 => CoreIdentity::CortexM0Plus,
            0xc23 => CoreIdentity::CortexM3,
            0xc24 => CoreIdentity::CortexM4,
            0xc27 => CoreIdentity::CortexM7,
            0xd20 => CoreIdentity::CortexM23,
            0xd21 => CoreIdentity::CortexM33,
            other => CoreIdentity::Unknown(other),
        }
    }

    /// Whether FPB comparators on this core match full addresses instead of
    /// half-words selected by the REPLACE field.
    pub fn fpb_full_address(&self) -> bool {
        matches!(self, CoreIdentity::CortexM7)
    }
}

impl std::fmt::Display for CoreIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoreIdentity::CortexM0 => write!(f, "Cortex-M0"),
            CoreIdentity::CortexM0Plus => write!(f, "Cortex-M0+"),
            CoreIdentity::CortexM3 => write!(f, "Cortex-M3"),
            CoreIdentity::CortexM4 => write!(f, "Cortex-M4"),
            CoreIdentity::CortexM7 => write!(f, "Cortex-M7"),
            CoreIdentity::CortexM23 => write!(f, "Cortex-M23"),
            CoreIdentity::CortexM33 => write!(f, "Cortex-M33"),
            CoreIdentity::Unknown(partno) => write!(f, "unknown core (part 0x{:03x})", partno),
        }
    }
}

/// Core control, register and memory access on the debugged chip
pub trait Target {
    fn core_identity(&mut self) -> Result<CoreIdentity, TargetError>;

    fn status(&mut self) -> Result<TargetStatus, TargetError>;

    /// Force the core into debug state.
    fn halt(&mut self) -> Result<(), TargetError>;

    fn resume(&mut self) -> Result<(), TargetError>;

    /// Execute one instruction and stay halted.
    fn step(&mut self) -> Result<(), TargetError>;

    /// System reset, leaving the core halted at the reset vector.
    fn reset(&mut self) -> Result<(), TargetError>;

    /// Reset through the probe's reset line, leaving the core halted.
    fn hard_reset(&mut self) -> Result<(), TargetError>;

    fn read_register(&mut self, reg: CoreRegister) -> Result<u32, TargetError>;

    fn write_register(&mut self, reg: CoreRegister, value: u32) -> Result<(), TargetError>;

    /// Read `len` bytes starting at a word-aligned `address`. `len` is a multiple of 4.
    fn read_memory(&mut self, address: u32, len: usize) -> Result<Vec<u8>, TargetError>;

    /// Write whole words starting at a word-aligned `address`.
    fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<(), TargetError>;

    /// Byte-wide read without alignment requirements.
    fn read_memory_u8(&mut self, address: u32, len: usize) -> Result<Vec<u8>, TargetError>;

    /// Byte-wide write without alignment requirements.
    fn write_memory_u8(&mut self, address: u32, data: &[u8]) -> Result<(), TargetError>;

    /// Read a 32-bit debug or system control register.
    fn read_debug_word(&mut self, address: u32) -> Result<u32, TargetError>;

    /// Write a 32-bit debug or system control register.
    fn write_debug_word(&mut self, address: u32, value: u32) -> Result<(), TargetError>;

    /// Let the core run freely outside debug mode.
    fn release(&mut self) -> Result<(), TargetError>;
}

/// Per-page flash programming primitives of the chip's flash controller
pub trait FlashDriver {
    fn erase_page(&mut self, address: u32) -> Result<(), TargetError>;

    /// Program `data` into an erased region starting at `address`.
    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), TargetError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpuid_decoding() {
        assert_eq!(CoreIdentity::from_cpuid(0x410f_c241), CoreIdentity::CortexM4);
        assert_eq!(CoreIdentity::from_cpuid(0x411f_c271), CoreIdentity::CortexM7);
        assert_eq!(CoreIdentity::from_cpuid(0x410c_c601), CoreIdentity::CortexM0Plus);
        assert_eq!(CoreIdentity::from_cpuid(0x4100_1234), CoreIdentity::Unknown(0x123));
    }

    #[test]
    fn test_only_m7_uses_full_address_comparators() {
        assert!(CoreIdentity::CortexM7.fpb_full_address());
        assert!(!CoreIdentity::CortexM4.fpb_full_address());
        assert!(!CoreIdentity::CortexM3.fpb_full_address());
    }
}
