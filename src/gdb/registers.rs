//! GDB register numbering for the `arm-m-profile` + `arm-vfp` target description

use crate::debugger::CoreRegister;

/// Registers transferred by `g` / `G`
pub const GENERAL_REGISTERS: u32 = 16;

pub const XPSR: u32 = 0x19;
pub const MSP: u32 = 0x1a;
pub const PSP: u32 = 0x1b;
pub const CONTROL: u32 = 0x1c;
pub const FAULTMASK: u32 = 0x1d;
pub const BASEPRI: u32 = 0x1e;
pub const PRIMASK: u32 = 0x1f;
pub const FLOAT_BASE: u32 = 0x20;
pub const FPSCR: u32 = 0x40;

/// Map a GDB register number to a core register; `None` for numbers this
/// target does not have.
pub fn core_register(index: u32) -> Option<CoreRegister> {
    let reg = match index {
        0..=15 => CoreRegister::General(index as u8),
        XPSR => CoreRegister::Xpsr,
        MSP => CoreRegister::Msp,
        PSP => CoreRegister::Psp,
        CONTROL => CoreRegister::Control,
        FAULTMASK => CoreRegister::FaultMask,
        BASEPRI => CoreRegister::BasePri,
        PRIMASK => CoreRegister::PriMask,
        0x20..=0x3f => CoreRegister::Float((index - FLOAT_BASE) as u8),
        FPSCR => CoreRegister::Fpscr,
        _ => return None,
    };
    Some(reg)
}
