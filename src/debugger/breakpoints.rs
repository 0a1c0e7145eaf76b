//! Hardware breakpoint and watchpoint allocation
//!
//! GDB may ask for any number of breakpoints, but a Cortex-M core only has a
//! handful of FPB code comparators and DWT data comparators. The allocator
//! keeps a shadow table of each unit and is the only place that encodes
//! comparator register values.

use super::target::Target;
use crate::error::BreakpointError;
use bitflags::bitflags;
use tracing::{debug, warn};

/// Flash Patch control register
pub const FP_CTRL: u32 = 0xE000_2000;
/// First FPB comparator; the rest follow at 4-byte stride
pub const FP_COMP0: u32 = 0xE000_2008;
/// FP_CTRL KEY | ENABLE
const FP_CTRL_ENABLE: u32 = 0x3;

/// Debug Exception and Monitor Control Register
pub const DEMCR: u32 = 0xE000_EDFC;
const DEMCR_TRCENA: u32 = 1 << 24;

/// First DWT comparator; MASK and FUNCTION follow, units at 16-byte stride
pub const DWT_COMP0: u32 = 0xE000_1020;
const DWT_STRIDE: u32 = 0x10;

/// Upper bound on FPB code comparators
pub const MAX_CODE_BREAKPOINTS: usize = 15;
/// DWT comparators managed by the allocator
pub const DATA_WATCHPOINTS: usize = 4;

bitflags! {
    /// Half-words of an aligned word that an FPB comparator matches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HalfWord: u32 {
        const LOW = 0b01;
        const HIGH = 0b10;
    }
}

impl HalfWord {
    fn of(address: u32) -> Self {
        if address & 0x2 != 0 {
            HalfWord::HIGH
        } else {
            HalfWord::LOW
        }
    }
}

/// One FPB comparator slot. The slot is free when `halves` is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HardwareBreakpoint {
    pub address: u32,
    pub halves: HalfWord,
}

impl HardwareBreakpoint {
    pub fn is_free(&self) -> bool {
        self.halves.is_empty()
    }
}

/// DWT_FUNCTION encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatchFunction {
    #[default]
    Disabled = 0,
    Read = 5,
    Write = 6,
    Access = 7,
}

/// One DWT comparator slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HardwareWatchpoint {
    pub address: u32,
    /// log2 of the watched range length
    pub mask: u32,
    pub function: WatchFunction,
}

impl HardwareWatchpoint {
    pub fn is_free(&self) -> bool {
        self.function == WatchFunction::Disabled
    }
}

/// Shadow tables of the FPB and DWT comparators
#[derive(Debug, Default)]
pub struct HardwareResourceAllocator {
    breakpoints: Vec<HardwareBreakpoint>,
    watchpoints: [HardwareWatchpoint; DATA_WATCHPOINTS],
    full_address: bool,
}

fn fp_comp(slot: usize) -> u32 {
    FP_COMP0 + 4 * slot as u32
}

fn dwt_comp(slot: usize) -> u32 {
    DWT_COMP0 + DWT_STRIDE * slot as u32
}

fn dwt_mask(slot: usize) -> u32 {
    dwt_comp(slot) + 4
}

fn dwt_function(slot: usize) -> u32 {
    dwt_comp(slot) + 8
}

/// Number of code comparators advertised by FP_CTRL (NUM_CODE[6:4] ++ NUM_CODE[3:0])
fn code_comparators(fp_ctrl: u32) -> usize {
    let count = ((fp_ctrl >> 4) & 0xf) | (((fp_ctrl >> 12) & 0x7) << 4);
    (count as usize).min(MAX_CODE_BREAKPOINTS)
}

impl HardwareResourceAllocator {
    /// An allocator with no slots; call [`reset`](Self::reset) before use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable both units, discover the FPB size and clear every comparator.
    ///
    /// Must run at session start and after every core reset, which can leave
    /// stale comparator contents behind.
    pub fn reset(&mut self, target: &mut dyn Target) -> Result<(), BreakpointError> {
        self.full_address = target.core_identity()?.fpb_full_address();

        target.write_debug_word(FP_CTRL, FP_CTRL_ENABLE)?;
        let fp_ctrl = target.read_debug_word(FP_CTRL)?;
        let slots = code_comparators(fp_ctrl);
        self.breakpoints = vec![HardwareBreakpoint::default(); slots];
        for slot in 0..slots {
            target.write_debug_word(fp_comp(slot), 0)?;
        }

        let demcr = target.read_debug_word(DEMCR)?;
        target.write_debug_word(DEMCR, demcr | DEMCR_TRCENA)?;
        self.watchpoints = [HardwareWatchpoint::default(); DATA_WATCHPOINTS];
        for slot in 0..DATA_WATCHPOINTS {
            target.write_debug_word(dwt_function(slot), 0)?;
        }

        debug!(
            "Breakpoint unit reset: {} code comparators, {} watchpoints, {} encoding",
            slots,
            DATA_WATCHPOINTS,
            if self.full_address { "full-address" } else { "half-word" }
        );
        Ok(())
    }

    pub fn breakpoints(&self) -> &[HardwareBreakpoint] {
        &self.breakpoints
    }

    pub fn watchpoints(&self) -> &[HardwareWatchpoint] {
        &self.watchpoints
    }

    /// Table key for a breakpoint address
    fn comparator_address(&self, address: u32) -> u32 {
        if self.full_address {
            address
        } else {
            address & !0x3
        }
    }

    fn encode(&self, bp: &HardwareBreakpoint) -> u32 {
        if bp.is_free() {
            0
        } else if self.full_address {
            bp.address | 1
        } else {
            bp.address | 1 | (bp.halves.bits() << 30)
        }
    }

    /// Insert a code breakpoint, sharing a slot with the other half-word of the
    /// same word when one is already live.
    pub fn set_breakpoint(
        &mut self,
        target: &mut dyn Target,
        address: u32,
    ) -> Result<usize, BreakpointError> {
        if address & 0x1 != 0 {
            return Err(BreakpointError::MisalignedAddress(address));
        }
        let key = self.comparator_address(address);
        let slot = self
            .breakpoints
            .iter()
            .position(|bp| !bp.is_free() && bp.address == key)
            .or_else(|| self.breakpoints.iter().position(HardwareBreakpoint::is_free))
            .ok_or(BreakpointError::NoFreeSlot)?;

        let mut bp = self.breakpoints[slot];
        bp.address = key;
        bp.halves |= HalfWord::of(address);

        target.write_debug_word(fp_comp(slot), self.encode(&bp))?;
        self.breakpoints[slot] = bp;
        debug!("Breakpoint at 0x{:08x} in slot {} ({:?})", address, slot, bp.halves);
        Ok(slot)
    }

    /// Remove a code breakpoint. Removing one that does not exist succeeds.
    pub fn clear_breakpoint(
        &mut self,
        target: &mut dyn Target,
        address: u32,
    ) -> Result<(), BreakpointError> {
        let key = self.comparator_address(address);
        let Some(slot) = self
            .breakpoints
            .iter()
            .position(|bp| !bp.is_free() && bp.address == key)
        else {
            debug!("No breakpoint at 0x{:08x}, nothing to clear", address);
            return Ok(());
        };

        let mut bp = self.breakpoints[slot];
        bp.halves.remove(HalfWord::of(address));

        target.write_debug_word(fp_comp(slot), self.encode(&bp))?;
        self.breakpoints[slot] = bp;
        debug!("Cleared breakpoint at 0x{:08x} (slot {} now {:?})", address, slot, bp.halves);
        Ok(())
    }

    /// Arm a DWT comparator over `length` bytes at `address`.
    pub fn set_watchpoint(
        &mut self,
        target: &mut dyn Target,
        function: WatchFunction,
        address: u32,
        length: u32,
    ) -> Result<usize, BreakpointError> {
        let mask = length
            .checked_next_power_of_two()
            .filter(|_| length > 0)
            .map(u32::trailing_zeros)
            .ok_or(BreakpointError::InvalidLength(length))?;
        if mask >= 16 {
            return Err(BreakpointError::InvalidLength(length));
        }

        // Re-arming a live address replaces it, keeping addresses unique.
        let slot = self
            .watchpoints
            .iter()
            .position(|wp| !wp.is_free() && wp.address == address)
            .or_else(|| self.watchpoints.iter().position(HardwareWatchpoint::is_free))
            .ok_or(BreakpointError::NoFreeSlot)?;

        target.write_debug_word(dwt_comp(slot), address)?;
        target.write_debug_word(dwt_mask(slot), mask)?;
        target.write_debug_word(dwt_function(slot), function as u32)?;
        self.watchpoints[slot] = HardwareWatchpoint {
            address,
            mask,
            function,
        };
        // Clears MATCHED so a stale hit is not reported for the new comparator.
        let _ = target.read_debug_word(dwt_function(slot))?;

        debug!(
            "Watchpoint {:?} at 0x{:08x} len {} in slot {}",
            function, address, length, slot
        );
        Ok(slot)
    }

    /// Disarm the watchpoint at `address`.
    pub fn clear_watchpoint(
        &mut self,
        target: &mut dyn Target,
        address: u32,
    ) -> Result<(), BreakpointError> {
        let slot = self
            .watchpoints
            .iter()
            .position(|wp| !wp.is_free() && wp.address == address)
            .ok_or_else(|| {
                warn!("No watchpoint at 0x{:08x}", address);
                BreakpointError::NotFound(address)
            })?;

        target.write_debug_word(dwt_function(slot), 0)?;
        self.watchpoints[slot] = HardwareWatchpoint::default();
        debug!("Cleared watchpoint at 0x{:08x} (slot {})", address, slot);
        Ok(())
    }
}
