//! Simulated Cortex-M core for unit tests

use super::target::{CoreIdentity, CoreRegister, FlashDriver, Target, TargetStatus};
use crate::error::TargetError;
use std::collections::HashMap;

pub(crate) struct MockTarget {
    pub identity: CoreIdentity,
    pub status: TargetStatus,
    pub registers: HashMap<CoreRegister, u32>,
    pub memory: HashMap<u32, u8>,
    /// Last value written to each debug register
    pub debug_regs: HashMap<u32, u32>,
    /// Every debug register write in order
    pub debug_writes: Vec<(u32, u32)>,
    /// Values returned for debug register reads that were never written
    pub debug_defaults: HashMap<u32, u32>,
    pub debug_reads: Vec<u32>,
    /// Every debug register write fails while set
    pub fail_debug_writes: bool,
    /// Halt on its own after this many status polls while running
    pub halt_after_polls: Option<u32>,
    /// Status queries fail while set
    pub fail_status: bool,
    pub resets: u32,
    pub hard_resets: u32,
    pub steps: u32,
    pub resumes: u32,
    pub released: bool,
    pub word_reads: Vec<(u32, usize)>,
    pub byte_reads: Vec<(u32, usize)>,
    pub word_writes: Vec<(u32, usize)>,
    pub byte_writes: Vec<(u32, usize)>,
    pub erased_pages: Vec<u32>,
    pub flash_writes: Vec<(u32, Vec<u8>)>,
    pub fail_flash_write_at: Option<u32>,
}

impl MockTarget {
    /// A Cortex-M4 with six FPB comparators, halted
    pub fn new() -> Self {
        let mut debug_defaults = HashMap::new();
        debug_defaults.insert(0xE000_2000, 0x0000_0060);
        Self {
            identity: CoreIdentity::CortexM4,
            status: TargetStatus::Halted,
            registers: HashMap::new(),
            memory: HashMap::new(),
            debug_regs: HashMap::new(),
            debug_writes: Vec::new(),
            debug_defaults,
            debug_reads: Vec::new(),
            fail_debug_writes: false,
            halt_after_polls: None,
            fail_status: false,
            resets: 0,
            hard_resets: 0,
            steps: 0,
            resumes: 0,
            released: false,
            word_reads: Vec::new(),
            byte_reads: Vec::new(),
            word_writes: Vec::new(),
            byte_writes: Vec::new(),
            erased_pages: Vec::new(),
            flash_writes: Vec::new(),
            fail_flash_write_at: None,
        }
    }

    pub fn with_comparators(mut self, code: u32) -> Self {
        let fp_ctrl = ((code & 0xf) << 4) | (((code >> 4) & 0x7) << 12);
        self.debug_defaults.insert(0xE000_2000, fp_ctrl);
        self
    }

    pub fn load(&mut self, address: u32, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            self.memory.insert(address + i as u32, *byte);
        }
    }

    pub fn peek(&self, address: u32, len: usize) -> Vec<u8> {
        (0..len as u32)
            .map(|i| *self.memory.get(&(address + i)).unwrap_or(&0))
            .collect()
    }

    pub fn debug_reg(&self, address: u32) -> u32 {
        *self.debug_regs.get(&address).unwrap_or(&0)
    }
}

impl Target for MockTarget {
    fn core_identity(&mut self) -> Result<CoreIdentity, TargetError> {
        Ok(self.identity)
    }

    fn status(&mut self) -> Result<TargetStatus, TargetError> {
        if self.fail_status {
            return Err(TargetError::Probe("status read failed".to_string()));
        }
        if self.status == TargetStatus::Running {
            if let Some(remaining) = self.halt_after_polls.as_mut() {
                if *remaining == 0 {
                    self.status = TargetStatus::Halted;
                } else {
                    *remaining -= 1;
                }
            }
        }
        Ok(self.status)
    }

    fn halt(&mut self) -> Result<(), TargetError> {
        self.status = TargetStatus::Halted;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), TargetError> {
        self.resumes += 1;
        self.status = TargetStatus::Running;
        Ok(())
    }

    fn step(&mut self) -> Result<(), TargetError> {
        if self.status == TargetStatus::Running {
            return Err(TargetError::NotHalted);
        }
        self.steps += 1;
        let pc = self.registers.get(&CoreRegister::PC).copied().unwrap_or(0);
        self.registers.insert(CoreRegister::PC, pc + 2);
        Ok(())
    }

    fn reset(&mut self) -> Result<(), TargetError> {
        self.resets += 1;
        self.status = TargetStatus::Halted;
        Ok(())
    }

    fn hard_reset(&mut self) -> Result<(), TargetError> {
        self.hard_resets += 1;
        self.status = TargetStatus::Halted;
        Ok(())
    }

    fn read_register(&mut self, reg: CoreRegister) -> Result<u32, TargetError> {
        if self.status == TargetStatus::Running {
            return Err(TargetError::NotHalted);
        }
        Ok(self.registers.get(&reg).copied().unwrap_or(0))
    }

    fn write_register(&mut self, reg: CoreRegister, value: u32) -> Result<(), TargetError> {
        self.registers.insert(reg, value);
        Ok(())
    }

    fn read_memory(&mut self, address: u32, len: usize) -> Result<Vec<u8>, TargetError> {
        assert_eq!(address % 4, 0, "unaligned word read");
        assert_eq!(len % 4, 0, "partial word read");
        self.word_reads.push((address, len));
        Ok(self.peek(address, len))
    }

    fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<(), TargetError> {
        assert_eq!(address % 4, 0, "unaligned word write");
        assert_eq!(data.len() % 4, 0, "partial word write");
        self.word_writes.push((address, data.len()));
        self.load(address, data);
        Ok(())
    }

    fn read_memory_u8(&mut self, address: u32, len: usize) -> Result<Vec<u8>, TargetError> {
        self.byte_reads.push((address, len));
        Ok(self.peek(address, len))
    }

    fn write_memory_u8(&mut self, address: u32, data: &[u8]) -> Result<(), TargetError> {
        self.byte_writes.push((address, data.len()));
        self.load(address, data);
        Ok(())
    }

    fn read_debug_word(&mut self, address: u32) -> Result<u32, TargetError> {
        self.debug_reads.push(address);
        if address == 0xE000_2000 {
            return Ok(*self.debug_defaults.get(&address).unwrap_or(&0));
        }
        if let Some(value) = self.debug_regs.get(&address) {
            return Ok(*value);
        }
        Ok(*self.debug_defaults.get(&address).unwrap_or(&0))
    }

    fn write_debug_word(&mut self, address: u32, value: u32) -> Result<(), TargetError> {
        if self.fail_debug_writes {
            return Err(TargetError::Probe(format!("write to 0x{:08x} failed", address)));
        }
        self.debug_writes.push((address, value));
        self.debug_regs.insert(address, value);
        Ok(())
    }

    fn release(&mut self) -> Result<(), TargetError> {
        self.released = true;
        self.status = TargetStatus::Running;
        Ok(())
    }
}

impl FlashDriver for MockTarget {
    fn erase_page(&mut self, address: u32) -> Result<(), TargetError> {
        self.erased_pages.push(address);
        Ok(())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), TargetError> {
        if self.fail_flash_write_at == Some(address) {
            return Err(TargetError::Probe("flash controller reported PGERR".to_string()));
        }
        self.flash_writes.push((address, data.to_vec()));
        self.load(address, data);
        Ok(())
    }
}
