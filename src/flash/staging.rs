//! Staging of `vFlashErase` / `vFlashWrite` data until `vFlashDone`
//!
//! GDB declares erase regions and then streams write chunks whose boundaries
//! need not line up with those regions, in any order. Chunks are copied into
//! every declared block they overlap, and the whole set is programmed and
//! dropped in one commit.

use crate::debugger::ChipProfile;
use crate::error::{FlashError, TargetError};
use tracing::{debug, info, warn};

/// A page-aligned region declared by `vFlashErase`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashBlock {
    pub address: u32,
    /// Zero-filled until populated
    pub data: Vec<u8>,
}

impl FlashBlock {
    fn end(&self) -> u64 {
        self.address as u64 + self.data.len() as u64
    }
}

/// Outcome of a successful commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitSummary {
    pub blocks: usize,
    pub pages: usize,
    pub bytes: usize,
}

/// Declared flash blocks, newest first
#[derive(Debug, Default)]
pub struct FlashStagingArea {
    blocks: Vec<FlashBlock>,
}

impl FlashStagingArea {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blocks(&self) -> &[FlashBlock] {
        &self.blocks
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Drop every staged block without programming anything.
    pub fn discard(&mut self) {
        if !self.blocks.is_empty() {
            debug!("Discarding {} staged flash blocks", self.blocks.len());
        }
        self.blocks.clear();
    }

    /// Declare a page-aligned region that the next commit will program.
    pub fn declare_block(
        &mut self,
        chip: &ChipProfile,
        address: u32,
        length: u32,
    ) -> Result<(), FlashError> {
        if !chip.contains_flash(address, length) {
            return Err(FlashError::OutOfBounds { address, length });
        }
        let page_size = chip.page_size(address);
        if address % page_size != 0 || length % page_size != 0 {
            return Err(FlashError::Unaligned {
                address,
                length,
                page_size,
            });
        }

        self.blocks.insert(
            0,
            FlashBlock {
                address,
                data: vec![0; length as usize],
            },
        );
        debug!("Declared flash block 0x{:08x}+0x{:x}", address, length);
        Ok(())
    }

    /// Copy `data` into every declared block it overlaps.
    ///
    /// Returns the number of bytes copied, summed over blocks.
    pub fn populate(&mut self, address: u32, data: &[u8]) -> Result<usize, FlashError> {
        let start = address as u64;
        let end = start + data.len() as u64;
        let mut fit_blocks = 0;
        let mut fit_length = 0;

        for block in &mut self.blocks {
            let lo = start.max(block.address as u64);
            let hi = end.min(block.end());
            if lo >= hi {
                continue;
            }
            let dst = (lo - block.address as u64) as usize;
            let src = (lo - start) as usize;
            let len = (hi - lo) as usize;
            block.data[dst..dst + len].copy_from_slice(&data[src..src + len]);
            fit_blocks += 1;
            fit_length += len;
        }

        if fit_blocks == 0 {
            return Err(FlashError::NoFittingBlock {
                address,
                length: data.len(),
            });
        }
        if fit_length < data.len() {
            // GDB's chunking routinely runs past the declared regions.
            warn!(
                "Flash write at 0x{:08x} truncated: {} of {} bytes fit declared blocks",
                address,
                fit_length,
                data.len()
            );
        }
        Ok(fit_length)
    }

    /// Program every staged block page by page through `write`.
    ///
    /// Stops at the first failed page. The staging area is empty afterwards
    /// whatever the outcome.
    pub fn commit<F>(
        &mut self,
        chip: &ChipProfile,
        mut write: F,
    ) -> Result<CommitSummary, FlashError>
    where
        F: FnMut(u32, &[u8]) -> Result<(), TargetError>,
    {
        let blocks = std::mem::take(&mut self.blocks);
        let mut summary = CommitSummary {
            blocks: blocks.len(),
            pages: 0,
            bytes: 0,
        };

        for block in &blocks {
            let mut offset = 0usize;
            while offset < block.data.len() {
                let page = block.address + offset as u32;
                let len = (chip.page_size(page) as usize).min(block.data.len() - offset);
                write(page, &block.data[offset..offset + len]).map_err(|e| {
                    FlashError::WriteFailed {
                        address: page,
                        reason: e.to_string(),
                    }
                })?;
                summary.pages += 1;
                summary.bytes += len;
                offset += len;
            }
        }

        info!(
            "Flash commit: {} bytes in {} pages from {} blocks",
            summary.bytes, summary.pages, summary.blocks
        );
        Ok(summary)
    }
}
