//! Flash programming through the GDB `vFlash` packets

pub mod staging;

pub use staging::{CommitSummary, FlashBlock, FlashStagingArea};
