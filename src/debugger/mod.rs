//! Target access: probe discovery, the probe-rs backend, chip geometry and
//! hardware breakpoint allocation

pub mod breakpoints;
pub mod chip;
pub mod discovery;
pub mod probe;
pub mod target;

#[cfg(test)]
pub(crate) mod mock;

pub use breakpoints::{
    HalfWord, HardwareBreakpoint, HardwareResourceAllocator, HardwareWatchpoint, WatchFunction,
};
pub use chip::ChipProfile;
pub use discovery::{ProbeDiscovery, ProbeInfo, ProbeKind};
pub use probe::ProbeTarget;
pub use target::{CoreIdentity, CoreRegister, FlashDriver, Target, TargetStatus};
