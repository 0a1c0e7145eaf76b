//! Error types for the GDB server

use thiserror::Error;

/// Main error type for the GDB server
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Probe not found: {0}")]
    ProbeNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Target error: {0}")]
    Target(#[from] TargetError),

    #[error("Breakpoint error: {0}")]
    Breakpoint(#[from] BreakpointError),

    #[error("Flash error: {0}")]
    Flash(#[from] FlashError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<probe_rs::Error> for ServerError {
    fn from(error: probe_rs::Error) -> Self {
        ServerError::Target(TargetError::from(error))
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ServerError>;

/// Packet transport errors. Any of these ends the client session.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Packet not acknowledged after {0} attempts")]
    RetriesExhausted(u32),
}

/// Errors reported by the target collaborator
#[derive(Error, Debug)]
pub enum TargetError {
    #[error("Probe error: {0}")]
    Probe(String),

    #[error("Target not halted")]
    NotHalted,

    #[error("Unknown register index 0x{0:x}")]
    InvalidRegister(u32),
}

impl From<probe_rs::Error> for TargetError {
    fn from(error: probe_rs::Error) -> Self {
        TargetError::Probe(error.to_string())
    }
}

/// Hardware breakpoint and watchpoint allocation errors
#[derive(Error, Debug)]
pub enum BreakpointError {
    #[error("No free comparator slot")]
    NoFreeSlot,

    #[error("Breakpoint address 0x{0:08x} is not half-word aligned")]
    MisalignedAddress(u32),

    #[error("Watchpoint length {0} is too large")]
    InvalidLength(u32),

    #[error("No watchpoint at 0x{0:08x}")]
    NotFound(u32),

    #[error("Comparator access failed: {0}")]
    Target(#[from] TargetError),
}

/// Flash staging errors
#[derive(Error, Debug)]
pub enum FlashError {
    #[error("Range 0x{address:08x}+0x{length:x} is outside flash")]
    OutOfBounds { address: u32, length: u32 },

    #[error("Range 0x{address:08x}+0x{length:x} is not aligned to page size 0x{page_size:x}")]
    Unaligned {
        address: u32,
        length: u32,
        page_size: u32,
    },

    #[error("No declared block covers 0x{address:08x}+0x{length:x}")]
    NoFittingBlock { address: u32, length: usize },

    #[error("Flash write failed at 0x{address:08x}: {reason}")]
    WriteFailed { address: u32, reason: String },
}
