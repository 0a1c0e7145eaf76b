//! probe-gdbserver
//!
//! A GDB Remote Serial Protocol server for ARM Cortex-M targets behind a
//! debug probe. GDB connects over TCP; the server translates register,
//! memory, breakpoint and flash requests into probe-rs operations, using the
//! core's FPB and DWT comparators for breakpoints and watchpoints.

pub mod config;
pub mod debugger;
pub mod error;
pub mod flash;
pub mod gdb;
pub mod rsp;
pub mod semihosting;

pub use config::Config;
pub use error::{Result, ServerError};
pub use gdb::{GdbServer, SessionDispatcher, SessionSettings};
