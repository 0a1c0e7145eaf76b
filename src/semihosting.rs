//! ARM semihosting requests raised by the target with `BKPT 0xAB`
//!
//! The session traps the breakpoint, hands the operation number (r0) and
//! parameter (r1) to a [`Semihosting`] implementation, and writes the result
//! back to r0. Only console output is bundled; file I/O is answered with -1.

use crate::debugger::Target;
use crate::error::TargetError;
use std::io::{self, Stderr, Stdout, Write};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// `BKPT 0xAB` in Thumb encoding
pub const BKPT_SEMIHOSTING: u16 = 0xBEAB;

pub const SYS_OPEN: u32 = 0x01;
pub const SYS_CLOSE: u32 = 0x02;
pub const SYS_WRITEC: u32 = 0x03;
pub const SYS_WRITE0: u32 = 0x04;
pub const SYS_WRITE: u32 = 0x05;
pub const SYS_ISTTY: u32 = 0x09;
pub const SYS_CLOCK: u32 = 0x10;
pub const SYS_TIME: u32 = 0x11;
pub const SYS_ERRNO: u32 = 0x13;

/// Result reported for failed or unimplemented operations
pub const FAILURE: u32 = u32::MAX;

const HANDLE_STDIN: u32 = 1;
const HANDLE_STDOUT: u32 = 2;
const HANDLE_STDERR: u32 = 3;

/// Longest string accepted from SYS_WRITE0 or SYS_OPEN
const MAX_STRING: usize = 4096;
const STRING_CHUNK: usize = 64;

/// Most bytes moved by one SYS_WRITE; the rest is reported as unwritten
const MAX_WRITE: u32 = 0x1_0000;
const WRITE_CHUNK: u32 = 1024;

/// Host side of the semihosting interface
pub trait Semihosting {
    /// Serve one request; the returned value goes back to the target in r0.
    fn dispatch(
        &mut self,
        target: &mut dyn Target,
        operation: u32,
        parameter: u32,
    ) -> Result<u32, TargetError>;
}

/// Routes console output from the target to the host's stdout and stderr
pub struct ConsoleSemihosting<O = Stdout, E = Stderr> {
    stdout: O,
    stderr: E,
    started: Instant,
}

impl ConsoleSemihosting {
    pub fn new() -> Self {
        Self::with_writers(io::stdout(), io::stderr())
    }
}

impl Default for ConsoleSemihosting {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: Write, E: Write> ConsoleSemihosting<O, E> {
    pub fn with_writers(stdout: O, stderr: E) -> Self {
        Self {
            stdout,
            stderr,
            started: Instant::now(),
        }
    }

    pub fn into_writers(self) -> (O, E) {
        (self.stdout, self.stderr)
    }

    fn writer(&mut self, handle: u32) -> Option<&mut dyn Write> {
        match handle {
            HANDLE_STDOUT => Some(&mut self.stdout),
            HANDLE_STDERR => Some(&mut self.stderr),
            _ => None,
        }
    }

    fn emit(&mut self, handle: u32, bytes: &[u8]) -> bool {
        let Some(out) = self.writer(handle) else {
            return false;
        };
        match out.write_all(bytes).and_then(|_| out.flush()) {
            Ok(()) => true,
            Err(e) => {
                warn!("Semihosting console write failed: {}", e);
                false
            }
        }
    }

    /// Copy up to [`MAX_WRITE`] bytes from target memory to a console handle,
    /// returning how many were written.
    fn write_from_target(
        &mut self,
        target: &mut dyn Target,
        handle: u32,
        buffer: u32,
        length: u32,
    ) -> Result<u32, TargetError> {
        if self.writer(handle).is_none() {
            return Ok(0);
        }
        let limit = length.min(MAX_WRITE);
        if limit < length {
            warn!("Semihosting write of {} bytes truncated to {}", length, limit);
        }

        let mut written = 0;
        while written < limit {
            let size = (limit - written).min(WRITE_CHUNK);
            let data = target.read_memory_u8(buffer.wrapping_add(written), size as usize)?;
            if !self.emit(handle, &data) {
                break;
            }
            written += size;
        }
        Ok(written)
    }
}

/// Read the `count`-word parameter block at `address`.
fn read_args(target: &mut dyn Target, address: u32, count: usize) -> Result<Vec<u32>, TargetError> {
    let bytes = target.read_memory_u8(address, count * 4)?;
    Ok(bytes
        .chunks_exact(4)
        .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
        .collect())
}

/// Read a NUL-terminated string, giving up after [`MAX_STRING`] bytes.
fn read_c_string(target: &mut dyn Target, address: u32) -> Result<Vec<u8>, TargetError> {
    let mut text = Vec::new();
    while text.len() < MAX_STRING {
        let chunk = target.read_memory_u8(address.wrapping_add(text.len() as u32), STRING_CHUNK)?;
        if let Some(end) = chunk.iter().position(|b| *b == 0) {
            text.extend_from_slice(&chunk[..end]);
            return Ok(text);
        }
        text.extend_from_slice(&chunk);
    }
    text.truncate(MAX_STRING);
    Ok(text)
}

impl<O: Write, E: Write> Semihosting for ConsoleSemihosting<O, E> {
    fn dispatch(
        &mut self,
        target: &mut dyn Target,
        operation: u32,
        parameter: u32,
    ) -> Result<u32, TargetError> {
        let result = match operation {
            SYS_OPEN => {
                // [name, mode, name length]; only the console pseudo-file exists.
                let args = read_args(target, parameter, 3)?;
                if args[2] as usize > MAX_STRING {
                    debug!("Semihosting open with {} byte name refused", args[2]);
                    return Ok(FAILURE);
                }
                let name = target.read_memory_u8(args[0], args[2] as usize)?;
                if name != b":tt" {
                    debug!("Semihosting open of {:?} refused", String::from_utf8_lossy(&name));
                    FAILURE
                } else {
                    match args[1] {
                        0..=3 => HANDLE_STDIN,
                        4..=7 => HANDLE_STDOUT,
                        _ => HANDLE_STDERR,
                    }
                }
            }
            SYS_CLOSE => {
                let args = read_args(target, parameter, 1)?;
                if (HANDLE_STDIN..=HANDLE_STDERR).contains(&args[0]) {
                    0
                } else {
                    FAILURE
                }
            }
            SYS_WRITEC => {
                let byte = target.read_memory_u8(parameter, 1)?;
                self.emit(HANDLE_STDOUT, &byte);
                0
            }
            SYS_WRITE0 => {
                let text = read_c_string(target, parameter)?;
                self.emit(HANDLE_STDOUT, &text);
                0
            }
            SYS_WRITE => {
                // [handle, buffer, length]; result is the count NOT written.
                let args = read_args(target, parameter, 3)?;
                let written = self.write_from_target(target, args[0], args[1], args[2])?;
                args[2] - written
            }
            SYS_ISTTY => {
                let args = read_args(target, parameter, 1)?;
                u32::from((HANDLE_STDIN..=HANDLE_STDERR).contains(&args[0]))
            }
            SYS_CLOCK => (self.started.elapsed().as_millis() / 10) as u32,
            SYS_TIME => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_secs() as u32)
                .unwrap_or(0),
            SYS_ERRNO => 0,
            other => {
                debug!("Unsupported semihosting operation 0x{:02x}", other);
                FAILURE
            }
        };
        Ok(result)
    }
}
