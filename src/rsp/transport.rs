//! Stop-and-wait packet exchange with checksum acknowledgement

use super::codec;
use super::connection::Connection;
use crate::error::TransportError;
use std::io;
use tracing::{debug, trace, warn};

/// Out-of-band byte GDB sends to interrupt a running target
pub const INTERRUPT: u8 = 0x03;

const ACK: u8 = b'+';
const NACK: u8 = b'-';

/// Frames, acknowledges and retransmits RSP packets over a [`Connection`]
pub struct PacketTransport<C> {
    conn: C,
    max_send_attempts: Option<u32>,
}

impl<C: Connection> PacketTransport<C> {
    /// A transport that retransmits unacknowledged packets until the
    /// connection fails.
    pub fn new(conn: C) -> Self {
        Self {
            conn,
            max_send_attempts: None,
        }
    }

    /// Bound the number of transmissions of a single packet.
    pub fn with_max_send_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_send_attempts = attempts;
        self
    }

    pub fn get_ref(&self) -> &C {
        &self.conn
    }

    pub fn get_mut(&mut self) -> &mut C {
        &mut self.conn
    }

    pub fn into_inner(self) -> C {
        self.conn
    }

    fn read_byte(&mut self) -> Result<u8, TransportError> {
        self.conn.read().map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => TransportError::ConnectionClosed,
            _ => TransportError::Io(e),
        })
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.conn.write_all(bytes)?;
        self.conn.flush()?;
        Ok(())
    }

    /// Send one packet and wait for the debugger to acknowledge it.
    pub fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let framed = codec::frame(payload);
        trace!("--> {}", String::from_utf8_lossy(payload));

        let mut attempts = 0u32;
        loop {
            self.write_bytes(&framed)?;
            attempts += 1;

            let reply = self.read_byte()?;
            if reply == ACK {
                return Ok(());
            }
            if let Some(limit) = self.max_send_attempts {
                if attempts >= limit {
                    warn!("Giving up on packet after {} attempts", attempts);
                    return Err(TransportError::RetriesExhausted(attempts));
                }
            }
            debug!("Got 0x{:02x} instead of ACK, retransmitting", reply);
        }
    }

    /// Receive the next packet with a valid checksum, NACKing corrupt ones.
    pub fn receive(&mut self) -> Result<Vec<u8>, TransportError> {
        loop {
            while self.read_byte()? != b'$' {}

            let mut payload = Vec::new();
            let mut sum = 0u8;
            loop {
                let byte = self.read_byte()?;
                if byte == b'#' {
                    break;
                }
                sum = sum.wrapping_add(byte);
                payload.push(byte);
            }

            let hi = self.read_byte()?;
            let lo = self.read_byte()?;
            match codec::parse_checksum(hi, lo) {
                Some(expected) if expected == sum => {
                    self.write_bytes(&[ACK])?;
                    trace!("<-- {}", String::from_utf8_lossy(&payload));
                    return Ok(payload);
                }
                received => {
                    warn!(
                        "Bad checksum (got {:?}, computed 0x{:02x}), requesting retransmission",
                        received, sum
                    );
                    self.write_bytes(&[NACK])?;
                }
            }
        }
    }

    /// Consume one pending byte if there is one; true if it was an interrupt.
    ///
    /// Any other byte is dropped. If it belonged to a packet, the sender sees
    /// a checksum failure and retransmits.
    pub fn poll_interrupt(&mut self) -> Result<bool, TransportError> {
        let pending = self.conn.peek().map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => TransportError::ConnectionClosed,
            _ => TransportError::Io(e),
        })?;
        if pending.is_none() {
            return Ok(false);
        }
        let byte = self.read_byte()?;
        if byte == INTERRUPT {
            debug!("Interrupt received");
            Ok(true)
        } else {
            trace!("Discarding 0x{:02x} while target runs", byte);
            Ok(false)
        }
    }
}
