//! Byte stream underneath the packet transport

use std::io::{self, Read, Write};
use std::net::TcpStream;

/// A bidirectional byte stream to the debugger
pub trait Connection {
    /// Block until one byte arrives. End of stream is `ErrorKind::UnexpectedEof`.
    fn read(&mut self) -> io::Result<u8>;

    /// Return the next pending byte without consuming it, or `None` if nothing
    /// has arrived yet. Never blocks.
    fn peek(&mut self) -> io::Result<Option<u8>>;

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;

    /// Called once before the first packet is exchanged.
    fn on_session_start(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Connection for TcpStream {
    fn read(&mut self) -> io::Result<u8> {
        self.set_nonblocking(false)?;
        let mut buf = [0u8];
        Read::read_exact(self, &mut buf)?;
        Ok(buf[0])
    }

    fn peek(&mut self) -> io::Result<Option<u8>> {
        self.set_nonblocking(true)?;
        let mut buf = [0u8];
        let result = TcpStream::peek(self, &mut buf);
        self.set_nonblocking(false)?;
        match result {
            Ok(0) => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed")),
            Ok(_) => Ok(Some(buf[0])),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        Write::write_all(self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Write::flush(self)
    }

    fn on_session_start(&mut self) -> io::Result<()> {
        // Packets are small and latency-bound.
        self.set_nodelay(true)
    }
}

/// Scripted in-memory connection for tests
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct MemoryConnection {
    pub input: std::collections::VecDeque<u8>,
    pub output: Vec<u8>,
}

#[cfg(test)]
impl MemoryConnection {
    pub fn new(input: &[u8]) -> Self {
        Self {
            input: input.iter().copied().collect(),
            output: Vec::new(),
        }
    }
}

#[cfg(test)]
impl Connection for MemoryConnection {
    fn read(&mut self) -> io::Result<u8> {
        self.input
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "script exhausted"))
    }

    fn peek(&mut self) -> io::Result<Option<u8>> {
        Ok(self.input.front().copied())
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.output.extend_from_slice(buf);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
