//! GDB Remote Serial Protocol plumbing: framing, transport and packet decoding

pub mod codec;
pub mod command;
pub mod connection;
pub mod transport;

pub use command::{BreakpointKind, Command, MalformedPacket};
pub use connection::Connection;
pub use transport::{PacketTransport, INTERRUPT};
