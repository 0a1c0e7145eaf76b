//! GDB server: session state machine, register map, documents and TCP loop

pub mod documents;
pub mod monitor;
pub mod registers;
pub mod server;
pub mod session;

pub use monitor::MonitorVerb;
pub use server::GdbServer;
pub use session::{Flow, RunState, SessionDispatcher, SessionSettings};
