//! TCP listener that hands each accepted client to the session dispatcher

use super::session::SessionDispatcher;
use crate::config::ServerConfig;
use crate::debugger::{FlashDriver, Target};
use crate::error::{Result, ServerError};
use crate::rsp::{Connection, PacketTransport};
use std::net::{SocketAddr, TcpListener};
use tracing::{error, info, warn};

/// Accepts one debugger at a time and serves it until it goes away
pub struct GdbServer<T> {
    listener: TcpListener,
    dispatcher: SessionDispatcher<T>,
    max_send_attempts: Option<u32>,
}

impl<T: Target + FlashDriver> GdbServer<T> {
    /// Bind the listener described by `config`.
    pub fn bind(config: &ServerConfig, dispatcher: SessionDispatcher<T>) -> Result<Self> {
        let address = format!("{}:{}", config.listen_address, config.port);
        let listener = TcpListener::bind(&address).map_err(|e| {
            ServerError::ConnectionFailed(format!("Cannot listen on {}: {}", address, e))
        })?;
        Ok(Self {
            listener,
            dispatcher,
            max_send_attempts: config.max_send_attempts,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn dispatcher(&self) -> &SessionDispatcher<T> {
        &self.dispatcher
    }

    /// Serve clients until one leaves without persistent mode, then release
    /// the target and return the dispatcher.
    pub fn run(mut self) -> Result<SessionDispatcher<T>> {
        info!("Listening for GDB on {}", self.local_addr()?);

        loop {
            let (mut stream, peer) = self.listener.accept()?;
            info!("GDB connected from {}", peer);
            if let Err(e) = stream.on_session_start() {
                warn!("Cannot configure client socket: {}", e);
            }

            match self.dispatcher.begin_connection() {
                Ok(()) => {
                    let mut transport =
                        PacketTransport::new(stream).with_max_send_attempts(self.max_send_attempts);
                    if let Err(e) = self.dispatcher.serve(&mut transport) {
                        warn!("Session with {} ended: {}", peer, e);
                    }
                }
                Err(e) => error!("Cannot prepare target for {}: {}", peer, e),
            }

            self.dispatcher.end_connection();
            info!("GDB at {} disconnected", peer);
            if !self.dispatcher.is_persistent() {
                break;
            }
            info!("Persistent mode, waiting for the next client");
        }

        info!("Releasing target");
        if let Err(e) = self.dispatcher.target_mut().release() {
            warn!("Failed to release target: {}", e);
        }
        Ok(self.dispatcher)
    }
}
