//! Outbound connections.

use crate::error::{HarnessError, Result};
use crate::runtime::reactor::{Command, Reactor};
use crate::runtime::{CompletionHandle, Connection, HandlerBinding, Role};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;
use tracing::debug;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Establishes originating connections with one handler attached.
pub struct Dialer {
    binding: HandlerBinding,
    connect_timeout: Duration,
}

impl Dialer {
    pub fn new(binding: HandlerBinding) -> Self {
        Self {
            binding,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Connect to `addr` and hand the stream to `reactor`.
    ///
    /// Returns once the connection is registered and its activation has
    /// been delivered to the handler's execution context.
    pub fn connect(&self, reactor: &Reactor, addr: SocketAddr) -> Result<Connection> {
        let stream = TcpStream::connect_timeout(&addr, self.connect_timeout)?;
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;

        let reactor_handle = reactor.handle();
        let conn = Connection::new(
            reactor_handle.next_id(),
            Role::Originating,
            stream.local_addr()?,
            addr,
            reactor_handle.clone(),
        );

        let registered = CompletionHandle::new();
        let command = Command::Adopt {
            stream,
            conn: conn.clone(),
            binding: self.binding.clone(),
            registered: registered.clone(),
        };
        if !reactor_handle.submit(command) {
            return Err(HarnessError::closed());
        }
        registered.wait_timeout(self.connect_timeout)?;

        debug!(conn = conn.id(), peer = %addr, "Connected");
        Ok(conn)
    }
}
