//! Listening endpoints.

use crate::error::{HarnessError, Result};
use crate::runtime::reactor::{Command, Reactor, ReactorHandle};
use crate::runtime::{CompletionHandle, HandlerBinding};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How long `bind` waits for the reactor to register the socket.
const REGISTER_TIMEOUT: Duration = Duration::from_secs(5);

/// Listen backlog.
const BACKLOG: i32 = 1024;

/// Binds listening sockets whose accepted connections use one handler.
pub struct Listener {
    child: HandlerBinding,
}

impl Listener {
    /// `child` is attached to every accepted connection.
    pub fn new(child: HandlerBinding) -> Self {
        Self { child }
    }

    /// Bind `addr` and register the socket with `reactor`.
    ///
    /// Returns once the reactor is accepting on the socket.
    pub fn bind(&self, reactor: &Reactor, addr: SocketAddr) -> Result<ListenHandle> {
        let listener = create_listener(addr)?;
        let local_addr = listener.local_addr()?;
        let reactor_handle = reactor.handle();

        let handle = ListenHandle {
            inner: Arc::new(ListenInner {
                id: reactor_handle.next_id(),
                local_addr,
                reactor: reactor_handle.clone(),
                open: AtomicBool::new(true),
                close_future: CompletionHandle::new(),
            }),
        };

        let registered = CompletionHandle::new();
        let command = Command::Listen {
            listener,
            handle: handle.clone(),
            binding: self.child.clone(),
            registered: registered.clone(),
        };
        if !reactor_handle.submit(command) {
            return Err(HarnessError::closed());
        }
        registered.wait_timeout(REGISTER_TIMEOUT)?;

        debug!(addr = %local_addr, listener = handle.id(), "Listener bound");
        Ok(handle)
    }
}

struct ListenInner {
    id: u64,
    local_addr: SocketAddr,
    reactor: ReactorHandle,
    open: AtomicBool,
    close_future: CompletionHandle,
}

/// Handle to a bound listening socket.
#[derive(Clone)]
pub struct ListenHandle {
    inner: Arc<ListenInner>,
}

impl ListenHandle {
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Bound address, with the ephemeral port resolved.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    /// Stop accepting and release the socket.
    pub fn close(&self) -> CompletionHandle {
        let command = Command::CloseListener {
            listener: self.inner.id,
        };
        if self.is_open() && !self.inner.reactor.submit(command) {
            self.mark_closed();
            self.inner.close_future.succeed();
        }
        self.inner.close_future.clone()
    }

    pub fn close_future(&self) -> CompletionHandle {
        self.inner.close_future.clone()
    }

    pub(crate) fn mark_closed(&self) {
        self.inner.open.store(false, Ordering::Release);
    }
}

impl fmt::Debug for ListenHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenHandle")
            .field("id", &self.inner.id)
            .field("local", &self.inner.local_addr)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Create a non-blocking TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}
