//! Connection handles and reactor-side stream state.
//!
//! A `Connection` is the thread-safe handle user code holds: every
//! operation on it is forwarded to the reactor as a command. The matching
//! `StreamState` lives inside the reactor and owns the socket, the read
//! buffer, and the outbound queues.

use crate::error::HarnessError;
use crate::runtime::reactor::{Command, ReactorHandle};
use crate::runtime::{CompletionHandle, HandlerBinding};
use bytes::Bytes;
use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Which side of the connection an endpoint is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The side that dialed out.
    Originating,
    /// The side produced by a listener accept.
    Accepting,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Originating => f.write_str("originating"),
            Role::Accepting => f.write_str("accepting"),
        }
    }
}

struct ConnInner {
    id: u64,
    role: Role,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    reactor: ReactorHandle,
    open: AtomicBool,
    close_future: CompletionHandle,
}

/// Handle to one endpoint of an established stream.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnInner>,
}

impl Connection {
    pub(crate) fn new(
        id: u64,
        role: Role,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
        reactor: ReactorHandle,
    ) -> Self {
        Self {
            inner: Arc::new(ConnInner {
                id,
                role,
                local_addr,
                peer_addr,
                reactor,
                open: AtomicBool::new(true),
                close_future: CompletionHandle::new(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    /// Queue `data` without flushing; returns a fresh completion handle.
    pub fn write(&self, data: Bytes) -> CompletionHandle {
        self.write_with(data, CompletionHandle::new())
    }

    /// Queue `data` tracked by `handle` and return that same handle.
    pub fn write_with(&self, data: Bytes, handle: CompletionHandle) -> CompletionHandle {
        if !self.is_open() {
            handle.fail(HarnessError::closed());
            return handle;
        }
        let command = Command::Write {
            conn: self.inner.id,
            data,
            handle: handle.clone(),
        };
        if !self.inner.reactor.submit(command) {
            handle.fail(HarnessError::closed());
        }
        handle
    }

    /// Hand all queued writes to the socket.
    pub fn flush(&self) {
        if self.is_open() {
            self.inner.reactor.submit(Command::Flush {
                conn: self.inner.id,
            });
        }
    }

    pub fn write_and_flush(&self, data: Bytes) -> CompletionHandle {
        let handle = self.write(data);
        self.flush();
        handle
    }

    pub fn write_and_flush_with(&self, data: Bytes, handle: CompletionHandle) -> CompletionHandle {
        let handle = self.write_with(data, handle);
        self.flush();
        handle
    }

    /// Request closure. Returns the close future, completed once the
    /// reactor has released the socket. Closing twice is harmless.
    pub fn close(&self) -> CompletionHandle {
        let command = Command::Close {
            conn: self.inner.id,
        };
        if self.is_open() && !self.inner.reactor.submit(command) {
            self.mark_closed();
            self.inner.close_future.succeed();
        }
        self.close_future()
    }

    pub fn close_future(&self) -> CompletionHandle {
        self.inner.close_future.clone()
    }

    pub(crate) fn mark_closed(&self) {
        self.inner.open.store(false, Ordering::Release);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("role", &self.inner.role)
            .field("local", &self.inner.local_addr)
            .field("peer", &self.inner.peer_addr)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Reactor-side state of a registered stream.
pub(crate) struct StreamState {
    pub stream: mio::net::TcpStream,
    pub conn: Connection,
    pub binding: HandlerBinding,
    /// Buffer index in the reactor's read pool.
    pub read_buf_idx: usize,
    /// Whether WRITABLE interest is currently registered.
    pub write_interest: bool,
    pub writes: OutboundQueue,
}

impl StreamState {
    pub fn new(
        stream: mio::net::TcpStream,
        conn: Connection,
        binding: HandlerBinding,
        read_buf_idx: usize,
    ) -> Self {
        Self {
            stream,
            conn,
            binding,
            read_buf_idx,
            write_interest: false,
            writes: OutboundQueue::default(),
        }
    }
}

/// Two-stage write queue: writes wait in `pending` until flushed, then
/// drain from `outbound` as the socket accepts bytes.
#[derive(Default)]
pub(crate) struct OutboundQueue {
    pending: Vec<(Bytes, CompletionHandle)>,
    outbound: VecDeque<(Bytes, CompletionHandle)>,
    /// Bytes of the front outbound entry already written.
    written: usize,
}

impl OutboundQueue {
    pub fn queue(&mut self, data: Bytes, handle: CompletionHandle) {
        self.pending.push((data, handle));
    }

    /// Move pending writes to the outbound queue.
    pub fn flush(&mut self) {
        self.outbound.extend(self.pending.drain(..));
    }

    pub fn has_outbound(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Unwritten remainder of the front outbound entry.
    pub fn front_remaining(&self) -> Option<&[u8]> {
        self.outbound
            .front()
            .map(|(data, _)| &data[self.written..])
    }

    /// Account for `n` bytes accepted by the socket, completing every entry
    /// that is now fully written.
    pub fn advance(&mut self, mut n: usize) {
        while let Some((data, _)) = self.outbound.front() {
            let remaining = data.len() - self.written;
            if n < remaining {
                self.written += n;
                return;
            }
            n -= remaining;
            self.written = 0;
            if let Some((_, handle)) = self.outbound.pop_front() {
                handle.succeed();
            }
        }
    }

    /// Fail every queued write with `err`.
    pub fn fail_all(&mut self, err: &HarnessError) {
        for (_, handle) in self.pending.drain(..).chain(self.outbound.drain(..)) {
            handle.fail(err.clone());
        }
        self.written = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_wait_for_flush() {
        let mut queue = OutboundQueue::default();
        queue.queue(Bytes::from_static(b"hello"), CompletionHandle::new());

        assert!(!queue.has_outbound());
        assert!(queue.front_remaining().is_none());

        queue.flush();
        assert!(queue.has_outbound());
        assert_eq!(queue.front_remaining(), Some(&b"hello"[..]));
    }

    #[test]
    fn test_partial_writes_complete_in_order() {
        let mut queue = OutboundQueue::default();
        let first = CompletionHandle::new();
        let second = CompletionHandle::new();
        queue.queue(Bytes::from_static(b"abc"), first.clone());
        queue.queue(Bytes::from_static(b"defgh"), second.clone());
        queue.flush();

        queue.advance(2);
        assert_eq!(queue.front_remaining(), Some(&b"c"[..]));
        assert!(!first.is_done());

        // Spans the end of the first entry into the second
        queue.advance(3);
        assert!(first.is_done());
        assert!(!second.is_done());
        assert_eq!(queue.front_remaining(), Some(&b"fgh"[..]));

        queue.advance(3);
        assert!(second.is_done());
        assert!(!queue.has_outbound());
    }

    #[test]
    fn test_empty_write_completes_when_reached() {
        let mut queue = OutboundQueue::default();
        let empty = CompletionHandle::new();
        queue.queue(Bytes::new(), empty.clone());
        queue.flush();

        queue.advance(0);
        assert!(empty.is_done());
        assert!(!queue.has_outbound());
    }

    #[test]
    fn test_fail_all() {
        let mut queue = OutboundQueue::default();
        let flushed = CompletionHandle::new();
        let unflushed = CompletionHandle::new();
        queue.queue(Bytes::from_static(b"a"), flushed.clone());
        queue.flush();
        queue.queue(Bytes::from_static(b"b"), unflushed.clone());

        queue.fail_all(&HarnessError::closed());

        assert!(matches!(flushed.outcome(), Some(Err(_))));
        assert!(matches!(unflushed.outcome(), Some(Err(_))));
        assert!(!queue.has_outbound());
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Originating.to_string(), "originating");
        assert_eq!(Role::Accepting.to_string(), "accepting");
    }
}
