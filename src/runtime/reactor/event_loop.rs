//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! Commands queued by other threads are drained after every wakeup, so a
//! write issued from a handler is never applied in the middle of the read
//! batch that produced it.

use super::{Command, ReactorConfig, ReactorHandle, WAKER_TOKEN};
use crate::error::HarnessError;
use crate::runtime::connection::StreamState;
use crate::runtime::handler::Event;
use crate::runtime::token::TokenRegistry;
use crate::runtime::{BufferPool, Connection, HandlerBinding, ListenHandle, Role};
use bytes::Bytes;
use crossbeam::channel::Receiver;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use std::io::{self, Read, Write};
use tracing::{debug, info, trace, warn};

struct ListenerState {
    listener: TcpListener,
    handle: ListenHandle,
    /// Attached to every accepted connection.
    binding: HandlerBinding,
}

enum Entry {
    Listener(ListenerState),
    Stream(StreamState),
}

struct EventLoop {
    poll: Poll,
    entries: TokenRegistry<Entry>,
    buffers: BufferPool,
    reactor: ReactorHandle,
}

/// Run the reactor until a `Shutdown` command arrives.
pub(super) fn run(
    poll: Poll,
    rx: Receiver<Command>,
    reactor: ReactorHandle,
    config: &ReactorConfig,
) -> io::Result<()> {
    let mut events = Events::with_capacity(config.events_capacity);
    let mut el = EventLoop {
        poll,
        entries: TokenRegistry::with_capacity(config.max_connections),
        buffers: BufferPool::new(config.max_connections, config.buffer_size),
        reactor,
    };

    info!(
        buffer_size = config.buffer_size,
        max_connections = el.buffers.capacity(),
        "Reactor started"
    );

    loop {
        if let Err(e) = el.poll.poll(&mut events, None) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            el.close_all();
            reject_remaining(&rx);
            return Err(e);
        }

        for event in events.iter() {
            match event.token() {
                WAKER_TOKEN => {}
                token => el.handle_event(token, event),
            }
        }

        while let Ok(command) = rx.try_recv() {
            if !el.apply(command) {
                el.close_all();
                reject_remaining(&rx);
                return Ok(());
            }
        }
    }
}

impl EventLoop {
    fn handle_event(&mut self, token: Token, event: &mio::event::Event) {
        let is_listener = match self.entries.get_mut(token) {
            Some(Entry::Listener(_)) => true,
            Some(Entry::Stream(_)) => false,
            None => return,
        };
        if is_listener {
            self.accept_connections(token);
            return;
        }

        if event.is_readable() || event.is_read_closed() || event.is_error() {
            self.handle_readable(token);
        }
        if event.is_writable() {
            self.handle_writable(token);
        }
    }

    /// Apply one command. Returns `false` on shutdown.
    fn apply(&mut self, command: Command) -> bool {
        match command {
            Command::Listen {
                listener,
                handle,
                binding,
                registered,
            } => {
                let listener = TcpListener::from_std(listener);
                let token = self.entries.insert(
                    handle.id(),
                    Entry::Listener(ListenerState {
                        listener,
                        handle: handle.clone(),
                        binding,
                    }),
                );
                let result = match self.entries.get_mut(token) {
                    Some(Entry::Listener(l)) => {
                        self.poll
                            .registry()
                            .register(&mut l.listener, token, Interest::READABLE)
                    }
                    _ => Ok(()),
                };
                match result {
                    Ok(()) => {
                        registered.succeed();
                    }
                    Err(e) => {
                        self.entries.remove(token);
                        handle.mark_closed();
                        registered.fail(e.into());
                    }
                }
            }
            Command::Adopt {
                stream,
                conn,
                binding,
                registered,
            } => {
                let stream = TcpStream::from_std(stream);
                match self.install(stream, conn.clone(), binding) {
                    Ok(()) => {
                        registered.succeed();
                    }
                    Err(e) => {
                        conn.mark_closed();
                        conn.close_future().succeed();
                        registered.fail(e);
                    }
                }
            }
            Command::Write { conn, data, handle } => match self.stream_mut(conn) {
                Some(s) => s.writes.queue(data, handle),
                None => {
                    handle.fail(HarnessError::closed());
                }
            },
            Command::Flush { conn } => {
                if let Some(token) = self.entries.token_of(conn) {
                    if let Some(Entry::Stream(s)) = self.entries.get_mut(token) {
                        s.writes.flush();
                    }
                    self.handle_writable(token);
                }
            }
            Command::Close { conn } | Command::CloseListener { listener: conn } => {
                if let Some(token) = self.entries.token_of(conn) {
                    self.close_entry(token);
                }
            }
            Command::Shutdown => return false,
        }
        true
    }

    fn stream_mut(&mut self, id: u64) -> Option<&mut StreamState> {
        let token = self.entries.token_of(id)?;
        match self.entries.get_mut(token) {
            Some(Entry::Stream(s)) => Some(s),
            _ => None,
        }
    }

    /// Register a connected stream and fire its activation.
    fn install(
        &mut self,
        stream: TcpStream,
        conn: Connection,
        binding: HandlerBinding,
    ) -> Result<(), HarnessError> {
        let Some(read_buf_idx) = self.buffers.alloc() else {
            return Err(HarnessError::Harness(
                "buffer pool exhausted, connection rejected".to_string(),
            ));
        };

        let token = self.entries.insert(
            conn.id(),
            Entry::Stream(StreamState::new(
                stream,
                conn.clone(),
                binding.clone(),
                read_buf_idx,
            )),
        );
        let result = match self.entries.get_mut(token) {
            Some(Entry::Stream(s)) => {
                self.poll
                    .registry()
                    .register(&mut s.stream, token, Interest::READABLE)
            }
            _ => Ok(()),
        };
        if let Err(e) = result {
            self.entries.remove(token);
            self.buffers.free(read_buf_idx);
            return Err(e.into());
        }

        debug!(
            conn = conn.id(),
            role = %conn.role(),
            peer = %conn.peer_addr(),
            buffers_free = self.buffers.available(),
            "Connection registered"
        );
        binding.fire(&conn, Event::Active);
        Ok(())
    }

    fn accept_connections(&mut self, token: Token) {
        loop {
            let accepted = match self.entries.get_mut(token) {
                Some(Entry::Listener(l)) => l
                    .listener
                    .accept()
                    .map(|(stream, peer)| (stream, peer, l.binding.clone())),
                _ => return,
            };

            match accepted {
                Ok((stream, peer, binding)) => {
                    let local = match stream.local_addr() {
                        Ok(addr) => addr,
                        Err(e) => {
                            warn!(error = %e, "Dropping accepted connection");
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(error = %e, "Failed to set TCP_NODELAY");
                    }
                    let conn = Connection::new(
                        self.reactor.next_id(),
                        Role::Accepting,
                        local,
                        peer,
                        self.reactor.clone(),
                    );
                    if let Err(e) = self.install(stream, conn.clone(), binding) {
                        warn!(peer = %peer, error = %e, "Rejecting connection");
                        conn.mark_closed();
                        conn.close_future().succeed();
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "Accept error");
                    break;
                }
            }
        }
    }

    fn handle_readable(&mut self, token: Token) {
        let mut received = false;

        loop {
            let Some(Entry::Stream(s)) = self.entries.get_mut(token) else {
                return;
            };
            let buf = self.buffers.get_mut(s.read_buf_idx);

            match s.stream.read(buf) {
                Ok(0) => {
                    if received {
                        s.binding.fire(&s.conn, Event::ReceiveComplete);
                    }
                    trace!(conn = s.conn.id(), "EOF");
                    self.close_entry(token);
                    return;
                }
                Ok(n) => {
                    let chunk = Bytes::copy_from_slice(&buf[..n]);
                    trace!(conn = s.conn.id(), bytes = n, "Read");
                    s.binding.fire(&s.conn, Event::Receive(chunk));
                    received = true;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    if received {
                        s.binding.fire(&s.conn, Event::ReceiveComplete);
                    }
                    self.fail_entry(token, e.into());
                    return;
                }
            }
        }

        if received {
            if let Some(Entry::Stream(s)) = self.entries.get_mut(token) {
                s.binding.fire(&s.conn, Event::ReceiveComplete);
            }
        }
    }

    /// Drain the outbound queue and keep WRITABLE interest in sync with it.
    fn handle_writable(&mut self, token: Token) {
        let Some(Entry::Stream(s)) = self.entries.get_mut(token) else {
            return;
        };

        if let Err(e) = drain_outbound(s) {
            self.fail_entry(token, e.into());
            return;
        }

        let want_writable = s.writes.has_outbound();
        if want_writable == s.write_interest {
            return;
        }
        let interest = if want_writable {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        if let Err(e) = self.poll.registry().reregister(&mut s.stream, token, interest) {
            self.fail_entry(token, e.into());
            return;
        }
        s.write_interest = want_writable;
    }

    /// Report `err` to the connection's handler, then close it.
    fn fail_entry(&mut self, token: Token, err: HarnessError) {
        if let Some(Entry::Stream(s)) = self.entries.get_mut(token) {
            debug!(
                conn = s.conn.id(),
                role = %s.conn.role(),
                error = %err,
                "Connection failed"
            );
            s.binding.fire(&s.conn, Event::Failure(err));
        }
        self.close_entry(token);
    }

    fn close_entry(&mut self, token: Token) {
        let Some(entry) = self.entries.remove(token) else {
            return;
        };

        match entry {
            Entry::Stream(state) => {
                let StreamState {
                    mut stream,
                    conn,
                    binding,
                    read_buf_idx,
                    mut writes,
                    ..
                } = state;

                if let Err(e) = self.poll.registry().deregister(&mut stream) {
                    debug!(conn = conn.id(), error = %e, "Deregister failed");
                }
                drop(stream);
                self.buffers.free(read_buf_idx);
                writes.fail_all(&HarnessError::closed());

                conn.mark_closed();
                binding.fire(&conn, Event::Inactive);
                conn.close_future().succeed();
                debug!(
                    conn = conn.id(),
                    role = %conn.role(),
                    live = self.entries.len(),
                    "Connection closed"
                );
            }
            Entry::Listener(ListenerState {
                mut listener,
                handle,
                ..
            }) => {
                if let Err(e) = self.poll.registry().deregister(&mut listener) {
                    debug!(listener = handle.id(), error = %e, "Deregister failed");
                }
                drop(listener);
                handle.mark_closed();
                handle.close_future().succeed();
                debug!(listener = handle.id(), "Listener closed");
            }
        }
    }

    fn close_all(&mut self) {
        for token in self.entries.tokens() {
            self.close_entry(token);
        }
    }
}

/// Write as much of the outbound queue as the socket accepts.
fn drain_outbound(s: &mut StreamState) -> io::Result<()> {
    loop {
        let Some(remaining) = s.writes.front_remaining() else {
            return Ok(());
        };
        if remaining.is_empty() {
            s.writes.advance(0);
            continue;
        }

        match s.stream.write(remaining) {
            Ok(0) => {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"));
            }
            Ok(n) => s.writes.advance(n),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Fail everything still queued after the loop has stopped.
fn reject_remaining(rx: &Receiver<Command>) {
    for command in rx.try_iter() {
        match command {
            Command::Listen {
                handle, registered, ..
            } => {
                handle.mark_closed();
                registered.fail(HarnessError::closed());
            }
            Command::Adopt {
                conn, registered, ..
            } => {
                conn.mark_closed();
                conn.close_future().succeed();
                registered.fail(HarnessError::closed());
            }
            Command::Write { handle, .. } => {
                handle.fail(HarnessError::closed());
            }
            Command::Flush { .. }
            | Command::Close { .. }
            | Command::CloseListener { .. }
            | Command::Shutdown => {}
        }
    }
}
