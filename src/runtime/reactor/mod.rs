//! mio-based reactor.
//!
//! One thread owns the poller and every socket. Other threads talk to it
//! through `ReactorHandle`, which queues a `Command` and wakes the poller.

mod event_loop;

use crate::runtime::{CompletionHandle, Connection, HandlerBinding};
use bytes::Bytes;
use crossbeam::channel::{self, Sender};
use mio::{Poll, Token, Waker};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

use super::listener::ListenHandle;

const WAKER_TOKEN: Token = Token(usize::MAX);

/// Reactor sizing.
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// Size of each per-connection read buffer.
    pub buffer_size: usize,
    /// Capacity of the poll event batch.
    pub events_capacity: usize,
    /// Maximum simultaneously registered connections.
    pub max_connections: usize,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            buffer_size: 64 * 1024,
            events_capacity: 256,
            max_connections: 64,
        }
    }
}

/// Requests executed on the reactor thread.
pub(crate) enum Command {
    Listen {
        listener: std::net::TcpListener,
        handle: ListenHandle,
        binding: HandlerBinding,
        registered: CompletionHandle,
    },
    Adopt {
        stream: std::net::TcpStream,
        conn: Connection,
        binding: HandlerBinding,
        registered: CompletionHandle,
    },
    Write {
        conn: u64,
        data: Bytes,
        handle: CompletionHandle,
    },
    Flush {
        conn: u64,
    },
    Close {
        conn: u64,
    },
    CloseListener {
        listener: u64,
    },
    Shutdown,
}

/// Cloneable submission side of a reactor.
#[derive(Clone)]
pub struct ReactorHandle {
    tx: Sender<Command>,
    waker: Arc<Waker>,
    next_id: Arc<AtomicU64>,
}

impl ReactorHandle {
    /// Queue a command and wake the poller.
    ///
    /// Returns `false` if the reactor thread is gone.
    pub(crate) fn submit(&self, command: Command) -> bool {
        if self.tx.send(command).is_err() {
            return false;
        }
        if let Err(e) = self.waker.wake() {
            error!(error = %e, "Failed to wake reactor");
            return false;
        }
        true
    }

    /// Allocate an id for a new listener or connection.
    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// A running reactor thread.
pub struct Reactor {
    handle: ReactorHandle,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Reactor {
    /// Spawn the reactor thread.
    pub fn start(config: ReactorConfig) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let (tx, rx) = channel::unbounded();

        let handle = ReactorHandle {
            tx,
            waker,
            next_id: Arc::new(AtomicU64::new(1)),
        };

        let loop_handle = handle.clone();
        let thread = thread::Builder::new()
            .name("reactor".to_string())
            .spawn(move || {
                if let Err(e) = event_loop::run(poll, rx, loop_handle, &config) {
                    error!(error = %e, "Reactor failed");
                }
            })?;

        Ok(Self {
            handle,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn handle(&self) -> &ReactorHandle {
        &self.handle
    }

    /// Close every socket and join the reactor thread.
    pub fn shutdown(&self) {
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        self.handle.submit(Command::Shutdown);
        if thread.join().is_err() {
            error!("Reactor thread panicked");
        }
        debug!("Reactor stopped");
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
