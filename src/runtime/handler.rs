//! Handler callbacks and their attachment to a connection.

use crate::error::{HarnessError, Result};
use crate::runtime::{Connection, DispatchPool};
use bytes::Bytes;
use std::sync::Arc;
use tracing::warn;

/// Callbacks invoked by the reactor for one connection.
///
/// Implementations are shared between threads: with an offloaded binding
/// the callbacks run on a dispatch worker instead of the reactor thread.
pub trait StreamHandler: Send + Sync + 'static {
    /// The connection is registered and ready for I/O.
    fn on_activate(&self, conn: &Connection);

    /// Bytes read from the socket. An `Err` is routed to `on_failure`.
    fn on_receive(&self, conn: &Connection, chunk: Bytes) -> Result<()>;

    /// End of one read batch; the socket would block.
    fn on_receive_complete(&self, _conn: &Connection) {}

    /// The peer closed the stream.
    fn on_inactive(&self, _conn: &Connection) {}

    fn on_failure(&self, conn: &Connection, cause: HarnessError);
}

/// Event delivered to a handler.
#[derive(Debug)]
pub(crate) enum Event {
    Active,
    Receive(Bytes),
    ReceiveComplete,
    Inactive,
    Failure(HarnessError),
}

/// A handler plus the context its callbacks execute in.
#[derive(Clone)]
pub struct HandlerBinding {
    handler: Arc<dyn StreamHandler>,
    pool: Option<DispatchPool>,
}

impl HandlerBinding {
    /// Run callbacks directly on the reactor thread.
    pub fn inline<H: StreamHandler>(handler: Arc<H>) -> Self {
        Self {
            handler,
            pool: None,
        }
    }

    /// Run callbacks on `pool`, preserving per-connection order.
    pub fn offloaded<H: StreamHandler>(pool: DispatchPool, handler: Arc<H>) -> Self {
        Self {
            handler,
            pool: Some(pool),
        }
    }

    pub fn is_offloaded(&self) -> bool {
        self.pool.is_some()
    }

    pub(crate) fn fire(&self, conn: &Connection, event: Event) {
        match &self.pool {
            None => invoke(self.handler.as_ref(), conn, event),
            Some(pool) => {
                let handler = Arc::clone(&self.handler);
                let target = conn.clone();
                if !pool.execute(conn.id(), move || invoke(handler.as_ref(), &target, event)) {
                    warn!(conn = conn.id(), "Callback dropped, dispatch pool unavailable");
                }
            }
        }
    }
}

fn invoke(handler: &dyn StreamHandler, conn: &Connection, event: Event) {
    match event {
        Event::Active => handler.on_activate(conn),
        Event::Receive(chunk) => {
            if let Err(e) = handler.on_receive(conn, chunk) {
                handler.on_failure(conn, e);
            }
        }
        Event::ReceiveComplete => handler.on_receive_complete(conn),
        Event::Inactive => handler.on_inactive(conn),
        Event::Failure(cause) => handler.on_failure(conn, cause),
    }
}
