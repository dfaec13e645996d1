//! Readiness-based TCP transport.
//!
//! A single reactor thread (mio: epoll on Linux, kqueue on macOS) owns
//! every socket. User code holds cheap, thread-safe handles:
//! - `ListenHandle`: a bound listener, created by `Listener::bind`
//! - `Connection`: one endpoint of a stream, from `Dialer::connect` or an accept
//! - `CompletionHandle`: outcome of a write, close, or registration
//!
//! Handlers attach through a `HandlerBinding`, which decides whether
//! callbacks run on the reactor thread or on a shared `DispatchPool`.

mod buffer;
mod completion;
mod connection;
mod dialer;
mod dispatch;
mod handler;
mod listener;
mod reactor;
mod token;

pub(crate) use buffer::BufferPool;
pub use completion::CompletionHandle;
pub use connection::{Connection, Role};
pub use dialer::Dialer;
pub use dispatch::DispatchPool;
pub use handler::{HandlerBinding, StreamHandler};
pub use listener::{ListenHandle, Listener};
pub use reactor::{Reactor, ReactorConfig, ReactorHandle};
