//! echo-harness: lossless bidirectional echo over a readiness-based TCP
//! transport.
//!
//! One connection is opened over loopback. The originating side streams a
//! deterministic payload in random slices, the accepting side verifies and
//! echoes every byte, and the originating side verifies the echo. Each run
//! covers inline and offloaded callback dispatch, with acknowledged and
//! fire-and-forget writes.

pub mod config;
pub mod error;
pub mod failure;
pub mod matrix;
pub mod monitor;
pub mod participant;
pub mod payload;
pub mod runtime;
pub mod scenario;
pub mod teardown;

pub use config::{Config, ConfigError};
pub use error::{HarnessError, Result};
pub use matrix::ScenarioMatrix;
pub use participant::EchoParticipant;
pub use payload::Payload;
pub use scenario::{
    DispatchMode, FaultInjection, ParticipantSummary, RunConfiguration, ScenarioReport, SendMode,
};
