//! Error types for the echo harness.
//!
//! Every failure a scenario can observe is one of these variants. They are
//! `Clone` so a captured failure can be read out of its slot by the
//! orchestrator while the slot keeps its copy for diagnostics.

use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for harness operations
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Teardown step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    AcceptedConnection,
    OriginatingConnection,
    Listener,
}

impl std::fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TeardownStep::AcceptedConnection => "accepted connection",
            TeardownStep::OriginatingConnection => "originating connection",
            TeardownStep::Listener => "listener",
        };
        f.write_str(name)
    }
}

/// Main error type for the harness
#[derive(Error, Debug, Clone)]
pub enum HarnessError {
    /// A received byte differs from the payload byte at the same offset
    #[error("verification failed at offset {offset}: expected {expected:#04x}, got {actual:#04x}")]
    Verification {
        /// Absolute offset into the payload
        offset: usize,
        expected: u8,
        actual: u8,
    },

    /// Connection-level I/O error
    #[error("transport error: {0}")]
    Transport(#[source] Arc<io::Error>),

    /// Deadline passed before both sides processed the full payload
    #[error(
        "timed out after {waited:?}: originating={originating}/{total}, accepting={accepting}/{total}"
    )]
    Timeout {
        waited: Duration,
        originating: usize,
        accepting: usize,
        total: usize,
    },

    /// Closing a resource during teardown failed
    #[error("teardown of {step} failed: {message}")]
    Teardown { step: TeardownStep, message: String },

    /// The harness itself broke one of its own contracts
    #[error("harness contract violated: {0}")]
    Harness(String),
}

impl HarnessError {
    /// Error kind name used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            HarnessError::Verification { .. } => "VerificationFailure",
            HarnessError::Transport(_) => "TransportFailure",
            HarnessError::Timeout { .. } => "TimeoutFailure",
            HarnessError::Teardown { .. } => "TeardownFailure",
            HarnessError::Harness(_) => "HarnessFailure",
        }
    }

    /// Transport errors expected when one side closes while the other is
    /// still reading or writing.
    pub fn is_transient(&self) -> bool {
        match self {
            HarnessError::Transport(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }

    pub fn is_verification(&self) -> bool {
        matches!(self, HarnessError::Verification { .. })
    }

    /// Error used to fail writes still queued when a connection closes.
    pub fn closed() -> Self {
        HarnessError::Transport(Arc::new(io::Error::new(
            io::ErrorKind::NotConnected,
            "connection closed",
        )))
    }
}

impl From<io::Error> for HarnessError {
    fn from(e: io::Error) -> Self {
        HarnessError::Transport(Arc::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let reset: HarnessError = io::Error::from(io::ErrorKind::ConnectionReset).into();
        let pipe: HarnessError = io::Error::from(io::ErrorKind::BrokenPipe).into();
        let refused: HarnessError = io::Error::from(io::ErrorKind::ConnectionRefused).into();

        assert!(reset.is_transient());
        assert!(pipe.is_transient());
        assert!(!refused.is_transient());
        assert!(!HarnessError::closed().is_transient());

        let mismatch = HarnessError::Verification {
            offset: 1,
            expected: 0,
            actual: 1,
        };
        assert!(!mismatch.is_transient());
        assert!(mismatch.is_verification());
    }

    #[test]
    fn test_display() {
        let err = HarnessError::Verification {
            offset: 12345,
            expected: 0xab,
            actual: 0x54,
        };
        assert_eq!(
            err.to_string(),
            "verification failed at offset 12345: expected 0xab, got 0x54"
        );
        assert_eq!(err.kind(), "VerificationFailure");

        let err = HarnessError::Teardown {
            step: TeardownStep::Listener,
            message: "close timed out".to_string(),
        };
        assert_eq!(err.to_string(), "teardown of listener failed: close timed out");
    }
}
