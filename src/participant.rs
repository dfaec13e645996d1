//! Role-aware echo participant.
//!
//! The same handler type sits on both ends of the connection. Every byte
//! it receives is checked against the payload at the participant's running
//! offset; only the accepting end sends the bytes back. Keeping one type
//! means the byte comparison cannot drift between the two sides.

use crate::error::{HarnessError, Result};
use crate::failure::FailureSlot;
use crate::monitor::CompletionSignal;
use crate::payload::Payload;
use crate::runtime::{Connection, Role, StreamHandler};
use bytes::Bytes;
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// One end of an echo run.
pub struct EchoParticipant {
    label: &'static str,
    /// What this participant expects to receive.
    expected: Payload,
    /// Bytes verified so far. Written only from the callback context.
    received: AtomicUsize,
    endpoint: OnceCell<Connection>,
    failure: FailureSlot,
    signal: Arc<CompletionSignal>,
    /// Whether the accepting role sends received bytes back.
    echo: bool,
}

impl EchoParticipant {
    pub fn new(label: &'static str, expected: Payload, signal: Arc<CompletionSignal>) -> Self {
        Self {
            label,
            expected,
            received: AtomicUsize::new(0),
            endpoint: OnceCell::new(),
            failure: FailureSlot::new(),
            signal,
            echo: true,
        }
    }

    /// Expect a flipped byte at `offset`, so the real payload mismatches there.
    pub fn with_forced_mismatch(mut self, offset: usize) -> Self {
        self.expected = self.expected.corrupted_at(offset);
        self
    }

    /// Verify and count in the accepting role, but never send anything back.
    pub fn without_echo(mut self) -> Self {
        self.echo = false;
        self
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn received(&self) -> usize {
        self.received.load(Ordering::Acquire)
    }

    pub fn failure(&self) -> &FailureSlot {
        &self.failure
    }

    /// The bound endpoint, once activated.
    pub fn endpoint(&self) -> Option<&Connection> {
        self.endpoint.get()
    }

    /// Check `chunk` against the payload at the current offset.
    fn verify(&self, chunk: &[u8]) -> Result<()> {
        let offset = self.received();
        let expected = self.expected.as_slice();
        let end = offset + chunk.len();

        if end > expected.len() {
            return Err(HarnessError::Harness(format!(
                "{} received {} bytes past the end of the {}-byte payload",
                self.label,
                end - expected.len(),
                expected.len()
            )));
        }

        let window = &expected[offset..end];
        match window.iter().zip(chunk).position(|(e, a)| e != a) {
            Some(i) => Err(HarnessError::Verification {
                offset: offset + i,
                expected: window[i],
                actual: chunk[i],
            }),
            None => Ok(()),
        }
    }

    fn advance(&self, n: usize) {
        let total = self.received.fetch_add(n, Ordering::AcqRel) + n;
        if total >= self.expected.len() {
            debug!(participant = self.label, bytes = total, "Participant complete");
            self.signal.notify();
        }
    }

    /// Verify `chunk` and count it, without any retransmit.
    pub fn verify_and_count(&self, chunk: &[u8]) -> Result<()> {
        self.verify(chunk)?;
        self.advance(chunk.len());
        Ok(())
    }

    /// Record `cause` in the failure slot. On the first failure the bound
    /// endpoint is closed and the monitor is woken.
    pub fn record_failure(&self, cause: HarnessError) -> bool {
        let role = self.endpoint().map(|conn| conn.role());
        let kind = cause.kind();
        let message = cause.to_string();

        if !self.failure.record(cause) {
            debug!(
                participant = self.label,
                kind,
                error = %message,
                "Follow-up failure recorded"
            );
            return false;
        }

        error!(
            participant = self.label,
            role = ?role,
            offset = self.received(),
            kind,
            error = %message,
            "Participant failed"
        );
        if let Some(endpoint) = self.endpoint() {
            endpoint.close();
        }
        self.signal.notify();
        true
    }
}

impl StreamHandler for EchoParticipant {
    fn on_activate(&self, conn: &Connection) {
        if self.endpoint.set(conn.clone()).is_err() {
            self.record_failure(HarnessError::Harness(format!(
                "{} activated twice",
                self.label
            )));
            return;
        }
        debug!(
            participant = self.label,
            conn = conn.id(),
            role = %conn.role(),
            "Participant active"
        );
    }

    fn on_receive(&self, _conn: &Connection, chunk: Bytes) -> Result<()> {
        // Echo stops once this side has failed
        if self.failure.is_set() {
            return Ok(());
        }
        let Some(endpoint) = self.endpoint() else {
            return Err(HarnessError::Harness(format!(
                "{} received data before activation",
                self.label
            )));
        };

        self.verify(&chunk)?;

        let len = chunk.len();
        match endpoint.role() {
            Role::Accepting if self.echo => {
                endpoint.write(chunk);
            }
            Role::Accepting | Role::Originating => {}
        }

        self.advance(len);
        Ok(())
    }

    fn on_receive_complete(&self, _conn: &Connection) {
        if let Some(endpoint) = self.endpoint() {
            endpoint.flush();
        }
    }

    fn on_inactive(&self, conn: &Connection) {
        debug!(
            participant = self.label,
            conn = conn.id(),
            received = self.received(),
            "Peer closed"
        );
    }

    fn on_failure(&self, conn: &Connection, cause: HarnessError) {
        if self.endpoint().is_none() {
            warn!(
                participant = self.label,
                conn = conn.id(),
                "Failure before activation"
            );
        }
        self.record_failure(cause);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(payload: &Payload) -> EchoParticipant {
        EchoParticipant::new("test", payload.clone(), Arc::new(CompletionSignal::default()))
    }

    #[test]
    fn test_verifies_at_running_offset() {
        let payload = Payload::generate(5, 1000);
        let p = participant(&payload);

        p.verify_and_count(&payload.as_slice()[..300]).unwrap();
        p.verify_and_count(&payload.as_slice()[300..301]).unwrap();
        p.verify_and_count(&payload.as_slice()[301..]).unwrap();

        assert_eq!(p.received(), 1000);
    }

    #[test]
    fn test_mismatch_reports_absolute_offset() {
        let payload = Payload::generate(5, 1000);
        let p = participant(&payload);
        p.verify_and_count(&payload.as_slice()[..500]).unwrap();

        let mut chunk = payload.as_slice()[500..600].to_vec();
        chunk[17] ^= 0xff;

        match p.verify_and_count(&chunk) {
            Err(HarnessError::Verification {
                offset,
                expected,
                actual,
            }) => {
                assert_eq!(offset, 517);
                assert_eq!(expected, payload.as_slice()[517]);
                assert_eq!(actual, !payload.as_slice()[517]);
            }
            other => panic!("unexpected: {:?}", other),
        }
        // A failed chunk is not counted
        assert_eq!(p.received(), 500);
    }

    #[test]
    fn test_wrong_offset_is_detected() {
        let payload = Payload::generate(5, 1000);
        let p = participant(&payload);

        // Skipping ahead is as wrong as corrupting
        let result = p.verify_and_count(&payload.as_slice()[1..11]);
        assert!(matches!(result, Err(HarnessError::Verification { .. })));
    }

    #[test]
    fn test_overrun_is_harness_failure() {
        let payload = Payload::generate(5, 10);
        let p = participant(&payload);
        p.verify_and_count(payload.as_slice()).unwrap();

        let result = p.verify_and_count(&[0u8; 1]);
        assert!(matches!(result, Err(HarnessError::Harness(_))));
    }

    #[test]
    fn test_forced_mismatch() {
        let payload = Payload::generate(5, 20000);
        let p = participant(&payload).with_forced_mismatch(12345);

        match p.verify_and_count(payload.as_slice()) {
            Err(HarnessError::Verification { offset, .. }) => assert_eq!(offset, 12345),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_record_failure_first_wins() {
        let payload = Payload::generate(5, 10);
        let p = participant(&payload);

        assert!(p.record_failure(HarnessError::Harness("first".to_string())));
        assert!(!p.record_failure(HarnessError::closed()));

        assert!(matches!(p.failure().get(), Some(HarnessError::Harness(m)) if m == "first"));
        assert_eq!(p.failure().observed(), 2);
    }
}
