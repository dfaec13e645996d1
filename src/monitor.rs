//! Completion detection across the callback and control threads.
//!
//! Participants update their atomics and then `notify` the shared signal;
//! the control thread re-checks both participants every time it wakes.
//! Notifications bump a generation under the same mutex the waiter holds
//! while checking, so an update can never slip between check and wait.
//! Each wait is bounded by the poll interval as a backstop.

use crate::error::{HarnessError, Result};
use crate::participant::EchoParticipant;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Wakeup channel from participants to the monitor.
#[derive(Debug, Default)]
pub struct CompletionSignal {
    generation: Mutex<u64>,
    changed: Condvar,
}

impl CompletionSignal {
    pub fn notify(&self) {
        let mut generation = self.generation.lock();
        *generation += 1;
        self.changed.notify_all();
    }
}

/// How a monitored run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Both participants processed the full payload.
    Completed,
    /// A failure slot was set before completion.
    Failed,
}

/// Waits for two participants to finish.
#[derive(Debug, Default)]
pub struct CompletionMonitor {
    signal: Arc<CompletionSignal>,
}

impl CompletionMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal to hand to participants observed by this monitor.
    pub fn signal(&self) -> Arc<CompletionSignal> {
        Arc::clone(&self.signal)
    }

    /// Block until both counters reach `total`, either failure slot is set,
    /// or `deadline` passes.
    ///
    /// Failure takes precedence over completion: a run whose counters are
    /// full but whose slot is set reports `Failed`.
    pub fn await_completion(
        &self,
        originating: &EchoParticipant,
        accepting: &EchoParticipant,
        total: usize,
        poll_interval: Duration,
        deadline: Instant,
    ) -> Result<Completion> {
        let started = Instant::now();
        let poll_interval = poll_interval.max(Duration::from_millis(1));
        let mut generation = self.signal.generation.lock();

        loop {
            if originating.failure().is_set() || accepting.failure().is_set() {
                debug!(waited = ?started.elapsed(), "Participant failed, stop waiting");
                return Ok(Completion::Failed);
            }
            if originating.received() >= total && accepting.received() >= total {
                debug!(waited = ?started.elapsed(), "Both participants complete");
                return Ok(Completion::Completed);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(HarnessError::Timeout {
                    waited: started.elapsed(),
                    originating: originating.received(),
                    accepting: accepting.received(),
                    total,
                });
            }

            let wake_at = (now + poll_interval).min(deadline);
            let timed_out = self
                .signal
                .changed
                .wait_until(&mut generation, wake_at)
                .timed_out();
            trace!(generation = *generation, timed_out, "Monitor woke");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Payload;
    use std::thread;

    fn pair(
        monitor: &CompletionMonitor,
        payload: &Payload,
    ) -> (Arc<EchoParticipant>, Arc<EchoParticipant>) {
        let originating = EchoParticipant::new("client", payload.clone(), monitor.signal());
        let accepting = EchoParticipant::new("server", payload.clone(), monitor.signal());
        (Arc::new(originating), Arc::new(accepting))
    }

    #[test]
    fn test_completes_when_both_counters_full() {
        let payload = Payload::generate(1, 4096);
        let monitor = CompletionMonitor::new();
        let (originating, accepting) = pair(&monitor, &payload);

        let sides = [Arc::clone(&accepting), Arc::clone(&originating)];
        let echoed = payload.clone();
        let feeder = thread::spawn(move || {
            for participant in &sides {
                thread::sleep(Duration::from_millis(20));
                participant.verify_and_count(echoed.as_slice()).unwrap();
            }
        });

        let outcome = monitor.await_completion(
            &originating,
            &accepting,
            payload.len(),
            Duration::from_secs(1),
            Instant::now() + Duration::from_secs(10),
        );
        feeder.join().unwrap();

        assert_eq!(outcome.unwrap(), Completion::Completed);
    }

    #[test]
    fn test_returns_early_on_failure() {
        let payload = Payload::generate(1, 4096);
        let monitor = CompletionMonitor::new();
        let (originating, accepting) = pair(&monitor, &payload);

        let a = Arc::clone(&accepting);
        let failer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            a.record_failure(HarnessError::Harness("injected".to_string()));
        });

        let started = Instant::now();
        let outcome = monitor.await_completion(
            &originating,
            &accepting,
            payload.len(),
            Duration::from_secs(5),
            Instant::now() + Duration::from_secs(30),
        );
        failer.join().unwrap();

        assert_eq!(outcome.unwrap(), Completion::Failed);
        // Woken by the signal, not by the poll interval
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_deadline_is_a_timeout_failure() {
        let payload = Payload::generate(1, 4096);
        let monitor = CompletionMonitor::new();
        let (originating, accepting) = pair(&monitor, &payload);
        accepting
            .verify_and_count(&payload.as_slice()[..100])
            .unwrap();

        let outcome = monitor.await_completion(
            &originating,
            &accepting,
            payload.len(),
            Duration::from_millis(5),
            Instant::now() + Duration::from_millis(30),
        );

        match outcome {
            Err(HarnessError::Timeout {
                originating,
                accepting,
                total,
                ..
            }) => {
                assert_eq!(originating, 0);
                assert_eq!(accepting, 100);
                assert_eq!(total, 4096);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
