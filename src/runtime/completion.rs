//! Completion handles for asynchronous transport operations.
//!
//! A write, close, or registration submitted to the reactor returns a
//! `CompletionHandle` that is completed on the reactor thread. The shared
//! void handle stands in for callers that do not want per-write
//! bookkeeping: completing it is a no-op and it can never be waited on.

use crate::error::{HarnessError, Result};
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

static VOID: Lazy<CompletionHandle> = Lazy::new(|| CompletionHandle {
    inner: Arc::new(Inner {
        void: true,
        outcome: Mutex::new(None),
        done: Condvar::new(),
    }),
});

struct Inner {
    void: bool,
    outcome: Mutex<Option<Result<()>>>,
    done: Condvar,
}

/// Outcome of one transport operation, completed at most once.
#[derive(Clone)]
pub struct CompletionHandle {
    inner: Arc<Inner>,
}

impl CompletionHandle {
    /// Create a fresh, pending handle.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                void: false,
                outcome: Mutex::new(None),
                done: Condvar::new(),
            }),
        }
    }

    /// The process-wide fire-and-forget sentinel.
    pub fn void() -> Self {
        VOID.clone()
    }

    pub fn is_void(&self) -> bool {
        self.inner.void
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &CompletionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn succeed(&self) -> bool {
        self.complete(Ok(()))
    }

    pub(crate) fn fail(&self, err: HarnessError) -> bool {
        self.complete(Err(err))
    }

    /// Record the outcome. Only the first completion counts.
    fn complete(&self, outcome: Result<()>) -> bool {
        if self.inner.void {
            return false;
        }
        let mut slot = self.inner.outcome.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        self.inner.done.notify_all();
        true
    }

    pub fn is_done(&self) -> bool {
        !self.inner.void && self.inner.outcome.lock().is_some()
    }

    /// The outcome, if completed.
    pub fn outcome(&self) -> Option<Result<()>> {
        self.inner.outcome.lock().clone()
    }

    /// Block until completed or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<()> {
        if self.inner.void {
            return Err(HarnessError::Harness(
                "cannot wait on the void completion handle".to_string(),
            ));
        }
        let deadline = Instant::now() + timeout;
        let mut slot = self.inner.outcome.lock();
        while slot.is_none() {
            if self.inner.done.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        match slot.as_ref() {
            Some(outcome) => outcome.clone(),
            None => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("operation did not complete within {timeout:?}"),
            )
            .into()),
        }
    }
}

impl Default for CompletionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.inner.void {
            return f.write_str("CompletionHandle(void)");
        }
        f.debug_struct("CompletionHandle")
            .field("done", &self.is_done())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_void_is_shared_sentinel() {
        let a = CompletionHandle::void();
        let b = CompletionHandle::void();
        assert!(a.ptr_eq(&b));
        assert!(a.is_void());

        // Completing the sentinel is a no-op
        assert!(!a.succeed());
        assert!(!a.is_done());
        assert!(a.wait_timeout(Duration::from_millis(1)).is_err());
    }

    #[test]
    fn test_fresh_handles_are_distinct() {
        let a = CompletionHandle::new();
        let b = CompletionHandle::new();
        assert!(!a.ptr_eq(&b));
        assert!(!a.ptr_eq(&CompletionHandle::void()));
    }

    #[test]
    fn test_first_completion_wins() {
        let handle = CompletionHandle::new();
        assert!(handle.succeed());
        assert!(!handle.fail(HarnessError::closed()));
        assert!(handle.outcome().unwrap().is_ok());
    }

    #[test]
    fn test_wait_across_threads() {
        let handle = CompletionHandle::new();
        let completer = handle.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            completer.fail(HarnessError::closed());
        });

        let result = handle.wait_timeout(Duration::from_secs(5));
        t.join().unwrap();
        assert!(matches!(result, Err(HarnessError::Transport(_))));
    }

    #[test]
    fn test_wait_times_out() {
        let handle = CompletionHandle::new();
        match handle.wait_timeout(Duration::from_millis(10)) {
            Err(HarnessError::Transport(e)) => assert_eq!(e.kind(), io::ErrorKind::TimedOut),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
