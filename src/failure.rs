//! First-failure-wins error holder.

use crate::error::HarnessError;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

/// Holds the first failure reported for one participant.
///
/// The first `record` wins and is never overwritten. Later failures are
/// kept in arrival order for diagnostics only.
#[derive(Debug, Default)]
pub struct FailureSlot {
    first: OnceCell<HarnessError>,
    later: Mutex<Vec<HarnessError>>,
}

impl FailureSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `err`. Returns `true` if it became the slot's failure.
    pub fn record(&self, err: HarnessError) -> bool {
        match self.first.set(err) {
            Ok(()) => true,
            Err(rejected) => {
                self.later.lock().push(rejected);
                false
            }
        }
    }

    pub fn get(&self) -> Option<&HarnessError> {
        self.first.get()
    }

    pub fn is_set(&self) -> bool {
        self.first.get().is_some()
    }

    /// Failures that arrived after the first one.
    pub fn later(&self) -> Vec<HarnessError> {
        self.later.lock().clone()
    }

    /// Total failures reported, including the first.
    pub fn observed(&self) -> usize {
        usize::from(self.is_set()) + self.later.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_first_failure_wins() {
        let slot = FailureSlot::new();
        assert!(!slot.is_set());
        assert_eq!(slot.observed(), 0);

        assert!(slot.record(HarnessError::Verification {
            offset: 3,
            expected: 1,
            actual: 2,
        }));
        assert!(!slot.record(io::Error::from(io::ErrorKind::ConnectionReset).into()));
        assert!(!slot.record(HarnessError::closed()));

        assert!(matches!(
            slot.get(),
            Some(HarnessError::Verification { offset: 3, .. })
        ));
        assert_eq!(slot.observed(), 3);
        assert_eq!(slot.later().len(), 2);
        assert!(slot.later()[0].is_transient());
    }

    #[test]
    fn test_concurrent_record_keeps_exactly_one() {
        let slot = Arc::new(FailureSlot::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let slot = Arc::clone(&slot);
                thread::spawn(move || slot.record(HarnessError::Harness(format!("failure {i}"))))
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(slot.observed(), 8);
    }
}
