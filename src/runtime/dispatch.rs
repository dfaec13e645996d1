//! Worker pool for offloaded handler execution.
//!
//! Callbacks for one connection are always routed to the same worker, so a
//! handler observes its events in delivery order even when it does not run
//! on the reactor thread.

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolInner {
    senders: Mutex<Option<Vec<Sender<Job>>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    workers: usize,
}

/// Shared pool of dispatch threads.
///
/// Cloning is cheap; all clones refer to the same workers.
#[derive(Clone)]
pub struct DispatchPool {
    inner: Arc<PoolInner>,
}

impl DispatchPool {
    /// Spawn `workers` dispatch threads (at least one).
    pub fn new(workers: usize) -> io::Result<Self> {
        let workers = workers.max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for worker_id in 0..workers {
            let (tx, rx) = channel::unbounded::<Job>();
            let handle = thread::Builder::new()
                .name(format!("dispatch-{worker_id}"))
                .spawn(move || {
                    for job in rx.iter() {
                        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                            error!(worker = worker_id, "Dispatched callback panicked");
                        }
                    }
                    debug!(worker = worker_id, "Dispatch worker stopped");
                })?;
            senders.push(tx);
            handles.push(handle);
        }

        Ok(Self {
            inner: Arc::new(PoolInner {
                senders: Mutex::new(Some(senders)),
                handles: Mutex::new(handles),
                workers,
            }),
        })
    }

    pub fn workers(&self) -> usize {
        self.inner.workers
    }

    /// Queue `job` on the worker owning `key`.
    ///
    /// Returns `false` if the pool has been shut down.
    pub fn execute<F>(&self, key: u64, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let senders = self.inner.senders.lock();
        let Some(senders) = senders.as_ref() else {
            warn!(key, "Dispatch pool is shut down, dropping callback");
            return false;
        };
        let idx = (key % senders.len() as u64) as usize;
        senders[idx].send(Box::new(job)).is_ok()
    }

    /// Stop accepting work, drain queued callbacks and join the workers.
    pub fn shutdown(&self) {
        // Dropping the senders ends each worker's receive loop
        drop(self.inner.senders.lock().take());
        let handles = std::mem::take(&mut *self.inner.handles.lock());
        for handle in handles {
            if handle.join().is_err() {
                error!("Dispatch worker panicked during shutdown");
            }
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.senders.lock().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_per_key_ordering() {
        let pool = DispatchPool::new(3).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..100 {
            let seen = Arc::clone(&seen);
            assert!(pool.execute(7, move || seen.lock().push(i)));
        }
        pool.shutdown();

        let seen = seen.lock();
        assert_eq!(*seen, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_same_key_same_thread() {
        let pool = DispatchPool::new(4).unwrap();
        let names = Arc::new(Mutex::new(Vec::new()));

        for _ in 0..10 {
            let names = Arc::clone(&names);
            pool.execute(5, move || {
                names
                    .lock()
                    .push(thread::current().name().map(str::to_string));
            });
        }
        pool.shutdown();

        let names = names.lock();
        assert!(names.iter().all(|n| *n == names[0]));
        assert_eq!(names[0].as_deref(), Some("dispatch-1"));
    }

    #[test]
    fn test_execute_after_shutdown() {
        let pool = DispatchPool::new(1).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        pool.shutdown();
        assert!(pool.is_shutdown());

        let counter = Arc::clone(&ran);
        assert!(!pool.execute(0, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let pool = DispatchPool::new(1).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        pool.execute(0, || panic!("boom"));
        let counter = Arc::clone(&ran);
        pool.execute(0, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        pool.shutdown();

        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
