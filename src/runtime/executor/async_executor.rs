//! Fire-and-forget execution on one fresh thread per call.
//!
//! Spawned threads are tracked in a slab keyed by stable tokens. A finished
//! worker posts a reap task carrying its token to the collector lane, which
//! removes the handle and joins the thread. Dropping the executor waits until
//! every dispatched call has finished and been reaped.
//!
//! Dispatched work is not guarded: a panicking call unwinds its own thread,
//! still gets reaped, and the panic is reported to the failure sink when the
//! thread is joined.

use super::active_object::{ActiveObject, LaneHandle};
use super::{default_failure_sink, panic_message, FailureSink, Scheduler, Task, TaskFailure};
use crate::runtime::error::ExecutorError;
use parking_lot::{Condvar, Mutex};
use slab::Slab;
use std::sync::Arc;
use std::thread::JoinHandle;

struct ThreadRegistry {
    name: Arc<str>,
    threads: Mutex<Slab<JoinHandle<()>>>,
    drained: Condvar,
    sink: FailureSink,
}

impl ThreadRegistry {
    /// Remove the handle behind `key` and join it.
    fn reap(&self, key: usize) {
        let handle = {
            let mut threads = self.threads.lock();
            let handle = threads.contains(key).then(|| threads.remove(key));
            self.drained.notify_all();
            handle
        };

        match handle {
            Some(handle) => {
                if let Err(payload) = handle.join() {
                    (self.sink)(TaskFailure {
                        lane: self.name.to_string(),
                        message: panic_message(payload.as_ref()),
                    });
                }
            }
            None => tracing::warn!(executor = %self.name, key, "reap for unknown worker"),
        }
    }

    /// Block until every worker has been reaped.
    ///
    /// When called from one of the workers, that worker is left out of the
    /// wait and its handle is detached.
    fn wait_until_empty(&self) {
        let current = std::thread::current().id();
        let mut threads = self.threads.lock();
        let own = threads
            .iter()
            .any(|(_, handle)| handle.thread().id() == current);
        if own {
            tracing::warn!(executor = %self.name, "executor dropped from its own worker");
        }
        let remaining = usize::from(own);
        while threads.len() > remaining {
            self.drained.wait(&mut threads);
        }
    }

    fn live(&self) -> usize {
        self.threads.lock().len()
    }
}

/// Posts the reap task when the worker body returns or unwinds.
struct ReapOnExit {
    key: usize,
    registry: Arc<ThreadRegistry>,
    collector: LaneHandle,
}

impl Drop for ReapOnExit {
    fn drop(&mut self) {
        let registry = self.registry.clone();
        let key = self.key;
        if self.collector.post(move || registry.reap(key)).is_err() {
            tracing::error!(executor = %self.registry.name, key, "collector gone before reap");
        }
    }
}

/// Runs each dispatched call on its own thread.
pub struct AsyncExecutor {
    registry: Arc<ThreadRegistry>,
    collector: ActiveObject,
}

impl AsyncExecutor {
    pub fn new(name: &str) -> Result<Self, ExecutorError> {
        Self::with_sink(name, default_failure_sink())
    }

    pub fn with_sink(name: &str, sink: FailureSink) -> Result<Self, ExecutorError> {
        let collector = ActiveObject::spawn_with_sink(&format!("{}-collector", name), sink.clone())?;
        Ok(Self {
            registry: Arc::new(ThreadRegistry {
                name: Arc::from(name),
                threads: Mutex::new(Slab::new()),
                drained: Condvar::new(),
                sink,
            }),
            collector,
        })
    }

    /// Start `call` on a new thread.
    pub fn dispatch<F>(&self, call: F) -> Result<(), ExecutorError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut threads = self.registry.threads.lock();
        let entry = threads.vacant_entry();
        let key = entry.key();
        let registry = self.registry.clone();
        let collector = self.collector.handle();

        // The token is recorded while the registry lock is held, so a reap
        // for this worker cannot run before the handle is inserted.
        let handle = std::thread::Builder::new()
            .name(format!("{}-worker", self.registry.name))
            .spawn(move || {
                let _reaper = ReapOnExit {
                    key,
                    registry,
                    collector,
                };
                call();
            })
            .map_err(|e| ExecutorError::Spawn(e.to_string()))?;
        entry.insert(handle);
        Ok(())
    }

    /// Number of dispatched calls not yet reaped.
    pub fn live_threads(&self) -> usize {
        self.registry.live()
    }
}

impl Drop for AsyncExecutor {
    fn drop(&mut self) {
        self.registry.wait_until_empty();
        tracing::trace!(executor = %self.registry.name, "executor drained");
    }
}

/// An [`AsyncExecutor`] that can be switched off once.
///
/// After [`invalidate`](Self::invalidate) every dispatch is rejected.
pub struct OptionalAsyncExecutor {
    name: String,
    inner: Mutex<Option<AsyncExecutor>>,
}

impl OptionalAsyncExecutor {
    pub fn new(name: &str) -> Result<Self, ExecutorError> {
        Self::with_sink(name, default_failure_sink())
    }

    pub fn with_sink(name: &str, sink: FailureSink) -> Result<Self, ExecutorError> {
        Ok(Self {
            name: name.to_string(),
            inner: Mutex::new(Some(AsyncExecutor::with_sink(name, sink)?)),
        })
    }

    pub fn dispatch<F>(&self, call: F) -> Result<(), ExecutorError>
    where
        F: FnOnce() + Send + 'static,
    {
        match self.inner.lock().as_ref() {
            Some(executor) => executor.dispatch(call),
            None => {
                tracing::debug!(executor = %self.name, "dispatch after invalidation ignored");
                Err(ExecutorError::Stopped)
            }
        }
    }

    /// Stop accepting work and wait for everything already dispatched.
    pub fn invalidate(&self) {
        let executor = self.inner.lock().take();
        // Dropped outside the lock: running calls may still try to dispatch.
        drop(executor);
    }

    pub fn is_valid(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Scheduler that dispatches through this executor.
    pub fn scheduler(self: &Arc<Self>) -> Scheduler {
        let executor = self.clone();
        Arc::new(move |task: Task| {
            let _ = executor.dispatch(task);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::recording_sink;
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_each_call_runs_on_distinct_thread() {
        const CALLS: usize = 8;
        let barrier = Arc::new(Barrier::new(CALLS));
        let threads = Arc::new(Mutex::new(HashSet::new()));

        let executor = AsyncExecutor::new("distinct").unwrap();
        for _ in 0..CALLS {
            let barrier = barrier.clone();
            let threads = threads.clone();
            executor
                .dispatch(move || {
                    threads.lock().insert(thread::current().id());
                    // All calls are alive at the same time.
                    barrier.wait();
                })
                .unwrap();
        }
        drop(executor);

        let threads = threads.lock();
        assert_eq!(threads.len(), CALLS);
        assert!(!threads.contains(&thread::current().id()));
    }

    #[test]
    fn test_drop_waits_for_all_calls_and_reaps() {
        let done = Arc::new(AtomicUsize::new(0));
        let executor = AsyncExecutor::new("drain").unwrap();
        for i in 0..5 {
            let done = done.clone();
            executor
                .dispatch(move || {
                    thread::sleep(Duration::from_millis(10 * i));
                    done.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        drop(executor);
        assert_eq!(done.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_finished_threads_are_reaped() {
        let executor = AsyncExecutor::new("reap").unwrap();
        executor.dispatch(|| {}).unwrap();
        for _ in 0..100 {
            if executor.live_threads() == 0 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(executor.live_threads(), 0);
    }

    #[test]
    fn test_panicking_call_is_reaped_and_reported() {
        let (sink, failures) = recording_sink();
        let executor = AsyncExecutor::with_sink("panics", sink).unwrap();
        executor.dispatch(|| panic!("worker blew up")).unwrap();
        drop(executor);

        let failures = failures.lock();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].message, "worker blew up");
    }

    #[test]
    fn test_dispatch_from_dispatched_call() {
        let executor = Arc::new(OptionalAsyncExecutor::new("nested").unwrap());
        let done = Arc::new(AtomicUsize::new(0));
        {
            let inner_executor = executor.clone();
            let done = done.clone();
            executor
                .dispatch(move || {
                    let done = done.clone();
                    inner_executor
                        .dispatch(move || {
                            done.fetch_add(1, Ordering::SeqCst);
                        })
                        .unwrap();
                })
                .unwrap();
        }
        for _ in 0..200 {
            if done.load(Ordering::SeqCst) == 1 {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        executor.invalidate();
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalidate_from_dispatched_call() {
        let executor = Arc::new(OptionalAsyncExecutor::new("self-invalidating").unwrap());
        let (tx, rx) = mpsc::channel();
        {
            let inner = executor.clone();
            executor
                .dispatch(move || {
                    inner.invalidate();
                    let _ = tx.send(inner.is_valid());
                })
                .unwrap();
        }

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(false));
        assert_eq!(executor.dispatch(|| {}), Err(ExecutorError::Stopped));
    }

    #[test]
    fn test_optional_executor_rejects_after_invalidate() {
        let executor = Arc::new(OptionalAsyncExecutor::new("optional").unwrap());
        let ran = Arc::new(AtomicUsize::new(0));
        {
            let ran = ran.clone();
            executor
                .dispatch(move || {
                    thread::sleep(Duration::from_millis(20));
                    ran.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        executor.invalidate();
        assert!(!executor.is_valid());
        // Invalidation waited for the running call.
        assert_eq!(ran.load(Ordering::SeqCst), 1);

        assert_eq!(executor.dispatch(|| {}), Err(ExecutorError::Stopped));
        let scheduler = executor.scheduler();
        scheduler(Box::new(|| panic!("must not run")));
        executor.invalidate();
    }
}
