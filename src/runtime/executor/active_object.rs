//! Single worker thread executing posted tasks in order.
//!
//! Dropping an [`ActiveObject`] closes its queue with a stop marker and joins
//! the worker, so every task accepted before the drop runs first. Posts that
//! arrive after the drop has begun are rejected with
//! [`ExecutorError::Stopped`].

use super::task_queue::SynchronizedTaskQueue;
use super::{default_failure_sink, is_current_thread, run_guarded, FailureSink, Scheduler, Task};
use crate::runtime::error::ExecutorError;
use std::sync::Arc;
use std::thread::JoinHandle;

enum LaneMessage {
    Run(Task),
    Stop,
}

/// Cloneable posting handle for an [`ActiveObject`].
///
/// Holding a handle does not keep the worker thread alive; once the owning
/// object is dropped every post is rejected.
#[derive(Clone)]
pub struct LaneHandle {
    name: Arc<str>,
    queue: Arc<SynchronizedTaskQueue<LaneMessage>>,
}

impl LaneHandle {
    /// Enqueue a task on the lane.
    pub fn post<F>(&self, task: F) -> Result<(), ExecutorError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.post_task(Box::new(task))
    }

    pub fn post_task(&self, task: Task) -> Result<(), ExecutorError> {
        self.queue.push(LaneMessage::Run(task)).map_err(|_| {
            tracing::debug!(lane = %self.name, "rejected task posted after shutdown");
            ExecutorError::Stopped
        })
    }

    /// Scheduler that posts onto this lane; rejected tasks are dropped.
    pub fn scheduler(&self) -> Scheduler {
        let handle = self.clone();
        Arc::new(move |task: Task| {
            let _ = handle.post_task(task);
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

/// Owns one dedicated worker thread and the queue feeding it.
pub struct ActiveObject {
    handle: LaneHandle,
    worker: Option<JoinHandle<()>>,
}

impl ActiveObject {
    /// Start a lane whose panicking tasks are logged.
    pub fn spawn(name: &str) -> Result<Self, ExecutorError> {
        Self::spawn_with_sink(name, default_failure_sink())
    }

    /// Start a lane whose panicking tasks are reported to `sink`.
    pub fn spawn_with_sink(name: &str, sink: FailureSink) -> Result<Self, ExecutorError> {
        let handle = LaneHandle {
            name: Arc::from(name),
            queue: Arc::new(SynchronizedTaskQueue::new()),
        };

        let queue = handle.queue.clone();
        let lane = handle.name.clone();
        let worker = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || loop {
                match queue.pop_blocking() {
                    LaneMessage::Run(task) => run_guarded(&lane, task, &sink),
                    LaneMessage::Stop => {
                        tracing::trace!(lane = %lane, "lane stopped");
                        break;
                    }
                }
            })
            .map_err(|e| ExecutorError::Spawn(format!("{}: {}", name, e)))?;

        Ok(Self {
            handle,
            worker: Some(worker),
        })
    }

    /// Enqueue a task. Never blocks beyond the queue lock.
    pub fn post<F>(&self, task: F) -> Result<(), ExecutorError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.post(task)
    }

    pub fn handle(&self) -> LaneHandle {
        self.handle.clone()
    }

    pub fn scheduler(&self) -> Scheduler {
        self.handle.scheduler()
    }
}

impl Drop for ActiveObject {
    fn drop(&mut self) {
        self.handle.queue.close_with(LaneMessage::Stop);
        if let Some(worker) = self.worker.take() {
            if is_current_thread(&worker) {
                tracing::warn!(
                    lane = %self.handle.name,
                    "lane dropped from its own worker; detaching instead of joining"
                );
                return;
            }
            if worker.join().is_err() {
                tracing::error!(lane = %self.handle.name, "lane worker terminated abnormally");
            }
        }
    }
}
