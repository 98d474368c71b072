//! Execution primitives for work that happens off the caller's thread.
//!
//! Three kinds of lanes are provided:
//! - [`ActiveObject`]: one worker thread running posted tasks in order.
//! - [`AsyncExecutor`]: one fresh thread per dispatched call, reaped by an
//!   internal collector lane.
//! - [`TimerThread`]: one thread firing callbacks from a min-heap of fire times.
//!
//! Panics inside lane tasks never take the lane down. They are reported to a
//! [`FailureSink`], which logs through `tracing` unless one is injected.

pub mod active_object;
pub mod async_executor;
pub mod task_queue;
pub mod timer;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

pub use active_object::{ActiveObject, LaneHandle};
pub use async_executor::{AsyncExecutor, OptionalAsyncExecutor};
pub use task_queue::SynchronizedTaskQueue;
pub use timer::{Timer, TimerThread};

/// Deferred unit of work, consumed exactly once.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Decides where deferred callbacks run.
pub type Scheduler = Arc<dyn Fn(Task) + Send + Sync>;

/// A task that panicked inside a lane.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub lane: String,
    pub message: String,
}

/// Receives failures caught at lane boundaries.
pub type FailureSink = Arc<dyn Fn(TaskFailure) + Send + Sync>;

/// Sink that reports failures through `tracing`.
pub fn default_failure_sink() -> FailureSink {
    Arc::new(|failure: TaskFailure| {
        tracing::error!(lane = %failure.lane, "task panicked: {}", failure.message);
    })
}

/// Run `task`, reporting a panic to `sink` instead of unwinding.
pub(crate) fn run_guarded(lane: &str, task: Task, sink: &FailureSink) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
        sink(TaskFailure {
            lane: lane.to_string(),
            message: panic_message(payload.as_ref()),
        });
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// True when called from the thread behind `handle`.
pub(crate) fn is_current_thread<T>(handle: &std::thread::JoinHandle<T>) -> bool {
    handle.thread().id() == std::thread::current().id()
}
