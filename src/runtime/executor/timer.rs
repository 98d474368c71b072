//! Timer thread driving a min-heap of fire times.

use super::{default_failure_sink, is_current_thread, run_guarded, FailureSink, Task};
use crate::runtime::error::ExecutorError;
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Injectable timer substrate.
pub trait Timer: Send + Sync {
    /// Run `callback` once `timeout` has elapsed.
    fn set_timer(&self, timeout: Duration, callback: Task);
}

struct TimerEntry {
    fire_at: Instant,
    seq: u64,
    callback: Task,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    // Reversed so the max-heap yields the earliest entry; ties fall back to
    // insertion order.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct TimerState {
    heap: BinaryHeap<TimerEntry>,
    next_seq: u64,
    stopped: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    wake: Condvar,
}

/// Default [`Timer`]: a dedicated thread firing callbacks in fire-time order.
///
/// Callbacks run with the internal lock released and may schedule further
/// timers. Dropping the timer abandons every pending entry; no callback starts
/// after the drop returns.
pub struct TimerThread {
    shared: Arc<TimerShared>,
    worker: Option<JoinHandle<()>>,
}

impl TimerThread {
    pub fn new() -> Result<Self, ExecutorError> {
        Self::with_sink(default_failure_sink())
    }

    pub fn with_sink(sink: FailureSink) -> Result<Self, ExecutorError> {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState {
                heap: BinaryHeap::new(),
                next_seq: 0,
                stopped: false,
            }),
            wake: Condvar::new(),
        });

        let worker_shared = shared.clone();
        let worker = std::thread::Builder::new()
            .name("abp-timer".to_string())
            .spawn(move || run_timer_loop(&worker_shared, &sink))
            .map_err(|e| ExecutorError::Spawn(format!("timer: {}", e)))?;

        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Number of entries waiting to fire.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().heap.len()
    }
}

fn run_timer_loop(shared: &TimerShared, sink: &FailureSink) {
    let mut state = shared.state.lock();
    loop {
        if state.stopped {
            break;
        }
        let next_fire = match state.heap.peek() {
            Some(entry) => entry.fire_at,
            None => {
                shared.wake.wait(&mut state);
                continue;
            }
        };

        if Instant::now() < next_fire {
            shared.wake.wait_until(&mut state, next_fire);
            continue;
        }

        // Fire everything due, re-checking the clock and the stop flag after
        // each callback.
        loop {
            let due = match state.heap.peek() {
                Some(entry) if !state.stopped && entry.fire_at <= Instant::now() => true,
                _ => false,
            };
            if !due {
                break;
            }
            let Some(entry) = state.heap.pop() else {
                break;
            };
            drop(state);
            run_guarded("timer", entry.callback, sink);
            state = shared.state.lock();
        }
    }
    let abandoned = state.heap.len();
    state.heap.clear();
    if abandoned > 0 {
        tracing::debug!(abandoned, "timer stopped with pending callbacks");
    }
}

impl Timer for TimerThread {
    fn set_timer(&self, timeout: Duration, callback: Task) {
        // A fire time past the end of the clock can never be reached.
        let Some(fire_at) = Instant::now().checked_add(timeout) else {
            tracing::debug!(?timeout, "timeout beyond the clock range; timer never fires");
            return;
        };
        let mut state = self.shared.state.lock();
        if state.stopped {
            return;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(TimerEntry {
            fire_at,
            seq,
            callback,
        });
        drop(state);
        self.shared.wake.notify_one();
    }
}

impl Drop for TimerThread {
    fn drop(&mut self) {
        self.shared.state.lock().stopped = true;
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            if is_current_thread(&worker) {
                tracing::warn!("timer dropped from its own callback; detaching instead of joining");
                return;
            }
            if worker.join().is_err() {
                tracing::error!("timer thread terminated abnormally");
            }
        }
    }
}
