//! Blocking FIFO shared between producers and a worker thread.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Thread-safe FIFO with a blocking pop.
///
/// The queue can be closed with a final item. Closing and accepting happen
/// under the same lock, so every item accepted before the close is ordered
/// ahead of the final item and nothing is accepted after it.
pub struct SynchronizedTaskQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
}

impl<T> SynchronizedTaskQueue<T> {
    /// Create a new empty queue
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Append an item to the tail and wake one waiting consumer.
    ///
    /// Hands the item back when the queue has been closed.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(item);
        }
        state.items.push_back(item);
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    /// Append a final item and refuse everything pushed afterwards.
    ///
    /// Returns `false` if the queue was already closed.
    pub fn close_with(&self, last: T) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        state.items.push_back(last);
        drop(state);
        self.available.notify_one();
        true
    }

    /// Block until an item is present, then remove and return the head.
    pub fn pop_blocking(&self) -> T {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return item;
            }
            self.available.wait(&mut state);
        }
    }

    /// Remove and return the head without waiting
    pub fn try_pop(&self) -> Option<T> {
        self.state.lock().items.pop_front()
    }

    /// Get the number of queued items
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl<T> Default for SynchronizedTaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
