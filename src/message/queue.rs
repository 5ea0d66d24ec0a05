//! FIFO message queue: many producers, one draining worker.
//!
//! One instance exists per (worker, subsystem) pair. Producers on any thread
//! enqueue under the per-queue lock; only the owning worker dequeues.
//! [`MessageQueue::is_empty`] is a lock-free fast check used by the drain
//! loop to decide whether to attempt a dequeue at all; it may race with a
//! concurrent enqueue, which is fine because the drain loop re-scans after
//! every dispatch and every wake.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::message::pool::MessageWrapper;
use crate::sync::lock;

/// Thread-safe FIFO of in-flight message wrappers.
#[derive(Debug, Default)]
pub struct MessageQueue {
    items: Mutex<VecDeque<MessageWrapper>>,
    // Mirrors items.len(); updated under the lock, read without it.
    len: AtomicUsize,
}

impl MessageQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a wrapper at the tail. O(1), never fails.
    pub fn enqueue(&self, wrapper: MessageWrapper) {
        let mut items = lock(&self.items);
        items.push_back(wrapper);
        self.len.store(items.len(), Ordering::Release);
    }

    /// Pops the head wrapper, or returns `None` without blocking.
    #[must_use]
    pub fn try_dequeue(&self) -> Option<MessageWrapper> {
        let mut items = lock(&self.items);
        let wrapper = items.pop_front();
        self.len.store(items.len(), Ordering::Release);
        wrapper
    }

    /// Lock-free emptiness fast check.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len.load(Ordering::Acquire) == 0
    }

    /// Current queue depth. Best-effort when producers are active.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }
}
