//! Fixed-capacity blocking queue with an explicit terminate signal.
//!
//! Every queue in the pipeline (node inputs, per-caller chunk queues, the
//! processed-chunk queue) is a `BoundedQueue`. A full queue blocks its
//! producer, which is the only backpressure mechanism in the system.
//!
//! Termination is cooperative: after [`BoundedQueue::terminate`], pushes fail
//! immediately while pops keep returning the remaining items and only report
//! termination once the queue is drained.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Outcome of the multi-item pop operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    /// Items were taken (for batch pops: the requested count was reached,
    /// or the queue was terminated after yielding at least one item).
    Success,
    /// The deadline elapsed first. Items may still have been collected.
    Timeout,
    /// The queue is terminated and nothing was collected.
    Terminated,
}

/// Returned by [`BoundedQueue::push`] when the queue has been terminated.
/// Hands the rejected item back to the caller.
pub struct QueueTerminated<T>(pub T);

impl<T> QueueTerminated<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for QueueTerminated<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueueTerminated(..)")
    }
}

impl<T> fmt::Display for QueueTerminated<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("push on a terminated queue")
    }
}

struct QueueInner<T> {
    items: VecDeque<T>,
    terminated: bool,
}

/// Thread-safe FIFO queue with a fixed capacity.
pub struct BoundedQueue<T> {
    inner: Mutex<QueueInner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity.min(4096)),
                terminated: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, QueueInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn is_terminated(&self) -> bool {
        self.lock().terminated
    }

    /// Push an item, blocking while the queue is full.
    ///
    /// Fails once the queue is terminated, including when termination happens
    /// while this call is blocked waiting for space.
    pub fn push(&self, item: T) -> Result<(), QueueTerminated<T>> {
        let mut inner = self.lock();
        while !inner.terminated && inner.items.len() >= self.capacity {
            inner = self
                .not_full
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if inner.terminated {
            return Err(QueueTerminated(item));
        }
        inner.items.push_back(item);
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Pop one item, blocking while the queue is empty.
    ///
    /// Returns `None` only when the queue is terminated and drained.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.lock();
        loop {
            if let Some(item) = inner.items.pop_front() {
                drop(inner);
                self.not_full.notify_one();
                return Some(item);
            }
            if inner.terminated {
                return None;
            }
            inner = self
                .not_empty
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until at least one item is available, then move up to `max_n`
    /// items into `out` with a single lock acquisition.
    pub fn pop_n(&self, max_n: usize, out: &mut Vec<T>) -> QueueStatus {
        let mut inner = self.lock();
        while inner.items.is_empty() && !inner.terminated {
            inner = self
                .not_empty
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if inner.items.is_empty() {
            return QueueStatus::Terminated;
        }
        let take = max_n.max(1).min(inner.items.len());
        out.extend(inner.items.drain(..take));
        drop(inner);
        self.not_full.notify_all();
        QueueStatus::Success
    }

    /// Accumulate up to `max_n` items into `out`, giving up at `deadline`.
    ///
    /// Whatever was collected before the deadline stays in `out` even when
    /// `Timeout` is returned.
    pub fn pop_batch_or_timeout(
        &self,
        max_n: usize,
        deadline: Instant,
        out: &mut Vec<T>,
    ) -> QueueStatus {
        if max_n == 0 {
            return QueueStatus::Success;
        }

        let mut taken = 0;
        let mut inner = self.lock();
        loop {
            let before = taken;
            while taken < max_n {
                match inner.items.pop_front() {
                    Some(item) => {
                        out.push(item);
                        taken += 1;
                    }
                    None => break,
                }
            }
            if taken > before {
                self.not_full.notify_all();
            }

            if taken == max_n {
                return QueueStatus::Success;
            }
            if inner.terminated {
                return if taken > 0 {
                    QueueStatus::Success
                } else {
                    QueueStatus::Terminated
                };
            }

            let now = Instant::now();
            if now >= deadline {
                return QueueStatus::Timeout;
            }
            let (guard, _) = self
                .not_empty
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            inner = guard;
        }
    }

    /// Signal end of stream. Idempotent; wakes every blocked producer and consumer.
    pub fn terminate(&self) {
        self.lock().terminated = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Clear the terminated flag and any residual items so the queue can be reused.
    pub fn restart(&self) {
        let mut inner = self.lock();
        inner.items.clear();
        inner.terminated = false;
        drop(inner);
        self.not_full.notify_all();
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("BoundedQueue")
            .field("len", &inner.items.len())
            .field("capacity", &self.capacity)
            .field("terminated", &inner.terminated)
            .finish()
    }
}
