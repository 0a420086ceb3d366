//! Fixed-capacity FIFO shared between one producer and one consumer.
//!
//! Built on [`crossbeam_queue::ArrayQueue`], so neither side ever blocks. The
//! producer uses [`BoundedQueue::push_fresh`], which prefers fresh data over a
//! stale backlog: a full queue is emptied before the new item is retried.

use crossbeam_queue::ArrayQueue;
use std::sync::Arc;

/// What happened to an item handed to [`BoundedQueue::push_fresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Enqueued without contention.
    Pushed,
    /// The queue was full; `discarded` stale items were dropped and the item enqueued.
    PushedAfterDrain {
        /// Number of items thrown away
        discarded: usize,
    },
    /// Still full after draining; the item was dropped.
    Dropped,
}

/// Cloneable handle to a shared bounded queue.
pub struct BoundedQueue<T> {
    name: &'static str,
    inner: Arc<ArrayQueue<T>>,
}

impl<T> Clone for BoundedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("name", &self.name)
            .field("len", &self.inner.len())
            .field("capacity", &self.inner.capacity())
            .finish()
    }
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items.
    ///
    /// A zero capacity is bumped to one.
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            inner: Arc::new(ArrayQueue::new(capacity.max(1))),
        }
    }

    /// Queue name used in log events.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Non-blocking push; hands the item back when full.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        self.inner.push(item)
    }

    /// Non-blocking pop.
    pub fn try_pop(&self) -> Option<T> {
        self.inner.pop()
    }

    /// Push, draining the whole backlog once if the queue is full.
    pub fn push_fresh(&self, item: T) -> PushOutcome {
        let item = match self.inner.push(item) {
            Ok(()) => return PushOutcome::Pushed,
            Err(item) => item,
        };

        let discarded = self.clear();
        match self.inner.push(item) {
            Ok(()) => {
                tracing::warn!(
                    queue = self.name,
                    discarded,
                    "queue full, discarded backlog to keep data fresh"
                );
                PushOutcome::PushedAfterDrain { discarded }
            }
            Err(_) => {
                tracing::warn!(queue = self.name, "queue still full, dropping sample");
                PushOutcome::Dropped
            }
        }
    }

    /// Remove every pending item, returning how many were dropped.
    pub fn clear(&self) -> usize {
        let mut n = 0;
        while self.inner.pop().is_some() {
            n += 1;
        }
        n
    }

    /// Remove and return every pending item in FIFO order.
    pub fn drain(&self) -> Vec<T> {
        let mut items = Vec::with_capacity(self.inner.len());
        while let Some(item) = self.inner.pop() {
            items.push(item);
        }
        items
    }

    /// Items currently queued.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Maximum number of items.
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let q = BoundedQueue::new("test", 4);
        for i in 0..3 {
            assert_eq!(q.push_fresh(i), PushOutcome::Pushed);
        }
        assert_eq!(q.drain(), vec![0, 1, 2]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_full_queue_drains_then_pushes() {
        let q = BoundedQueue::new("test", 3);
        for i in 0..3 {
            q.push_fresh(i);
        }
        assert_eq!(q.push_fresh(99), PushOutcome::PushedAfterDrain { discarded: 3 });
        assert_eq!(q.len(), 1);
        assert_eq!(q.try_pop(), Some(99));
    }

    #[test]
    fn test_length_never_exceeds_capacity() {
        let q = BoundedQueue::new("test", 8);
        for i in 0..1000 {
            q.push_fresh(i);
            assert!(q.len() <= q.capacity());
        }
    }

    #[test]
    fn test_clones_share_storage() {
        let producer = BoundedQueue::new("shared", 2);
        let consumer = producer.clone();
        producer.try_push("a").unwrap();
        assert_eq!(consumer.try_pop(), Some("a"));
        assert_eq!(consumer.name(), "shared");
    }

    #[test]
    fn test_try_push_returns_item_when_full() {
        let q = BoundedQueue::new("test", 1);
        q.try_push(1).unwrap();
        assert_eq!(q.try_push(2), Err(2));
        assert_eq!(q.clear(), 1);
    }

    #[test]
    fn test_zero_capacity_is_bumped() {
        let q: BoundedQueue<u8> = BoundedQueue::new("tiny", 0);
        assert_eq!(q.capacity(), 1);
    }
}
