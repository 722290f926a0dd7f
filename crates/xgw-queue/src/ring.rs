//! Bounded multi-producer ring buffer.

use crate::spin::SpinMutex;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Ring<T> {
    slots: Box<[Option<T>]>,
    /// Next slot to pop.
    head: usize,
    /// Next slot to push.
    tail: usize,
}

/// Fixed-capacity FIFO handing items from network-facing producers to a
/// single publisher.
///
/// `push` and `pop` each hold a [`SpinMutex`] for a handful of moves; no I/O
/// and no allocation happen under the lock. This is NOT wait-free: a producer
/// preempted while holding the lock stalls every other producer and the
/// consumer until it runs again, so the queue is unsuitable where producers
/// can be descheduled for long periods (heavily oversubscribed hosts,
/// real-time priority inversion).
///
/// `len`, `is_empty` and `is_full` read a mirror counter outside the lock and
/// are advisory only.
pub struct EventHandoffQueue<T> {
    ring: SpinMutex<Ring<T>>,
    mask: usize,
    len: AtomicUsize,
}

impl<T> EventHandoffQueue<T> {
    /// Create a queue. `capacity` is rounded up to a power of two (minimum 2).
    pub fn with_capacity(capacity: usize) -> Self {
        let cap = capacity.max(2).next_power_of_two();
        let slots: Vec<Option<T>> = (0..cap).map(|_| None).collect();
        Self {
            ring: SpinMutex::new(Ring {
                slots: slots.into_boxed_slice(),
                head: 0,
                tail: 0,
            }),
            mask: cap - 1,
            len: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Enqueue without blocking. Hands the item back when full.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut ring = self.ring.lock();
        if ring.tail.wrapping_sub(ring.head) > self.mask {
            return Err(item);
        }
        let idx = ring.tail & self.mask;
        ring.slots[idx] = Some(item);
        ring.tail = ring.tail.wrapping_add(1);
        self.len.fetch_add(1, Ordering::Release);
        Ok(())
    }

    /// Dequeue the oldest item, if any.
    pub fn pop(&self) -> Option<T> {
        let mut ring = self.ring.lock();
        if ring.head == ring.tail {
            return None;
        }
        let idx = ring.head & self.mask;
        let item = ring.slots[idx].take();
        ring.head = ring.head.wrapping_add(1);
        self.len.fetch_sub(1, Ordering::Release);
        item
    }

    /// Advisory item count.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }
}

impl<T> fmt::Debug for EventHandoffQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandoffQueue")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}
