//! Lock-free single-producer single-consumer (SPSC) ring buffer.
//!
//! Storage for [`StreamQueue`](super::StreamQueue). The queue's split halves
//! are the only way to reach it, which is what upholds the contract below.
//!
//! # Safety Contract
//!
//! - Only ONE thread may call [`push()`](RingBuffer::push) (the "producer").
//! - Only ONE thread may call [`pop()`](RingBuffer::pop) (the "consumer").
//! - These may be different threads running concurrently.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicUsize, Ordering};

/// A lock-free SPSC ring with a capacity fixed at construction.
///
/// One extra slot is allocated for full/empty disambiguation (Lamport
/// queue), so a ring built for `capacity` items holds exactly that many.
pub(crate) struct RingBuffer<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    /// Write position (only modified by the producer).
    head: AtomicUsize,
    /// Read position (only modified by the consumer).
    tail: AtomicUsize,
}

// SAFETY: T: Send is required because values cross threads. The SPSC
// contract ensures head and tail are each modified by one side only, and
// acquire/release ordering makes slot writes visible before the index moves.
unsafe impl<T: Send> Sync for RingBuffer<T> {}
unsafe impl<T: Send> Send for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// Create an empty ring holding up to `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub(crate) fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "ring buffer needs at least one usable slot");
        RingBuffer {
            slots: (0..=capacity)
                .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
                .collect(),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of items the ring can hold.
    pub(crate) fn capacity(&self) -> usize {
        self.slot_count() - 1
    }

    /// Push a value (producer side).
    ///
    /// Returns `Err(val)` if the ring is full, returning ownership to the caller.
    pub(crate) fn push(&self, val: T) -> Result<(), T> {
        let head = self.head.load(Ordering::Relaxed);
        let next_head = (head + 1) % self.slot_count();

        if next_head == self.tail.load(Ordering::Acquire) {
            return Err(val);
        }

        // SAFETY: We are the sole producer and `head` is only advanced by us.
        // `next_head != tail` guarantees this slot is not owned by the consumer.
        unsafe {
            (*self.slots[head].get()).write(val);
        }

        self.head.store(next_head, Ordering::Release);
        Ok(())
    }

    /// Pop a value (consumer side). Returns `None` if the ring is empty.
    pub(crate) fn pop(&self) -> Option<T> {
        let tail = self.tail.load(Ordering::Relaxed);

        if tail == self.head.load(Ordering::Acquire) {
            return None;
        }

        // SAFETY: We are the sole consumer and `tail` is only advanced by us.
        // `tail != head` guarantees this slot holds an initialized value.
        let val = unsafe { (*self.slots[tail].get()).assume_init_read() };

        self.tail
            .store((tail + 1) % self.slot_count(), Ordering::Release);
        Some(val)
    }

    /// Number of items currently stored.
    pub(crate) fn len(&self) -> usize {
        let n = self.slot_count();
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (head + n - tail) % n
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_pop() {
        let ring: RingBuffer<i32> = RingBuffer::new(3);
        assert!(ring.is_empty());
        assert_eq!(ring.capacity(), 3);

        ring.push(10).unwrap();
        ring.push(20).unwrap();
        ring.push(30).unwrap();
        assert_eq!(ring.len(), 3);

        assert_eq!(ring.push(40), Err(40));

        assert_eq!(ring.pop(), Some(10));
        assert_eq!(ring.pop(), Some(20));
        assert_eq!(ring.pop(), Some(30));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn single_slot_ring() {
        let ring: RingBuffer<i32> = RingBuffer::new(1);
        ring.push(42).unwrap();
        assert_eq!(ring.push(99), Err(99));
        assert_eq!(ring.pop(), Some(42));
        assert!(ring.is_empty());
    }

    #[test]
    fn wraparound() {
        let ring: RingBuffer<i32> = RingBuffer::new(2);
        for round in 0..10 {
            let base = round * 100;
            ring.push(base + 1).unwrap();
            ring.push(base + 2).unwrap();
            assert_eq!(ring.len(), 2);

            assert_eq!(ring.pop(), Some(base + 1));
            assert_eq!(ring.pop(), Some(base + 2));
            assert!(ring.is_empty());
        }
    }

    #[test]
    #[should_panic]
    fn zero_capacity_panics() {
        let _ring: RingBuffer<u8> = RingBuffer::new(0);
    }

    #[test]
    fn drop_cleans_up_remaining() {
        use std::sync::Arc;

        let tracker = Arc::new(());
        {
            let ring: RingBuffer<Arc<()>> = RingBuffer::new(4);
            ring.push(tracker.clone()).unwrap();
            ring.push(tracker.clone()).unwrap();
            assert_eq!(Arc::strong_count(&tracker), 3);
        }
        assert_eq!(Arc::strong_count(&tracker), 1);
    }
}
