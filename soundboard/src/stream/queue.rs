use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::chunk::Chunk;
use super::ring::RingBuffer;
use crate::constants::MAX_QUEUE_WAIT_MS;
use crate::error::EnqueueError;

/// State shared by both halves.
///
/// The ring is lock-free; the mutex/condvar pair exists only so a side that
/// found the ring full (or empty) can sleep until the other side moves.
struct Shared {
    ring: RingBuffer<Chunk>,
    signal: Mutex<()>,
    /// Notified by the consumer after it frees a slot.
    space: Condvar,
    /// Notified by the producer after it fills a slot.
    items: Condvar,
}

/// Deadline for a wait starting now, with `timeout` clamped to
/// [`MAX_QUEUE_WAIT_MS`].
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    let timeout = timeout.min(Duration::from_millis(MAX_QUEUE_WAIT_MS));
    now.checked_add(timeout).unwrap_or(now)
}

impl Shared {
    fn notify(&self, condvar: &Condvar) {
        // Taking the lock orders this wake-up after the waiter's last check.
        let _guard = self.signal.lock();
        condvar.notify_one();
    }
}

/// Bounded FIFO of [`Chunk`]s between the producer and the consumer thread.
///
/// Built once with a fixed capacity, then [`split`](Self::split) into a
/// [`ChunkProducer`] and a [`ChunkConsumer`]. Neither half is `Clone`, so
/// there is exactly one of each.
///
/// ```ignore
/// let (mut producer, mut consumer) = StreamQueue::with_capacity(400).split();
/// producer.enqueue(Chunk::StartSong, Duration::from_millis(200))?;
/// let chunk = consumer.dequeue(Duration::from_millis(5));
/// ```
pub struct StreamQueue {
    shared: Arc<Shared>,
}

impl StreamQueue {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        StreamQueue {
            shared: Arc::new(Shared {
                ring: RingBuffer::new(capacity),
                signal: Mutex::new(()),
                space: Condvar::new(),
                items: Condvar::new(),
            }),
        }
    }

    pub fn split(self) -> (ChunkProducer, ChunkConsumer) {
        (
            ChunkProducer {
                shared: Arc::clone(&self.shared),
            },
            ChunkConsumer {
                shared: self.shared,
            },
        )
    }
}

/// Producer half of a [`StreamQueue`].
pub struct ChunkProducer {
    shared: Arc<Shared>,
}

impl ChunkProducer {
    /// Queue a chunk, waiting up to `timeout` for a free slot. The wait is
    /// clamped to [`MAX_QUEUE_WAIT_MS`].
    ///
    /// A zero timeout never blocks and reports [`EnqueueError::Full`]; a
    /// non-zero one reports [`EnqueueError::TimedOut`]. Either way the chunk
    /// is handed back.
    pub fn enqueue(&mut self, chunk: Chunk, timeout: Duration) -> Result<(), EnqueueError> {
        let shared = &*self.shared;
        let mut chunk = match shared.ring.push(chunk) {
            Ok(()) => {
                shared.notify(&shared.items);
                return Ok(());
            }
            Err(chunk) if timeout.is_zero() => return Err(EnqueueError::Full(chunk)),
            Err(chunk) => chunk,
        };

        let deadline = deadline_after(timeout);
        let mut guard = shared.signal.lock();
        loop {
            match shared.ring.push(chunk) {
                Ok(()) => {
                    shared.items.notify_one();
                    return Ok(());
                }
                Err(back) => chunk = back,
            }
            if shared.space.wait_until(&mut guard, deadline).timed_out() {
                return match shared.ring.push(chunk) {
                    Ok(()) => {
                        shared.items.notify_one();
                        Ok(())
                    }
                    Err(back) => Err(EnqueueError::TimedOut(back)),
                };
            }
        }
    }

    /// Queue a chunk only if a slot is free right now.
    pub fn try_enqueue(&mut self, chunk: Chunk) -> Result<(), EnqueueError> {
        self.enqueue(chunk, Duration::ZERO)
    }

    /// Slots currently free.
    pub fn free_slots(&self) -> usize {
        self.capacity() - self.len()
    }

    pub fn len(&self) -> usize {
        self.shared.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.shared.ring.capacity()
    }
}

/// Consumer half of a [`StreamQueue`].
pub struct ChunkConsumer {
    shared: Arc<Shared>,
}

impl ChunkConsumer {
    /// Take the oldest chunk, waiting up to `timeout` (clamped to
    /// [`MAX_QUEUE_WAIT_MS`]) for one to arrive.
    pub fn dequeue(&mut self, timeout: Duration) -> Option<Chunk> {
        let shared = &*self.shared;
        if let Some(chunk) = shared.ring.pop() {
            shared.notify(&shared.space);
            return Some(chunk);
        }
        if timeout.is_zero() {
            return None;
        }

        let deadline = deadline_after(timeout);
        let mut guard = shared.signal.lock();
        loop {
            if let Some(chunk) = shared.ring.pop() {
                shared.space.notify_one();
                return Some(chunk);
            }
            if shared.items.wait_until(&mut guard, deadline).timed_out() {
                let chunk = shared.ring.pop();
                if chunk.is_some() {
                    shared.space.notify_one();
                }
                return chunk;
            }
        }
    }

    /// Take the oldest chunk if there is one.
    pub fn try_dequeue(&mut self) -> Option<Chunk> {
        self.dequeue(Duration::ZERO)
    }

    pub fn len(&self) -> usize {
        self.shared.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.shared.ring.capacity()
    }
}
