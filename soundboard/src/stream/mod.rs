//! Producer → consumer chunk transport.
//!
//! | Type | Role |
//! |------|------|
//! | [`Chunk`] | Tagged queue item: 32-byte audio block or start/stop marker |
//! | [`ChunkAccumulator`] | Turns a byte stream into full `Data` chunks |
//! | [`StreamQueue`] | Fixed-capacity FIFO, split into [`ChunkProducer`] / [`ChunkConsumer`] |
//!
//! The queue is the only state the producer and the consumer thread share.
//! Its storage is a lock-free SPSC ring; bounded waits on either end use a
//! condvar for wake-ups.

mod chunk;
mod queue;
mod ring;

pub use chunk::{Chunk, ChunkAccumulator};
pub use queue::{ChunkConsumer, ChunkProducer, StreamQueue};
