//! # soundboard
//!
//! Streaming core of an MP3 soundboard built around the VS1053 decoder chip.
//! A track is read from storage, cut into 32-byte chunks, passed across a
//! bounded queue to a dedicated consumer thread and pushed over SPI into the
//! decoder, which does the actual MP3 decoding.
//!
//! ## Architecture
//!
//! | Layer | Module | Purpose |
//! |-------|--------|---------|
//! | Driver | [`codec`] | VS1053 SCI/SDI protocol, bring-up, self-test, volume/tone |
//! | Trait | [`control`] | [`Decoder`](control::Decoder), the consumer's view of the chip |
//! | Transport | [`stream`] | [`Chunk`](stream::Chunk) and the split [`StreamQueue`](stream::StreamQueue) |
//! | Producer | [`playback`] | Play/stop state machine fed from [`storage`] |
//! | Consumer | [`consumer`] | Thread draining the queue into the decoder |
//! | Setup | [`config`] / [`error`] | TOML configuration, error types |
//!
//! ## Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use soundboard::prelude::*;
//!
//! let cfg = SoundboardConfig::load("soundboard.toml".as_ref())?;
//! let codec = Arc::new(
//!     Vs1053::new(spi, xcs, xdcs, dreq, delay)
//!         .with_bus_speeds(cfg.codec.slow_bus_hz, cfg.codec.fast_bus_hz),
//! );
//! codec.bring_up()?;
//! codec.set_volume(cfg.codec.initial_volume)?;
//!
//! let (tx, rx) = StreamQueue::with_capacity(cfg.stream.queue_capacity).split();
//! let consumer = ConsumerLoop::new(rx, Arc::clone(&codec), cfg.stream.consumer_poll());
//! let shutdown = consumer.shutdown_handle();
//! let sound = consumer.spawn()?;
//!
//! let mut player = PlaybackController::new(DirStorage::new("/data"), tx, &cfg.stream);
//! player.request_play("doorbell")?;
//! loop {
//!     player.tick()?;
//!     // handle buttons / network requests here
//! }
//! ```
//!
//! ## Features
//!
//! | Feature | Default | Enables |
//! |---------|---------|---------|
//! | `sim` | no | [`sim`]: software VS1053 for host-side runs |
//!
//! ## Stream parameters
//!
//! - **Chunk size:** 32 bytes ([`constants::CHUNK_SIZE`])
//! - **Queue:** 400 chunks ([`constants::DEFAULT_QUEUE_CAPACITY`])
//! - **Bus clock:** 200 kHz during bring-up, 4 MHz after

pub mod constants;
pub mod control;
pub mod error;
pub mod codec;
pub mod stream;
pub mod storage;
pub mod playback;
pub mod consumer;
pub mod config;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

#[cfg(test)]
mod pipeline_tests;

/// The types most applications need.
pub mod prelude {
    pub use crate::codec::{BringUpReport, SelfTest, Vs1053};
    pub use crate::config::{OverflowPolicy, SoundboardConfig, StreamConfig};
    pub use crate::consumer::{ConsumerLoop, ConsumerStats, ShutdownHandle};
    pub use crate::control::{Decoder, StopOutcome};
    pub use crate::error::{CodecError, ConfigError, EnqueueError, PlayError, StorageError};
    pub use crate::playback::{PlaybackController, PlaybackState, ProducerStats};
    pub use crate::storage::{DirStorage, MemStorage, Storage, TrackEntry};
    pub use crate::stream::{Chunk, ChunkConsumer, ChunkProducer, StreamQueue};
}
