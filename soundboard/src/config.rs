//! Configuration loading and parsing.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working setup:
//!
//! ```toml
//! [codec]
//! slow_bus_hz = 200000
//! fast_bus_hz = 4000000
//! initial_volume = 100
//!
//! [stream]
//! queue_capacity = 400
//! read_cap = 6000
//! control_timeout_ms = 200
//! consumer_poll_ms = 5
//! overflow = { policy = "block", timeout_ms = 200 }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::constants::{
    CHUNK_SIZE, DEFAULT_QUEUE_CAPACITY, DEFAULT_READ_CAP, FAST_BUS_HZ, MAX_QUEUE_WAIT_MS,
    SLOW_BUS_HZ,
};
use crate::error::ConfigError;

/// Top-level configuration loaded from TOML.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SoundboardConfig {
    pub codec: CodecConfig,
    pub stream: StreamConfig,
}

/// Decoder bus settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodecConfig {
    /// Bus clock during bring-up, in Hz.
    pub slow_bus_hz: u32,
    /// Bus clock once the decoder's clock multiplier runs, in Hz.
    pub fast_bus_hz: u32,
    /// Volume applied after bring-up (0–100).
    pub initial_volume: u8,
}

impl Default for CodecConfig {
    fn default() -> Self {
        CodecConfig {
            slow_bus_hz: SLOW_BUS_HZ,
            fast_bus_hz: FAST_BUS_HZ,
            initial_volume: 100,
        }
    }
}

/// Producer/consumer settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    /// Chunks the stream queue holds.
    pub queue_capacity: usize,
    /// Most bytes read from storage in one producer tick.
    pub read_cap: usize,
    /// What to do with a data chunk when the queue is full.
    pub overflow: OverflowPolicy,
    /// Wait for queue space when queuing a start/stop marker.
    pub control_timeout_ms: u64,
    /// How long the consumer waits for a chunk before checking for shutdown.
    pub consumer_poll_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            read_cap: DEFAULT_READ_CAP,
            overflow: OverflowPolicy::default(),
            control_timeout_ms: 200,
            consumer_poll_ms: 5,
        }
    }
}

impl StreamConfig {
    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }

    pub fn consumer_poll(&self) -> Duration {
        Duration::from_millis(self.consumer_poll_ms)
    }
}

/// Handling of a data chunk that does not fit in the queue.
///
/// The controller sizes each read from the free slots, so with a single
/// producer a data chunk finds room; the policy only bounds the wait if the
/// queue is full anyway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Drop it immediately.
    Drop,
    /// Wait up to `timeout_ms` for space, then drop it.
    Block { timeout_ms: u64 },
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::Block { timeout_ms: 200 }
    }
}

impl OverflowPolicy {
    /// How long to wait for a free slot.
    pub fn wait(&self) -> Duration {
        match *self {
            OverflowPolicy::Drop => Duration::ZERO,
            OverflowPolicy::Block { timeout_ms } => Duration::from_millis(timeout_ms),
        }
    }
}

impl SoundboardConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let cfg: SoundboardConfig = toml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if self.stream.queue_capacity == 0 {
            return invalid("stream.queue_capacity must be at least 1".into());
        }
        if self.stream.read_cap < CHUNK_SIZE {
            return invalid(format!("stream.read_cap must be at least {CHUNK_SIZE}"));
        }
        let waits = [
            ("stream.control_timeout_ms", self.stream.control_timeout_ms),
            ("stream.consumer_poll_ms", self.stream.consumer_poll_ms),
            ("stream.overflow.timeout_ms", self.stream.overflow.wait().as_millis() as u64),
        ];
        for (key, ms) in waits {
            if ms > MAX_QUEUE_WAIT_MS {
                return invalid(format!("{key} {ms} is above {MAX_QUEUE_WAIT_MS}"));
            }
        }
        if self.stream.consumer_poll_ms == 0 {
            return invalid("stream.consumer_poll_ms must be at least 1".into());
        }
        if self.codec.initial_volume > 100 {
            return invalid(format!(
                "codec.initial_volume {} is above 100",
                self.codec.initial_volume
            ));
        }
        if self.codec.slow_bus_hz == 0 || self.codec.slow_bus_hz > self.codec.fast_bus_hz {
            return invalid(format!(
                "codec.slow_bus_hz ({}) must be non-zero and not above fast_bus_hz ({})",
                self.codec.slow_bus_hz, self.codec.fast_bus_hz
            ));
        }
        Ok(())
    }
}
