//! Error types for each layer of the streaming pipeline.
//!
//! Soft failures that the pipeline recovers from on its own (absent chip,
//! self-test mismatches, stop timeouts) are reported as values, not errors;
//! see [`SelfTest`](crate::codec::SelfTest) and
//! [`StopOutcome`](crate::control::StopOutcome).

use std::io;
use std::path::PathBuf;

use embedded_hal::{digital, spi};
use thiserror::Error;

use crate::stream::Chunk;

/// Bus or control-line failure while talking to the decoder.
///
/// HAL error types differ per pin and bus, so they are reduced to their
/// `embedded-hal` error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("SPI transfer failed: {0:?}")]
    Spi(spi::ErrorKind),
    #[error("decoder control line failed: {0:?}")]
    Pin(digital::ErrorKind),
}

impl CodecError {
    pub(crate) fn spi<E: spi::Error>(err: E) -> Self {
        CodecError::Spi(err.kind())
    }

    pub(crate) fn pin<E: digital::Error>(err: E) -> Self {
        CodecError::Pin(err.kind())
    }
}

/// A chunk could not be queued. The chunk is handed back to the caller.
#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("stream queue is full")]
    Full(Chunk),
    #[error("timed out waiting for stream queue space")]
    TimedOut(Chunk),
}

impl EnqueueError {
    /// Recover the rejected chunk.
    pub fn into_chunk(self) -> Chunk {
        match self {
            EnqueueError::Full(chunk) | EnqueueError::TimedOut(chunk) => chunk,
        }
    }
}

/// Failure reported by a [`Storage`](crate::storage::Storage) backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no such track: {0}")]
    NotFound(String),
    #[error("invalid track name: {0:?}")]
    InvalidName(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A play request was rejected.
#[derive(Debug, Error)]
pub enum PlayError {
    #[error("no such track: {0}")]
    NotFound(String),
    #[error("failed to open track: {0}")]
    Storage(#[source] StorageError),
}

impl From<StorageError> for PlayError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(name) => PlayError::NotFound(name),
            other => PlayError::Storage(other),
        }
    }
}

/// Configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
