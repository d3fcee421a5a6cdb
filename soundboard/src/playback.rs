//! Playback state machine (producer side).
//!
//! ```text
//!            request_play            source drained / request_stop
//! Stopped ───────────────▶ Streaming ─────────────────────────────▶ StopRequested
//!    ▲                                                                    │
//!    └──────────── close source, drop partial chunk, queue StopSong ──────┘
//! ```
//!
//! [`PlaybackController::tick`] is called from the producer's own loop. Each
//! call moves at most one read's worth of bytes from storage into the stream
//! queue, sized so that every chunk it produces has a free slot waiting, and
//! runs the stop cleanup in the same call once the source is exhausted.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::constants::CHUNK_SIZE;
use crate::error::{PlayError, StorageError};
use crate::storage::Storage;
use crate::stream::{Chunk, ChunkAccumulator, ChunkProducer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Streaming,
    /// Stop pending; cleanup runs on the next tick.
    StopRequested,
}

/// Producer-side counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerStats {
    pub songs_started: u64,
    pub bytes_read: u64,
    pub chunks_queued: u64,
    /// Data chunks dropped because the queue stayed full.
    pub dropped_chunks: u64,
    /// Trailing bytes thrown away at stop (always < `CHUNK_SIZE` per song).
    pub discarded_bytes: u64,
}

struct ActiveSource<H> {
    name: String,
    handle: H,
    remaining: u64,
}

/// Owns the playback state and the producer half of the stream queue.
pub struct PlaybackController<S: Storage> {
    storage: S,
    producer: ChunkProducer,
    settings: StreamConfig,
    state: PlaybackState,
    source: Option<ActiveSource<S::Handle>>,
    accumulator: ChunkAccumulator,
    scratch: Vec<u8>,
    /// Start/stop markers that did not fit, oldest first.
    pending_control: VecDeque<Chunk>,
    stats: ProducerStats,
}

impl<S: Storage> PlaybackController<S> {
    /// A `read_cap` below [`CHUNK_SIZE`] is raised to it.
    pub fn new(storage: S, producer: ChunkProducer, settings: &StreamConfig) -> Self {
        let settings = StreamConfig {
            read_cap: settings.read_cap.max(CHUNK_SIZE),
            ..settings.clone()
        };
        PlaybackController {
            storage,
            producer,
            scratch: vec![0; settings.read_cap],
            settings,
            state: PlaybackState::Stopped,
            source: None,
            accumulator: ChunkAccumulator::new(),
            pending_control: VecDeque::new(),
            stats: ProducerStats::default(),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn stats(&self) -> ProducerStats {
        self.stats
    }

    /// Name of the track being streamed.
    pub fn current_track(&self) -> Option<&str> {
        self.source.as_ref().map(|source| source.name.as_str())
    }

    /// Chunks in the stream queue not yet taken by the consumer.
    pub fn queued(&self) -> usize {
        self.producer.len()
    }

    /// Start/stop markers still waiting for queue space.
    pub fn pending_control(&self) -> usize {
        self.pending_control.len()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Nothing streaming and nothing left to hand to the queue.
    pub fn is_idle(&self) -> bool {
        self.state == PlaybackState::Stopped && self.pending_control.is_empty()
    }

    // ── Requests ───────────────────────────────────────────────────────

    /// Start streaming `name`, abandoning the current song if there is one.
    ///
    /// An unknown name is rejected without touching the current song.
    pub fn request_play(&mut self, name: &str) -> Result<(), PlayError> {
        if !self.storage.exists(name) {
            warn!(name, "play request for unknown track");
            return Err(PlayError::NotFound(name.to_owned()));
        }

        if self.state == PlaybackState::Streaming {
            self.state = PlaybackState::StopRequested;
        }
        if self.state == PlaybackState::StopRequested {
            self.finish_stop();
        }

        let handle = self.storage.open(name)?;
        let remaining = self.storage.size(&handle);
        self.accumulator.clear();
        self.source = Some(ActiveSource {
            name: name.to_owned(),
            handle,
            remaining,
        });
        self.queue_control(Chunk::StartSong);
        self.state = PlaybackState::Streaming;
        self.stats.songs_started += 1;
        info!(name, bytes = remaining, "playing");
        Ok(())
    }

    /// Ask the current song to stop. The stop itself happens on the next
    /// [`tick`](Self::tick).
    pub fn request_stop(&mut self) {
        if self.state == PlaybackState::Streaming {
            debug!(track = self.current_track(), "stop requested");
            self.state = PlaybackState::StopRequested;
        }
    }

    // ── Producer step ──────────────────────────────────────────────────

    /// One producer step.
    ///
    /// A storage failure stops the song (source closed, `StopSong` queued)
    /// before the error is returned.
    pub fn tick(&mut self) -> Result<(), StorageError> {
        self.flush_pending();

        if self.state == PlaybackState::Streaming {
            if let Err(err) = self.stream_step() {
                warn!(track = self.current_track(), %err, "read failed, stopping");
                self.state = PlaybackState::StopRequested;
                self.finish_stop();
                return Err(err);
            }
        }

        if self.state == PlaybackState::StopRequested {
            self.finish_stop();
        }
        Ok(())
    }

    fn stream_step(&mut self) -> Result<(), StorageError> {
        // StartSong must reach the queue ahead of the song's data.
        if !self.pending_control.is_empty() {
            return Ok(());
        }
        let Some(source) = self.source.as_mut() else {
            self.state = PlaybackState::StopRequested;
            return Ok(());
        };
        if source.remaining == 0 {
            self.state = PlaybackState::StopRequested;
            return Ok(());
        }

        let room = (self.producer.free_slots() * CHUNK_SIZE)
            .saturating_sub(self.accumulator.pending());
        let want = (self.settings.read_cap as u64)
            .min(source.remaining)
            .min(room as u64) as usize;
        if want == 0 {
            return Ok(());
        }

        let mut scratch = std::mem::take(&mut self.scratch);
        if scratch.len() < want {
            scratch.resize(want, 0);
        }
        let read = self.storage.read(&mut source.handle, &mut scratch[..want]);
        let n = match read {
            Ok(n) => n,
            Err(err) => {
                self.scratch = scratch;
                return Err(err);
            }
        };
        source.remaining = source.remaining.saturating_sub(n as u64);
        if n == 0 || source.remaining == 0 {
            self.state = PlaybackState::StopRequested;
        }
        self.stats.bytes_read += n as u64;

        for &byte in &scratch[..n] {
            if let Some(chunk) = self.accumulator.push(byte) {
                self.queue_data(chunk);
            }
        }
        self.scratch = scratch;
        Ok(())
    }

    /// Close the source, drop the partial chunk and queue `StopSong`.
    fn finish_stop(&mut self) {
        let name = self.source.take().map(|source| {
            self.storage.close(source.handle);
            source.name
        });
        let discarded = self.accumulator.clear();
        self.stats.discarded_bytes += discarded as u64;
        self.queue_control(Chunk::StopSong);
        self.state = PlaybackState::Stopped;
        info!(track = name.as_deref(), discarded, "stopped");
    }

    // ── Queue access ───────────────────────────────────────────────────

    fn queue_data(&mut self, chunk: Chunk) {
        match self.producer.enqueue(chunk, self.settings.overflow.wait()) {
            Ok(()) => self.stats.chunks_queued += 1,
            Err(err) => {
                self.stats.dropped_chunks += 1;
                warn!(
                    policy = ?self.settings.overflow,
                    dropped = self.stats.dropped_chunks,
                    "{err}, dropping audio chunk"
                );
            }
        }
    }

    fn queue_control(&mut self, chunk: Chunk) {
        self.flush_pending();
        if !self.pending_control.is_empty() {
            self.pending_control.push_back(chunk);
            return;
        }
        match self.producer.enqueue(chunk, self.settings.control_timeout()) {
            Ok(()) => self.stats.chunks_queued += 1,
            Err(err) => {
                let chunk = err.into_chunk();
                warn!(?chunk, "stream queue full, holding marker for retry");
                self.pending_control.push_back(chunk);
            }
        }
    }

    fn flush_pending(&mut self) {
        while let Some(chunk) = self.pending_control.pop_front() {
            match self.producer.try_enqueue(chunk) {
                Ok(()) => self.stats.chunks_queued += 1,
                Err(err) => {
                    self.pending_control.push_front(err.into_chunk());
                    break;
                }
            }
        }
    }
}
