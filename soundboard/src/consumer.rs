//! Consumer side: drains the stream queue into the decoder.
//!
//! Runs on a dedicated thread and never touches storage. Each iteration takes
//! one chunk, waits until the decoder asks for data, and hands the chunk to
//! the matching [`Decoder`] call.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::control::{Decoder, StopOutcome};
use crate::stream::{Chunk, ChunkConsumer};

/// Name of the consumer thread.
pub const THREAD_NAME: &str = "sound";

/// Asks a [`ConsumerLoop`] to exit after its current iteration.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Consumer-side counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub data_chunks: u64,
    pub songs_started: u64,
    pub songs_stopped: u64,
    /// Stops the decoder never acknowledged.
    pub stop_timeouts: u64,
    /// Polls that found DREQ low.
    pub ready_waits: u64,
    /// Chunks dropped because shutdown arrived while waiting for DREQ.
    pub abandoned: u64,
    pub errors: u64,
}

pub struct ConsumerLoop<D> {
    queue: ChunkConsumer,
    decoder: D,
    poll: Duration,
    ready_poll: Duration,
    shutdown: ShutdownHandle,
    stats: ConsumerStats,
}

impl<D: Decoder> ConsumerLoop<D> {
    /// `poll` bounds each wait for a chunk, and so how quickly a shutdown
    /// request is noticed.
    pub fn new(queue: ChunkConsumer, decoder: D, poll: Duration) -> Self {
        ConsumerLoop {
            queue,
            decoder,
            poll,
            ready_poll: Duration::from_millis(1),
            shutdown: ShutdownHandle::default(),
            stats: ConsumerStats::default(),
        }
    }

    /// Sleep between DREQ polls (1 ms by default).
    pub fn with_ready_poll(mut self, interval: Duration) -> Self {
        self.ready_poll = interval;
        self
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    /// One iteration. Returns `true` if a chunk was taken off the queue.
    pub fn run_once(&mut self) -> bool {
        let Some(chunk) = self.queue.dequeue(self.poll) else {
            return false;
        };
        if !self.wait_for_decoder() {
            self.stats.abandoned += 1;
            debug!(?chunk, "shutdown while waiting for decoder, chunk dropped");
            return true;
        }
        self.dispatch(&chunk);
        true
    }

    /// Loop until shutdown is requested.
    pub fn run(mut self) -> ConsumerStats {
        info!("consumer started");
        while !self.shutdown.is_requested() {
            self.run_once();
        }
        info!(stats = ?self.stats, "consumer stopped");
        self.stats
    }

    /// Run on a named thread. Stop it with the handle from
    /// [`shutdown_handle`](Self::shutdown_handle), then join for the stats.
    pub fn spawn(self) -> io::Result<JoinHandle<ConsumerStats>>
    where
        D: Send + 'static,
    {
        thread::Builder::new()
            .name(THREAD_NAME.into())
            .spawn(move || self.run())
    }

    /// Poll DREQ until it is high. `false` if shutdown came first.
    fn wait_for_decoder(&mut self) -> bool {
        loop {
            match self.decoder.data_request() {
                Ok(true) => return true,
                Ok(false) => {}
                Err(err) => {
                    // Let the transfer itself wait on the line.
                    self.stats.errors += 1;
                    error!(?err, "failed to read DREQ");
                    return true;
                }
            }
            if self.shutdown.is_requested() {
                return false;
            }
            self.stats.ready_waits += 1;
            thread::sleep(self.ready_poll);
        }
    }

    fn dispatch(&mut self, chunk: &Chunk) {
        let stats = &mut self.stats;
        let result = match chunk {
            Chunk::Data(block) => self
                .decoder
                .play_chunk(block)
                .map(|()| stats.data_chunks += 1),
            Chunk::StartSong => self.decoder.start_song().map(|()| {
                stats.songs_started += 1;
                debug!("song started");
            }),
            Chunk::StopSong => self.decoder.stop_song().map(|outcome| match outcome {
                StopOutcome::Stopped { waited_ms } => {
                    stats.songs_stopped += 1;
                    debug!(waited_ms, "song stopped");
                }
                StopOutcome::TimedOut => {
                    stats.stop_timeouts += 1;
                    warn!("decoder did not confirm stop");
                }
            }),
        };
        if let Err(err) = result {
            self.stats.errors += 1;
            error!(?err, ?chunk, "decoder transfer failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::CHUNK_SIZE;
    use crate::stream::{ChunkProducer, StreamQueue};
    use parking_lot::Mutex;
    use std::time::Instant;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Data(u8),
        Start,
        Stop,
        Volume(u8),
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct FakeError;

    /// Decoder that records calls; DREQ reads low for `busy` polls.
    #[derive(Default)]
    struct FakeDecoder {
        calls: Mutex<Vec<Call>>,
        busy: Mutex<usize>,
        polls: Mutex<usize>,
        fail_data: bool,
        stop_times_out: bool,
    }

    impl FakeDecoder {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }
    }

    impl Decoder for FakeDecoder {
        type Error = FakeError;

        fn data_request(&self) -> Result<bool, FakeError> {
            *self.polls.lock() += 1;
            let mut busy = self.busy.lock();
            if *busy > 0 {
                *busy -= 1;
                return Ok(false);
            }
            Ok(true)
        }

        fn play_chunk(&self, data: &[u8]) -> Result<(), FakeError> {
            if self.fail_data {
                return Err(FakeError);
            }
            self.calls.lock().push(Call::Data(data[0]));
            Ok(())
        }

        fn start_song(&self) -> Result<(), FakeError> {
            self.calls.lock().push(Call::Start);
            Ok(())
        }

        fn stop_song(&self) -> Result<StopOutcome, FakeError> {
            self.calls.lock().push(Call::Stop);
            if self.stop_times_out {
                Ok(StopOutcome::TimedOut)
            } else {
                Ok(StopOutcome::Stopped { waited_ms: 0 })
            }
        }

        fn set_volume(&self, volume: u8) -> Result<(), FakeError> {
            self.calls.lock().push(Call::Volume(volume));
            Ok(())
        }
    }

    fn setup(
        decoder: FakeDecoder,
    ) -> (ChunkProducer, ConsumerLoop<Arc<FakeDecoder>>, Arc<FakeDecoder>) {
        let (tx, rx) = StreamQueue::with_capacity(8).split();
        let decoder = Arc::new(decoder);
        let consumer = ConsumerLoop::new(rx, Arc::clone(&decoder), Duration::from_millis(5))
            .with_ready_poll(Duration::ZERO);
        (tx, consumer, decoder)
    }

    fn data(tag: u8) -> Chunk {
        Chunk::Data([tag; CHUNK_SIZE])
    }

    #[test]
    fn dispatches_in_queue_order() {
        let (mut tx, mut consumer, decoder) = setup(FakeDecoder::default());
        for chunk in [Chunk::StartSong, data(1), data(2), Chunk::StopSong] {
            tx.try_enqueue(chunk).unwrap();
        }
        while consumer.run_once() {}

        assert_eq!(
            decoder.calls(),
            vec![Call::Start, Call::Data(1), Call::Data(2), Call::Stop]
        );
        let stats = consumer.stats();
        assert_eq!(stats.data_chunks, 2);
        assert_eq!(stats.songs_started, 1);
        assert_eq!(stats.songs_stopped, 1);
        assert_eq!(stats.errors, 0);
    }

    #[test]
    fn empty_queue_times_out() {
        let (_tx, mut consumer, decoder) = setup(FakeDecoder::default());
        let start = Instant::now();
        assert!(!consumer.run_once());
        assert!(start.elapsed() >= Duration::from_millis(5));
        assert!(decoder.calls().is_empty());
        // No chunk, no DREQ poll.
        assert_eq!(*decoder.polls.lock(), 0);
    }

    #[test]
    fn waits_for_data_request() {
        let (mut tx, mut consumer, decoder) = setup(FakeDecoder::default());
        *decoder.busy.lock() = 3;
        tx.try_enqueue(data(7)).unwrap();

        assert!(consumer.run_once());
        assert_eq!(decoder.calls(), vec![Call::Data(7)]);
        assert_eq!(consumer.stats().ready_waits, 3);
        assert_eq!(*decoder.polls.lock(), 4);
    }

    #[test]
    fn shutdown_while_waiting_drops_chunk() {
        let (mut tx, mut consumer, decoder) = setup(FakeDecoder::default());
        *decoder.busy.lock() = usize::MAX;
        tx.try_enqueue(data(1)).unwrap();

        consumer.shutdown_handle().request();
        assert!(consumer.run_once());
        assert!(decoder.calls().is_empty());
        assert_eq!(consumer.stats().abandoned, 1);
    }

    #[test]
    fn errors_are_counted_and_loop_continues() {
        let (mut tx, mut consumer, decoder) = setup(FakeDecoder {
            fail_data: true,
            ..FakeDecoder::default()
        });
        tx.try_enqueue(data(1)).unwrap();
        tx.try_enqueue(Chunk::StopSong).unwrap();
        while consumer.run_once() {}

        assert_eq!(decoder.calls(), vec![Call::Stop]);
        assert_eq!(consumer.stats().errors, 1);
        assert_eq!(consumer.stats().songs_stopped, 1);
    }

    #[test]
    fn stop_timeout_is_counted() {
        let (mut tx, mut consumer, _decoder) = setup(FakeDecoder {
            stop_times_out: true,
            ..FakeDecoder::default()
        });
        tx.try_enqueue(Chunk::StopSong).unwrap();
        consumer.run_once();
        assert_eq!(consumer.stats().stop_timeouts, 1);
        assert_eq!(consumer.stats().songs_stopped, 0);
    }

    #[test]
    fn spawned_thread_drains_and_stops() {
        let (mut tx, consumer, decoder) = setup(FakeDecoder::default());
        let shutdown = consumer.shutdown_handle();
        let handle = consumer.spawn().unwrap();
        assert_eq!(handle.thread().name(), Some(THREAD_NAME));

        for i in 0..50 {
            tx.enqueue(data(i), Duration::from_secs(5)).unwrap();
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        while !tx.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        // The last chunk may still be in flight.
        thread::sleep(Duration::from_millis(20));
        shutdown.request();

        let stats = handle.join().unwrap();
        assert_eq!(stats.data_chunks, 50);
        let expected: Vec<Call> = (0..50).map(Call::Data).collect();
        assert_eq!(decoder.calls(), expected);
    }

    #[test]
    fn decoder_is_shared_with_command_context() {
        let (_tx, _consumer, decoder) = setup(FakeDecoder::default());
        decoder.set_volume(30).unwrap();
        assert_eq!(decoder.calls(), vec![Call::Volume(30)]);
    }
}
