//! End-to-end tests: storage → controller → queue → consumer thread → driver
//! → simulated chip.
//!
//! ```text
//! MemStorage → PlaybackController.tick() → StreamQueue
//!     → ConsumerLoop (thread "sound") → Vs1053 → SimChip SDI log
//! ```

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use crate::codec::registers as reg;
    use crate::config::StreamConfig;
    use crate::constants::CHUNK_SIZE;
    use crate::consumer::{ConsumerLoop, ConsumerStats, ShutdownHandle};
    use crate::playback::{PlaybackController, PlaybackState};
    use crate::sim::{SimChip, SimVs1053};
    use crate::storage::MemStorage;
    use crate::stream::StreamQueue;

    const FILL: u8 = 0xEE;
    const STOP_FILLER: usize = reg::END_FILL_BYTES + CHUNK_SIZE + reg::END_FILL_BYTES;

    struct Rig {
        chip: SimChip,
        codec: Arc<SimVs1053>,
        controller: PlaybackController<MemStorage>,
        consumer: Option<thread::JoinHandle<ConsumerStats>>,
        shutdown: ShutdownHandle,
    }

    impl Rig {
        fn new(chip: SimChip, storage: MemStorage, capacity: usize) -> Self {
            chip.set_wram(reg::WRAM_END_FILL_BYTE, u16::from(FILL));
            let codec = Arc::new(chip.driver());
            codec.bring_up().unwrap();
            chip.clear_sdi();

            let settings = StreamConfig {
                queue_capacity: capacity,
                read_cap: 256,
                ..StreamConfig::default()
            };
            let (tx, rx) = StreamQueue::with_capacity(capacity).split();
            let controller = PlaybackController::new(storage, tx, &settings);
            let consumer = ConsumerLoop::new(rx, Arc::clone(&codec), settings.consumer_poll());
            let shutdown = consumer.shutdown_handle();
            let consumer = Some(consumer.spawn().unwrap());

            Rig {
                chip,
                codec,
                controller,
                consumer,
                shutdown,
            }
        }

        /// Tick the producer until it is idle and the consumer has taken
        /// every chunk.
        fn run_to_idle(&mut self) {
            let deadline = Instant::now() + Duration::from_secs(10);
            while !(self.controller.is_idle() && self.controller.queued() == 0) {
                assert!(Instant::now() < deadline, "pipeline did not drain");
                self.controller.tick().unwrap();
                thread::sleep(Duration::from_millis(1));
            }
        }

        fn finish(mut self) -> (SimChip, ConsumerStats) {
            self.shutdown.request();
            let stats = self
                .consumer
                .take()
                .expect("consumer running")
                .join()
                .unwrap();
            (self.chip, stats)
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 200) as u8).collect()
    }

    fn expected_sdi(tracks: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for track in tracks {
            out.extend(std::iter::repeat(FILL).take(reg::START_FILL_BYTES));
            out.extend_from_slice(&track[..track.len() / CHUNK_SIZE * CHUNK_SIZE]);
            out.extend(std::iter::repeat(FILL).take(STOP_FILLER));
        }
        out
    }

    #[test]
    fn track_reaches_decoder_in_full_chunks() {
        let track = pattern(5000);
        let storage = MemStorage::new().with_track("alarm", track.clone());
        let mut rig = Rig::new(SimChip::new(), storage, 16);

        rig.controller.request_play("alarm").unwrap();
        rig.run_to_idle();
        assert_eq!(rig.controller.state(), PlaybackState::Stopped);
        assert_eq!(rig.controller.storage().opens(), 1);
        assert_eq!(rig.controller.storage().closes(), 1);
        assert_eq!(rig.controller.stats().dropped_chunks, 0);

        let (chip, stats) = rig.finish();
        assert_eq!(chip.sdi_bytes(), expected_sdi(&[&track[..]]));
        assert_eq!(stats.data_chunks, (5000 / CHUNK_SIZE) as u64);
        assert_eq!(stats.songs_started, 1);
        assert_eq!(stats.songs_stopped, 1);
        assert_eq!(stats.errors, 0);
    }

    #[test]
    fn dreq_backpressure_and_volume_changes() {
        let track = pattern(3000);
        let storage = MemStorage::new().with_track("t", track.clone());
        let mut rig = Rig::new(SimChip::new(), storage, 4);

        rig.controller.request_play("t").unwrap();
        for volume in [10, 90, 50] {
            rig.chip.hold_dreq_low(25);
            rig.codec.set_volume(volume).unwrap();
            for _ in 0..5 {
                rig.controller.tick().unwrap();
                thread::sleep(Duration::from_millis(1));
            }
        }
        rig.run_to_idle();
        assert_eq!(rig.codec.volume(), Some(50));

        let (chip, stats) = rig.finish();
        // Register writes never split an SDI burst.
        assert_eq!(chip.sdi_bytes(), expected_sdi(&[&track[..]]));
        assert!(chip.sdi_bursts().iter().all(|&n| n <= CHUNK_SIZE));
        assert_eq!(chip.register(reg::VOL), 0x7C7C);
        assert_eq!(stats.data_chunks, (3000 / CHUNK_SIZE) as u64);
    }

    #[test]
    fn switching_tracks_mid_song() {
        let first = vec![0x11; 64 * 1024];
        let second = pattern(700);
        let storage = MemStorage::new()
            .with_track("long", first)
            .with_track("short", second.clone());
        let mut rig = Rig::new(SimChip::new(), storage, 8);

        rig.controller.request_play("long").unwrap();
        for _ in 0..3 {
            rig.controller.tick().unwrap();
        }
        rig.controller.request_play("short").unwrap();
        rig.run_to_idle();

        let (chip, stats) = rig.finish();
        assert_eq!(stats.songs_started, 2);
        assert_eq!(stats.songs_stopped, 2);

        // The second song arrives intact after the first one's stop filler.
        let sdi = chip.sdi_bytes();
        let tail = expected_sdi(&[&second[..]]);
        assert!(sdi.ends_with(&tail));
        let head = &sdi[..sdi.len() - tail.len()];
        assert!(head.ends_with(&[FILL; 64]));
        assert!(head[reg::START_FILL_BYTES..].starts_with(&[0x11; CHUNK_SIZE]));
    }

    #[test]
    fn absent_chip_does_not_stall_stream() {
        let storage = MemStorage::new().with_track("t", pattern(2048));
        let mut rig = Rig::new(SimChip::absent(), storage, 8);
        assert!(!rig.codec.is_present());

        rig.controller.request_play("t").unwrap();
        rig.run_to_idle();

        let (_chip, stats) = rig.finish();
        assert_eq!(stats.data_chunks, 2048 / CHUNK_SIZE as u64);
        // Reads from an absent chip return zero, so the cancel looks acknowledged.
        assert_eq!(stats.songs_stopped, 1);
        assert_eq!(stats.errors, 0);
    }
}
