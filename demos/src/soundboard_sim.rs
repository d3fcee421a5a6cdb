//! Play a track from a directory into a simulated VS1053.
//!
//! Runs the whole streaming pipeline on the host: bring-up and self-test on
//! the simulated chip, a producer loop ticking the playback controller, and
//! the consumer thread feeding the driver. Prints both sides' counters when
//! the track has been sent.
//!
//! ```text
//!   DirStorage ──► PlaybackController ──► StreamQueue ──► ConsumerLoop ──► Vs1053 ──► SimChip
//! ```
//!
//! Usage:
//!   soundboard-sim --dir ./sounds doorbell
//!   RUST_LOG=soundboard=debug soundboard-sim --dir ./sounds --stop-after-ms 500 alarm

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use soundboard::codec::Sleep;
use soundboard::prelude::*;
use soundboard::sim::SimChip;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "soundboard-sim")]
struct Args {
    /// Directory holding the tracks
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    /// Track file extension (track "bell" is read from "bell.<ext>")
    #[arg(long, default_value = "mp3")]
    ext: String,

    /// Optional TOML config; defaults are used without one
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured volume (0-100)
    #[arg(long)]
    volume: Option<u8>,

    /// Request a stop after this many milliseconds
    #[arg(long)]
    stop_after_ms: Option<u64>,

    /// List the tracks in --dir and exit
    #[arg(long)]
    list: bool,

    /// Track to play
    track: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = match args.config.as_deref() {
        Some(path) => SoundboardConfig::load(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => SoundboardConfig::default(),
    };

    let storage = DirStorage::new(&args.dir).with_extension(args.ext.clone());
    if args.list {
        for track in storage.list().context("list tracks")? {
            println!("{:>10}  {}", track.size, track.name);
        }
        return Ok(());
    }
    let Some(track) = args.track.as_deref() else {
        bail!("no track given (use --list to see what is available)");
    };

    // ── Decoder ──
    // The consumer thread yields between DREQ polls.
    let chip = SimChip::new();
    let codec = Arc::new(
        chip.driver_with_wait(Sleep(Duration::from_micros(100)))
            .with_bus_speeds(cfg.codec.slow_bus_hz, cfg.codec.fast_bus_hz),
    );
    let report = codec.bring_up().context("bring up decoder")?;
    if !report.is_healthy() {
        tracing::warn!(?report, "decoder self-test failed, continuing");
    }
    codec
        .set_volume(args.volume.unwrap_or(cfg.codec.initial_volume))
        .context("set volume")?;
    chip.clear_sdi();

    // ── Pipeline ──
    let (tx, rx) = StreamQueue::with_capacity(cfg.stream.queue_capacity).split();
    let consumer = ConsumerLoop::new(rx, Arc::clone(&codec), cfg.stream.consumer_poll());
    let shutdown = consumer.shutdown_handle();
    let sound = consumer.spawn().context("spawn consumer thread")?;

    let mut player = PlaybackController::new(storage, tx, &cfg.stream);
    player.request_play(track)?;

    let started = Instant::now();
    let stop_at = args.stop_after_ms.map(|ms| started + Duration::from_millis(ms));
    while !(player.is_idle() && player.queued() == 0) {
        if stop_at.is_some_and(|at| Instant::now() >= at) {
            player.request_stop();
        }
        player.tick()?;
        thread::sleep(Duration::from_millis(1));
    }

    shutdown.request();
    let consumer_stats = sound
        .join()
        .map_err(|_| anyhow::anyhow!("consumer thread panicked"))?;
    let producer_stats = player.stats();

    println!("track            {track}");
    println!("elapsed          {:?}", started.elapsed());
    println!("bytes read       {}", producer_stats.bytes_read);
    println!("chunks queued    {}", producer_stats.chunks_queued);
    println!("chunks dropped   {}", producer_stats.dropped_chunks);
    println!("bytes discarded  {}", producer_stats.discarded_bytes);
    println!("chunks played    {}", consumer_stats.data_chunks);
    println!("stop timeouts    {}", consumer_stats.stop_timeouts);
    println!("decoder errors   {}", consumer_stats.errors);
    println!("SDI bytes        {}", chip.sdi_bytes().len());
    println!("fill byte        {:#04X}", codec.fill_byte());
    Ok(())
}
