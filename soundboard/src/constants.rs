/// Bytes per `Data` chunk. Matches the VS1053 SDI transfer granularity: the
/// chip guarantees room for at least 32 bytes whenever DREQ is high.
pub const CHUNK_SIZE: usize = 32;

/// Default number of chunks the stream queue can hold.
pub const DEFAULT_QUEUE_CAPACITY: usize = 400;

/// Default upper bound on bytes read from storage per producer tick.
pub const DEFAULT_READ_CAP: usize = 6000;

/// Bus clock used until the decoder's clock multiplier is configured.
pub const SLOW_BUS_HZ: u32 = 200_000;

/// Bus clock used once `CLOCKF` has been programmed.
pub const FAST_BUS_HZ: u32 = 4_000_000;

/// Longest a single queue operation waits, in milliseconds. Longer timeouts
/// are clamped to it.
pub const MAX_QUEUE_WAIT_MS: u64 = 10_000;
