/// Result of asking the decoder to abandon the current stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The decoder acknowledged the cancel request after roughly `waited_ms`.
    Stopped { waited_ms: u32 },
    /// The decoder never cleared its cancel flag within the retry budget.
    TimedOut,
}

/// The decoder as seen by the streaming pipeline.
///
/// Methods take `&self`: implementations serialize bus access internally so
/// the consumer thread and the command context can share one instance.
pub trait Decoder {
    /// Error type for bus operations.
    type Error: core::fmt::Debug;

    /// Whether the decoder can accept another chunk right now.
    fn data_request(&self) -> Result<bool, Self::Error>;

    /// Transfer one block of compressed audio.
    fn play_chunk(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Prime the decoder for a new song.
    fn start_song(&self) -> Result<(), Self::Error>;

    /// Flush and cancel the current song.
    fn stop_song(&self) -> Result<StopOutcome, Self::Error>;

    /// Set the output volume (0 = silent, 100 = loudest).
    fn set_volume(&self, volume: u8) -> Result<(), Self::Error>;
}

impl<D: Decoder + ?Sized> Decoder for std::sync::Arc<D> {
    type Error = D::Error;

    fn data_request(&self) -> Result<bool, Self::Error> {
        (**self).data_request()
    }

    fn play_chunk(&self, data: &[u8]) -> Result<(), Self::Error> {
        (**self).play_chunk(data)
    }

    fn start_song(&self) -> Result<(), Self::Error> {
        (**self).start_song()
    }

    fn stop_song(&self) -> Result<StopOutcome, Self::Error> {
        (**self).stop_song()
    }

    fn set_volume(&self, volume: u8) -> Result<(), Self::Error> {
        (**self).set_volume(volume)
    }
}
