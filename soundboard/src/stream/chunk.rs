use crate::constants::CHUNK_SIZE;

/// One item on the stream queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// A full block of compressed audio.
    Data([u8; CHUNK_SIZE]),
    /// Prime the decoder before the first `Data` of a song.
    StartSong,
    /// Flush and cancel the song being decoded.
    StopSong,
}

impl Chunk {
    /// `true` for `StartSong` and `StopSong`.
    pub fn is_control(&self) -> bool {
        !matches!(self, Chunk::Data(_))
    }
}

/// Collects bytes into full [`Chunk::Data`] blocks.
#[derive(Debug, Clone)]
pub struct ChunkAccumulator {
    buf: [u8; CHUNK_SIZE],
    len: usize,
}

impl ChunkAccumulator {
    pub const fn new() -> Self {
        ChunkAccumulator {
            buf: [0; CHUNK_SIZE],
            len: 0,
        }
    }

    /// Append one byte; returns a chunk each time the block fills up.
    pub fn push(&mut self, byte: u8) -> Option<Chunk> {
        self.buf[self.len] = byte;
        self.len += 1;
        if self.len == CHUNK_SIZE {
            self.len = 0;
            Some(Chunk::Data(self.buf))
        } else {
            None
        }
    }

    /// Bytes waiting for the block to fill.
    pub fn pending(&self) -> usize {
        self.len
    }

    /// Throw away a partial block; returns how many bytes were discarded.
    pub fn clear(&mut self) -> usize {
        core::mem::replace(&mut self.len, 0)
    }
}

impl Default for ChunkAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_chunk_on_every_full_block() {
        let mut acc = ChunkAccumulator::new();
        let chunks: Vec<Chunk> = (0..100u8).filter_map(|b| acc.push(b)).collect();

        assert_eq!(chunks.len(), 100 / CHUNK_SIZE);
        assert_eq!(acc.pending(), 100 % CHUNK_SIZE);

        let Chunk::Data(second) = &chunks[1] else {
            panic!("expected data chunk");
        };
        assert_eq!(second[0], CHUNK_SIZE as u8);
        assert_eq!(second[CHUNK_SIZE - 1], (2 * CHUNK_SIZE - 1) as u8);
    }

    #[test]
    fn clear_discards_partial_block() {
        let mut acc = ChunkAccumulator::new();
        for b in 0..5 {
            assert!(acc.push(b).is_none());
        }
        assert_eq!(acc.clear(), 5);
        assert_eq!(acc.pending(), 0);

        // The next block starts from scratch.
        let chunk = (0..CHUNK_SIZE as u8).filter_map(|b| acc.push(b + 100)).next();
        assert_eq!(chunk, Some(Chunk::Data(core::array::from_fn(|i| i as u8 + 100))));
    }

    #[test]
    fn control_chunks() {
        assert!(Chunk::StartSong.is_control());
        assert!(Chunk::StopSong.is_control());
        assert!(!Chunk::Data([0; CHUNK_SIZE]).is_control());
    }
}
