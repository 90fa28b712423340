//! Chunking arithmetic for transports with a capped per-call element count.

use crate::traits::types::PiolError;

/// Safety margin below the transport's 31-bit count limit. Transfers that
/// land exactly on the limit have been observed to fail one page short, so
/// a page is reserved.
pub const COUNT_MARGIN: usize = 4096;

/// Per-call transfer cap, in bytes.
///
/// The default sits a page under `i32::MAX`; tests construct tiny limits to
/// exercise the splitting logic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkLimits {
    max_bytes: usize,
}

impl Default for ChunkLimits {
    fn default() -> Self {
        ChunkLimits {
            max_bytes: i32::MAX as usize - COUNT_MARGIN,
        }
    }
}

impl ChunkLimits {
    /// A cap of `max_bytes` per transport call.
    ///
    /// # Errors
    /// `InvalidInput` for a zero cap.
    pub fn new(max_bytes: usize) -> Result<ChunkLimits, PiolError> {
        if max_bytes == 0 {
            return Err(PiolError::InvalidInput(
                "chunk limit must be non-zero".to_string(),
            ));
        }
        Ok(ChunkLimits { max_bytes })
    }

    /// The cap in bytes.
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Number of calls a transfer of `len` bytes splits into.
    pub fn chunk_count(&self, len: usize) -> usize {
        len.div_ceil(self.max_bytes)
    }

    /// The `(start, len)` spans of each call for a transfer of `len` bytes,
    /// in increasing offset order; the last span may be short.
    pub fn chunks(&self, len: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
        let max = self.max_bytes;
        (0..self.chunk_count(len)).map(move |i| {
            let start = i * max;
            (start, max.min(len - start))
        })
    }

    /// Blocks of `block_size` bytes that fit in one call, at least one.
    pub fn max_blocks(&self, block_size: usize) -> usize {
        if block_size == 0 {
            1
        } else {
            (self.max_bytes / block_size).max(1)
        }
    }

    /// Number of calls a transfer of `count` blocks splits into.
    pub fn block_chunk_count(&self, block_size: usize, count: usize) -> usize {
        count.div_ceil(self.max_blocks(block_size))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_chunk_count_is_ceiling() {
        let limits = ChunkLimits::new(10).unwrap();
        assert_eq!(limits.chunk_count(0), 0);
        assert_eq!(limits.chunk_count(10), 1);
        assert_eq!(limits.chunk_count(11), 2);
        assert_eq!(limits.chunk_count(35), 4);
    }

    #[test]
    fn test_chunks_cover_exactly() {
        let limits = ChunkLimits::new(10).unwrap();
        let spans: Vec<_> = limits.chunks(35).collect();
        assert_eq!(spans, vec![(0, 10), (10, 10), (20, 10), (30, 5)]);
        assert_eq!(spans.iter().map(|(_, l)| l).sum::<usize>(), 35);
    }

    #[test]
    fn test_block_limits() {
        let limits = ChunkLimits::new(100).unwrap();
        assert_eq!(limits.max_blocks(30), 3);
        assert_eq!(limits.block_chunk_count(30, 7), 3);
        // A block larger than the cap still moves one block per call.
        assert_eq!(limits.max_blocks(1000), 1);
    }

    #[test]
    fn test_zero_limit_rejected() {
        assert!(ChunkLimits::new(0).is_err());
    }
}
