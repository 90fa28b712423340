//! Interface for byte-addressed storage transports.

use crate::traits::types::PiolError;

/// A byte-range transport over one file, shared by all ranks at disjoint
/// offsets.
///
/// One trait call corresponds to one transport call; the chunked adapter in
/// [`crate::io`] is responsible for splitting requests that exceed the
/// transport's per-call element limit and for keeping collective call counts
/// aligned across ranks. Implementations interpret nothing: offsets and
/// buffers are raw bytes.
pub trait Storage {
    /// Short label used in diagnostics, typically the file name.
    fn name(&self) -> &str;

    /// Current size of the backing file in bytes.
    fn size(&self) -> Result<u64, PiolError>;

    /// Grow or truncate the backing file.
    fn set_size(&self, size: u64) -> Result<(), PiolError>;

    /// Read `buf.len()` bytes starting at `offset`.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), PiolError>;

    /// Write `buf` starting at `offset`.
    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<(), PiolError>;

    /// Read `offsets.len()` blocks of `block` bytes each, the i'th from
    /// `offsets[i]`, packed contiguously into `buf`.
    fn read_scattered(
        &self,
        block: usize,
        offsets: &[u64],
        buf: &mut [u8],
    ) -> Result<(), PiolError>;

    /// Write `offsets.len()` blocks of `block` bytes each from `buf`, the
    /// i'th to `offsets[i]`.
    fn write_scattered(&self, block: usize, offsets: &[u64], buf: &[u8])
        -> Result<(), PiolError>;
}
