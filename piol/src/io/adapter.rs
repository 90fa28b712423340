//! The chunked request adapter over a [`Storage`] transport.

use crate::io::chunk::ChunkLimits;
use crate::traits::communicator::Communicator;
use crate::traits::storage::Storage;
use crate::traits::types::PiolError;

/// Issues contiguous, strided, and scattered transfers against one storage
/// transport, splitting any request whose byte count exceeds the per-call
/// cap and padding collective call counts across ranks.
///
/// Sub-calls of one request are issued in increasing offset order. Nothing
/// here interprets bytes; trace semantics live in [`crate::file`].
pub struct ChunkedIo<S: Storage> {
    storage: S,
    limits: ChunkLimits,
}

impl<S: Storage> ChunkedIo<S> {
    /// Wrap `storage` with the given per-call cap.
    pub fn new(storage: S, limits: ChunkLimits) -> ChunkedIo<S> {
        ChunkedIo { storage, limits }
    }

    /// The wrapped transport.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// The per-call cap in force.
    pub fn limits(&self) -> ChunkLimits {
        self.limits
    }

    /// Size of the backing file.
    ///
    /// # Errors
    /// Transport failures.
    pub fn file_size(&self) -> Result<u64, PiolError> {
        self.storage.size()
    }

    /// Resize the backing file.
    ///
    /// # Errors
    /// Transport failures.
    pub fn set_file_size(&self, size: u64) -> Result<(), PiolError> {
        self.storage.set_size(size)
    }

    /// Contiguous read of `buf.len()` bytes at `offset`, split into
    /// `ceil(len / max_bytes)` transport calls.
    ///
    /// # Errors
    /// Transport failures, with a logged diagnostic.
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), PiolError> {
        for (start, len) in self.limits.chunks(buf.len()) {
            self.storage
                .read_at(offset + start as u64, &mut buf[start..start + len])
                .map_err(|e| self.diagnose("read", offset + start as u64, len, e))?;
        }
        Ok(())
    }

    /// Contiguous write of `buf` at `offset`, split as for
    /// [`ChunkedIo::read`].
    ///
    /// # Errors
    /// Transport failures, with a logged diagnostic.
    pub fn write(&self, offset: u64, buf: &[u8]) -> Result<(), PiolError> {
        for (start, len) in self.limits.chunks(buf.len()) {
            self.storage
                .write_at(offset + start as u64, &buf[start..start + len])
                .map_err(|e| self.diagnose("write", offset + start as u64, len, e))?;
        }
        Ok(())
    }

    /// Read `count` regularly spaced blocks: `block` bytes every `stride`
    /// bytes starting at `offset`. The strided view is materialized as an
    /// offset list and handed to the scattered path.
    ///
    /// # Errors
    /// `InvalidInput` on buffer-size mismatch, or transport failures.
    pub fn read_strided(
        &self,
        offset: u64,
        block: usize,
        stride: u64,
        count: usize,
        buf: &mut [u8],
    ) -> Result<(), PiolError> {
        let offsets = strided_offsets(offset, stride, count);
        self.read_scattered(block, &offsets, buf)
    }

    /// Write `count` regularly spaced blocks; see
    /// [`ChunkedIo::read_strided`].
    ///
    /// # Errors
    /// `InvalidInput` on buffer-size mismatch, or transport failures.
    pub fn write_strided(
        &self,
        offset: u64,
        block: usize,
        stride: u64,
        count: usize,
        buf: &[u8],
    ) -> Result<(), PiolError> {
        let offsets = strided_offsets(offset, stride, count);
        self.write_scattered(block, &offsets, buf)
    }

    /// Read one `block`-byte block per entry of `offsets`, packed into
    /// `buf` in list order, at most `max_bytes / block` blocks per
    /// transport call.
    ///
    /// # Errors
    /// `InvalidInput` on buffer-size mismatch, or transport failures.
    pub fn read_scattered(
        &self,
        block: usize,
        offsets: &[u64],
        buf: &mut [u8],
    ) -> Result<(), PiolError> {
        check_block_buf(block, offsets.len(), buf.len())?;
        let per = self.limits.max_blocks(block);
        for start in (0..offsets.len()).step_by(per) {
            let end = (start + per).min(offsets.len());
            self.storage
                .read_scattered(
                    block,
                    &offsets[start..end],
                    &mut buf[start * block..end * block],
                )
                .map_err(|e| {
                    self.diagnose("scattered read", offsets[start], (end - start) * block, e)
                })?;
        }
        Ok(())
    }

    /// Write one `block`-byte block per entry of `offsets` from `buf`; see
    /// [`ChunkedIo::read_scattered`].
    ///
    /// # Errors
    /// `InvalidInput` on buffer-size mismatch, or transport failures.
    pub fn write_scattered(
        &self,
        block: usize,
        offsets: &[u64],
        buf: &[u8],
    ) -> Result<(), PiolError> {
        check_block_buf(block, offsets.len(), buf.len())?;
        let per = self.limits.max_blocks(block);
        for start in (0..offsets.len()).step_by(per) {
            let end = (start + per).min(offsets.len());
            self.storage
                .write_scattered(block, &offsets[start..end], &buf[start * block..end * block])
                .map_err(|e| {
                    self.diagnose("scattered write", offsets[start], (end - start) * block, e)
                })?;
        }
        Ok(())
    }

    /// Collective contiguous read. Ranks gather each other's chunk counts
    /// and every rank issues the maximum number of transport calls, padding
    /// with zero-size calls, so no rank exits the collective early.
    ///
    /// Transport failures are fatal: the diagnostic is logged and the job
    /// aborted, since a half-completed collective cannot be repaired
    /// locally.
    pub fn read_collective<C: Communicator>(&self, comm: &C, offset: u64, buf: &mut [u8]) {
        let rounds = self.collective_rounds(comm, self.limits.chunk_count(buf.len()));
        let spans: Vec<(usize, usize)> = self.limits.chunks(buf.len()).collect();
        for round in 0..rounds {
            let result = match spans.get(round) {
                Some(&(start, len)) => self
                    .storage
                    .read_at(offset + start as u64, &mut buf[start..start + len]),
                None => self.storage.read_at(0, &mut []),
            };
            if let Err(e) = result {
                self.fatal(comm, "collective read", offset, buf.len(), e);
            }
        }
    }

    /// Collective contiguous write; see [`ChunkedIo::read_collective`].
    pub fn write_collective<C: Communicator>(&self, comm: &C, offset: u64, buf: &[u8]) {
        let rounds = self.collective_rounds(comm, self.limits.chunk_count(buf.len()));
        let spans: Vec<(usize, usize)> = self.limits.chunks(buf.len()).collect();
        for round in 0..rounds {
            let result = match spans.get(round) {
                Some(&(start, len)) => self
                    .storage
                    .write_at(offset + start as u64, &buf[start..start + len]),
                None => self.storage.write_at(0, &[]),
            };
            if let Err(e) = result {
                self.fatal(comm, "collective write", offset, buf.len(), e);
            }
        }
    }

    /// Collective scattered read; call counts are padded as for
    /// [`ChunkedIo::read_collective`].
    pub fn read_scattered_collective<C: Communicator>(
        &self,
        comm: &C,
        block: usize,
        offsets: &[u64],
        buf: &mut [u8],
    ) {
        if let Err(e) = check_block_buf(block, offsets.len(), buf.len()) {
            self.fatal(comm, "collective scattered read", 0, buf.len(), e);
        }
        let per = self.limits.max_blocks(block);
        let rounds =
            self.collective_rounds(comm, self.limits.block_chunk_count(block, offsets.len()));
        for round in 0..rounds {
            let start = round * per;
            let result = if start < offsets.len() {
                let end = (start + per).min(offsets.len());
                self.storage.read_scattered(
                    block,
                    &offsets[start..end],
                    &mut buf[start * block..end * block],
                )
            } else {
                self.storage.read_scattered(block, &[], &mut [])
            };
            if let Err(e) = result {
                self.fatal(comm, "collective scattered read", 0, buf.len(), e);
            }
        }
    }

    /// Collective scattered write; see
    /// [`ChunkedIo::read_scattered_collective`].
    pub fn write_scattered_collective<C: Communicator>(
        &self,
        comm: &C,
        block: usize,
        offsets: &[u64],
        buf: &[u8],
    ) {
        if let Err(e) = check_block_buf(block, offsets.len(), buf.len()) {
            self.fatal(comm, "collective scattered write", 0, buf.len(), e);
        }
        let per = self.limits.max_blocks(block);
        let rounds =
            self.collective_rounds(comm, self.limits.block_chunk_count(block, offsets.len()));
        for round in 0..rounds {
            let start = round * per;
            let result = if start < offsets.len() {
                let end = (start + per).min(offsets.len());
                self.storage.write_scattered(
                    block,
                    &offsets[start..end],
                    &buf[start * block..end * block],
                )
            } else {
                self.storage.write_scattered(block, &[], &[])
            };
            if let Err(e) = result {
                self.fatal(comm, "collective scattered write", 0, buf.len(), e);
            }
        }
    }

    /// Gather every rank's chunk count and return the group maximum.
    fn collective_rounds<C: Communicator>(&self, comm: &C, local: usize) -> usize {
        let counts = comm.gather_u64(&[local as u64]);
        counts.into_iter().max().unwrap_or(0) as usize
    }

    fn diagnose(&self, op: &str, offset: u64, len: usize, e: PiolError) -> PiolError {
        log::error!(
            "{}: {} of {} bytes at offset {} failed: {}",
            self.storage.name(),
            op,
            len,
            offset,
            e
        );
        e
    }

    fn fatal<C: Communicator>(&self, comm: &C, op: &str, offset: u64, len: usize, e: PiolError) -> ! {
        log::error!(
            "{}: {} of {} bytes at offset {} failed: {}; aborting job",
            self.storage.name(),
            op,
            len,
            offset,
            e
        );
        comm.abort(1)
    }
}

fn strided_offsets(offset: u64, stride: u64, count: usize) -> Vec<u64> {
    (0..count as u64).map(|i| offset + i * stride).collect()
}

fn check_block_buf(block: usize, count: usize, buf_len: usize) -> Result<(), PiolError> {
    if buf_len != block * count {
        return Err(PiolError::InvalidInput(format!(
            "buffer of {} bytes for {} blocks of {} bytes",
            buf_len, count, block
        )));
    }
    Ok(())
}
