//! SEG-Y geometry, header field codec, and the file handle built on the
//! chunked I/O adapter.
//!
//! Only the metadata side of the format is interpreted here: trace sample
//! payloads are moved verbatim, with the numeric encoding carried as a
//! [`SampleFormat`] tag for external codecs.

use std::sync::Arc;

use crate::io::adapter::ChunkedIo;
use crate::io::chunk::ChunkLimits;
use crate::meta::param::TraceMetadata;
use crate::meta::rule::{Key, Rule, RuleEntry};
use crate::traits::communicator::Communicator;
use crate::traits::metadata::ReadMeta;
use crate::traits::storage::Storage;
use crate::traits::types::PiolError;

/// Length of the EBCDIC text header at the start of the file.
pub const TEXT_HEADER_LEN: usize = 3200;

/// Length of the binary file header following the text header.
pub const BIN_HEADER_LEN: usize = 400;

/// Combined length of the file headers preceding the first trace.
pub const FILE_HEADER_LEN: usize = TEXT_HEADER_LEN + BIN_HEADER_LEN;

/// Length of the fixed header preceding each trace's samples.
pub const TRACE_HEADER_LEN: usize = 240;

/// Bytes per stored sample value.
pub const SAMPLE_LEN: usize = 4;

// Binary file header field offsets, from the start of the file.
const BIN_INTERVAL: usize = 3216;
const BIN_NS: usize = 3220;
const BIN_FORMAT: usize = 3224;

// EBCDIC blank, used to fill fresh text headers.
const EBCDIC_SPACE: u8 = 0x40;

/// Numeric encoding of trace samples, from the binary header format code.
///
/// Decoding is an external concern; the PIOL moves sample payloads verbatim.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleFormat {
    /// IBM hexadecimal floating point.
    IbmFloat,
    /// Big-endian IEEE-754 single precision.
    IeeeFloat,
}

impl SampleFormat {
    /// Parse a binary-header format code.
    ///
    /// # Errors
    /// `Format` for codes other than 1 (IBM) and 5 (IEEE).
    pub fn from_code(code: u16) -> Result<SampleFormat, PiolError> {
        match code {
            1 => Ok(SampleFormat::IbmFloat),
            5 => Ok(SampleFormat::IeeeFloat),
            other => Err(PiolError::Format(format!(
                "unsupported sample format code {}",
                other
            ))),
        }
    }

    /// The binary-header format code for this encoding.
    pub fn code(&self) -> u16 {
        match self {
            SampleFormat::IbmFloat => 1,
            SampleFormat::IeeeFloat => 5,
        }
    }
}

/// Trace header field positions, as 1-based start bytes per SEG-Y rev 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tr {
    /// Trace sequence number within the line.
    SeqNum = 1,
    /// Trace sequence number within the file.
    SeqFNum = 5,
    /// Original field record number.
    ORec = 9,
    /// Energy source point number.
    ENSrcNum = 17,
    /// Trace number within the ensemble.
    SeqENum = 25,
    /// Trace identification code.
    Tic = 29,
    /// Number of vertically summed traces.
    VStack = 31,
    /// Number of horizontally stacked traces.
    HStack = 33,
    /// Source to receiver distance.
    CDist = 37,
    /// Receiver group elevation.
    RcvElev = 41,
    /// Surface elevation at source.
    SrcElev = 45,
    /// Source depth below surface.
    SrcDepth = 49,
    /// Water depth at source.
    WtrDepSrc = 61,
    /// Water depth at receiver group.
    WtrDepRcv = 65,
    /// Scalar applied to elevations and depths.
    ScaleElev = 69,
    /// Scalar applied to coordinates.
    ScaleCoord = 71,
    /// Source x coordinate.
    XSrc = 73,
    /// Source y coordinate.
    YSrc = 77,
    /// Receiver group x coordinate.
    XRcv = 81,
    /// Receiver group y coordinate.
    YRcv = 85,
    /// Number of samples in this trace.
    Ns = 115,
    /// Sample interval in microseconds.
    Inc = 117,
    /// CMP x coordinate.
    XCmp = 181,
    /// CMP y coordinate.
    YCmp = 185,
    /// Inline number.
    Il = 189,
    /// Crossline number.
    Xl = 193,
    /// Shotpoint number.
    ShotNum = 197,
}

impl Tr {
    /// Zero-based byte offset of the field within the trace header.
    pub fn byte(self) -> usize {
        self as usize - 1
    }
}

/// Storage class and header placement for one [`Key`].
#[derive(Clone, Copy, Debug)]
pub(crate) enum KeySpec {
    Float { loc: Tr, scale_loc: Tr },
    Long { loc: Tr },
    Short { loc: Tr },
    Index,
    Copy,
}

/// The fixed resolution of each key onto a storage class and header
/// location.
pub(crate) fn key_spec(key: Key) -> KeySpec {
    match key {
        Key::Copy => KeySpec::Copy,
        Key::Ltn | Key::Gtn => KeySpec::Index,
        Key::Tnl => KeySpec::Long { loc: Tr::SeqNum },
        Key::Tnr => KeySpec::Long { loc: Tr::SeqFNum },
        Key::Tn => KeySpec::Long { loc: Tr::ORec },
        Key::Tne => KeySpec::Long { loc: Tr::SeqENum },
        Key::SrcNum => KeySpec::Long { loc: Tr::ENSrcNum },
        Key::ShotNum => KeySpec::Long { loc: Tr::ShotNum },
        Key::Il => KeySpec::Long { loc: Tr::Il },
        Key::Xl => KeySpec::Long { loc: Tr::Xl },
        Key::Ns => KeySpec::Long { loc: Tr::Ns },
        Key::SampleInterval => KeySpec::Long { loc: Tr::Inc },
        Key::Offset => KeySpec::Long { loc: Tr::CDist },
        Key::Tic => KeySpec::Short { loc: Tr::Tic },
        Key::VStack => KeySpec::Short { loc: Tr::VStack },
        Key::HStack => KeySpec::Short { loc: Tr::HStack },
        Key::RcvElev => KeySpec::Float {
            loc: Tr::RcvElev,
            scale_loc: Tr::ScaleElev,
        },
        Key::SrcElev => KeySpec::Float {
            loc: Tr::SrcElev,
            scale_loc: Tr::ScaleElev,
        },
        Key::SrcDepth => KeySpec::Float {
            loc: Tr::SrcDepth,
            scale_loc: Tr::ScaleElev,
        },
        Key::WaterDepthSrc => KeySpec::Float {
            loc: Tr::WtrDepSrc,
            scale_loc: Tr::ScaleElev,
        },
        Key::WaterDepthRcv => KeySpec::Float {
            loc: Tr::WtrDepRcv,
            scale_loc: Tr::ScaleElev,
        },
        Key::XSrc => KeySpec::Float {
            loc: Tr::XSrc,
            scale_loc: Tr::ScaleCoord,
        },
        Key::YSrc => KeySpec::Float {
            loc: Tr::YSrc,
            scale_loc: Tr::ScaleCoord,
        },
        Key::XRcv => KeySpec::Float {
            loc: Tr::XRcv,
            scale_loc: Tr::ScaleCoord,
        },
        Key::YRcv => KeySpec::Float {
            loc: Tr::YRcv,
            scale_loc: Tr::ScaleCoord,
        },
        Key::XCmp => KeySpec::Float {
            loc: Tr::XCmp,
            scale_loc: Tr::ScaleCoord,
        },
        Key::YCmp => KeySpec::Float {
            loc: Tr::YCmp,
            scale_loc: Tr::ScaleCoord,
        },
    }
}

fn be_i16(header: &[u8], loc: Tr) -> i16 {
    let b = loc.byte();
    i16::from_be_bytes([header[b], header[b + 1]])
}

fn be_u16(header: &[u8], loc: Tr) -> u16 {
    let b = loc.byte();
    u16::from_be_bytes([header[b], header[b + 1]])
}

fn be_i32(header: &[u8], loc: Tr) -> i32 {
    let b = loc.byte();
    i32::from_be_bytes([header[b], header[b + 1], header[b + 2], header[b + 3]])
}

fn set_be_i16(header: &mut [u8], loc: Tr, val: i16) {
    header[loc.byte()..loc.byte() + 2].copy_from_slice(&val.to_be_bytes());
}

fn set_be_u16(header: &mut [u8], loc: Tr, val: u16) {
    header[loc.byte()..loc.byte() + 2].copy_from_slice(&val.to_be_bytes());
}

fn set_be_i32(header: &mut [u8], loc: Tr, val: i32) {
    header[loc.byte()..loc.byte() + 4].copy_from_slice(&val.to_be_bytes());
}

/// Read an integer header field at its native width.
fn field_i64(header: &[u8], loc: Tr) -> i64 {
    match loc {
        Tr::Ns | Tr::Inc => i64::from(be_u16(header, loc)),
        Tr::Tic | Tr::VStack | Tr::HStack | Tr::ScaleElev | Tr::ScaleCoord => {
            i64::from(be_i16(header, loc))
        }
        _ => i64::from(be_i32(header, loc)),
    }
}

/// Write an integer header field at its native width.
fn set_field_i64(header: &mut [u8], loc: Tr, val: i64) {
    match loc {
        Tr::Ns | Tr::Inc => set_be_u16(header, loc, val as u16),
        Tr::Tic | Tr::VStack | Tr::HStack | Tr::ScaleElev | Tr::ScaleCoord => {
            set_be_i16(header, loc, val as i16)
        }
        _ => set_be_i32(header, loc, val as i32),
    }
}

/// The multiplier a stored scale field applies to its raw integer values.
fn scale_factor(scalar: i16) -> f64 {
    match scalar {
        0 => 1.0,
        s if s > 0 => f64::from(s),
        s => 1.0 / f64::from(-s),
    }
}

/// Choose the scale field that preserves the most precision for `vals`
/// while keeping each raw value inside an i32 field. Returns 1 for whole
/// numbers, otherwise a negative power of ten (divisor form).
pub(crate) fn coord_scalar(vals: &[f64]) -> i16 {
    let fits = |d: f64| {
        vals.iter()
            .all(|&v| (v * d).abs() <= f64::from(i32::MAX) && ((v * d).round() - v * d).abs() < 1e-5)
    };
    if fits(1.0) {
        return 1;
    }
    for exp in 1..=4u32 {
        let d = 10f64.powi(exp as i32);
        if fits(d) {
            return -(d as i16);
        }
    }
    // Cap at four decimal digits, the finest divisor the format encodes.
    -10000
}

/// Fill record `rec` of `prm` from a raw trace header, for every key the
/// rule carries. `ltn` and `gtn` seed the index-only entries.
pub(crate) fn extract_metadata(prm: &mut TraceMetadata, rec: usize, header: &[u8], ltn: u64, gtn: u64) {
    let rule = Arc::clone(prm.rule());
    for (key, entry) in rule.entries() {
        match *entry {
            RuleEntry::Float { loc, scale_loc, .. } => {
                let raw = f64::from(be_i32(header, loc));
                let val = raw * scale_factor(be_i16(header, scale_loc));
                let _ = prm.set_f64(rec, key, val);
            }
            RuleEntry::Long { loc, .. } => {
                let _ = prm.set_i64(rec, key, field_i64(header, loc));
            }
            RuleEntry::Short { loc, .. } => {
                let _ = prm.set_i64(rec, key, field_i64(header, loc));
            }
            RuleEntry::Index { .. } => {
                let val = match key {
                    Key::Ltn => ltn,
                    _ => gtn,
                };
                let _ = prm.set_index(rec, key, val);
            }
            RuleEntry::Copy => {
                if let Some(block) = prm.copy_block_mut(rec) {
                    block.copy_from_slice(&header[..TRACE_HEADER_LEN]);
                }
            }
        }
    }
}

/// Render record `rec` of `prm` into a raw trace header.
///
/// When the rule carries a copy block it seeds the header first, so fields
/// outside the rule survive a read-modify-write; typed entries then overlay
/// it. Float groups sharing a scale field get one common scalar.
pub(crate) fn insert_metadata(prm: &TraceMetadata, rec: usize, header: &mut [u8]) {
    let rule = Arc::clone(prm.rule());
    if let Some(block) = prm.copy_block(rec) {
        header[..TRACE_HEADER_LEN].copy_from_slice(block);
    }
    // One pass to fix the scalar per scale group, then the values.
    for scale_loc in [Tr::ScaleCoord, Tr::ScaleElev] {
        let group: Vec<f64> = rule
            .entries()
            .filter_map(|(key, entry)| match *entry {
                RuleEntry::Float { scale_loc: s, .. } if s == scale_loc => {
                    prm.get_f64(rec, key).ok()
                }
                _ => None,
            })
            .collect();
        if group.is_empty() {
            continue;
        }
        let scalar = coord_scalar(&group);
        set_be_i16(header, scale_loc, scalar);
        let factor = scale_factor(scalar);
        for (key, entry) in rule.entries() {
            if let RuleEntry::Float { loc, scale_loc: s, .. } = *entry {
                if s != scale_loc {
                    continue;
                }
                if let Ok(val) = prm.get_f64(rec, key) {
                    set_be_i32(header, loc, (val / factor).round() as i32);
                }
            }
        }
    }
    for (key, entry) in rule.entries() {
        match *entry {
            RuleEntry::Long { loc, .. } | RuleEntry::Short { loc, .. } => {
                if let Ok(val) = prm.get_i64(rec, key) {
                    set_field_i64(header, loc, val);
                }
            }
            _ => {}
        }
    }
}

/// A SEG-Y file bound to a [`Storage`] transport through the chunked
/// adapter.
///
/// All ranks share the underlying file at disjoint byte ranges; geometry
/// (sample count, trace count) is fixed at open/create time.
pub struct SegyFile<S: Storage> {
    io: ChunkedIo<S>,
    ns: usize,
    interval: u16,
    format: SampleFormat,
    n_traces: u64,
}

impl<S: Storage> SegyFile<S> {
    /// Open an existing file, reading its geometry from the binary header.
    ///
    /// A trailing fragment shorter than one whole trace is ignored with a
    /// warning.
    ///
    /// # Errors
    /// `Format` if the file is shorter than its headers or carries an
    /// unknown sample format code.
    pub fn open(storage: S, limits: ChunkLimits) -> Result<SegyFile<S>, PiolError> {
        let io = ChunkedIo::new(storage, limits);
        let size = io.file_size()?;
        if (size as usize) < FILE_HEADER_LEN {
            return Err(PiolError::Format(format!(
                "{}: {} bytes is too short for a SEG-Y file",
                io.storage().name(),
                size
            )));
        }
        let mut header = vec![0u8; FILE_HEADER_LEN];
        io.read(0, &mut header)?;
        let ns = usize::from(u16::from_be_bytes([header[BIN_NS], header[BIN_NS + 1]]));
        let interval = u16::from_be_bytes([header[BIN_INTERVAL], header[BIN_INTERVAL + 1]]);
        let format =
            SampleFormat::from_code(u16::from_be_bytes([header[BIN_FORMAT], header[BIN_FORMAT + 1]]))?;
        let trace_len = (TRACE_HEADER_LEN + ns * SAMPLE_LEN) as u64;
        let payload = size - FILE_HEADER_LEN as u64;
        let n_traces = payload / trace_len;
        if payload % trace_len != 0 {
            log::warn!(
                "{}: {} trailing bytes do not form a whole trace, ignored",
                io.storage().name(),
                payload % trace_len
            );
        }
        Ok(SegyFile {
            io,
            ns,
            interval,
            format,
            n_traces,
        })
    }

    /// Create a file sized for `n_traces` traces of `ns` samples, writing
    /// fresh file headers.
    ///
    /// # Errors
    /// Transport failures sizing or writing the headers.
    pub fn create(
        storage: S,
        limits: ChunkLimits,
        ns: usize,
        interval: u16,
        format: SampleFormat,
        n_traces: u64,
    ) -> Result<SegyFile<S>, PiolError> {
        let io = ChunkedIo::new(storage, limits);
        let trace_len = (TRACE_HEADER_LEN + ns * SAMPLE_LEN) as u64;
        io.set_file_size(FILE_HEADER_LEN as u64 + n_traces * trace_len)?;
        let mut header = vec![0u8; FILE_HEADER_LEN];
        header[..TEXT_HEADER_LEN].fill(EBCDIC_SPACE);
        header[BIN_INTERVAL..BIN_INTERVAL + 2].copy_from_slice(&interval.to_be_bytes());
        header[BIN_NS..BIN_NS + 2].copy_from_slice(&(ns as u16).to_be_bytes());
        header[BIN_FORMAT..BIN_FORMAT + 2].copy_from_slice(&format.code().to_be_bytes());
        io.write(0, &header)?;
        Ok(SegyFile {
            io,
            ns,
            interval,
            format,
            n_traces,
        })
    }

    /// Samples per trace.
    pub fn ns(&self) -> usize {
        self.ns
    }

    /// Sample interval in microseconds.
    pub fn interval(&self) -> u16 {
        self.interval
    }

    /// Sample payload encoding.
    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Number of whole traces in the file.
    pub fn n_traces(&self) -> u64 {
        self.n_traces
    }

    /// The adapter this file issues its transfers through.
    pub fn io(&self) -> &ChunkedIo<S> {
        &self.io
    }

    fn trace_len(&self) -> u64 {
        (TRACE_HEADER_LEN + self.ns * SAMPLE_LEN) as u64
    }

    fn trace_offset(&self, gtn: u64) -> u64 {
        FILE_HEADER_LEN as u64 + gtn * self.trace_len()
    }

    fn data_offset(&self, gtn: u64) -> u64 {
        self.trace_offset(gtn) + TRACE_HEADER_LEN as u64
    }

    /// Clamp a `start`/`count` request to the known extent, warning when it
    /// reaches past the end.
    fn clamp(&self, start: u64, count: usize) -> usize {
        if start >= self.n_traces {
            if count > 0 {
                log::warn!(
                    "{}: trace range {}..{} starts past extent {}, nothing to transfer",
                    self.io.storage().name(),
                    start,
                    start + count as u64,
                    self.n_traces
                );
            }
            return 0;
        }
        let avail = (self.n_traces - start) as usize;
        if count > avail {
            log::warn!(
                "{}: trace range {}..{} extends past extent {}, truncated",
                self.io.storage().name(),
                start,
                start + count as u64,
                self.n_traces
            );
        }
        count.min(avail)
    }

    /// Read metadata for the contiguous trace range `start..start + count`.
    /// Local trace numbers are `0..count`, global trace numbers
    /// `start..start + count`.
    ///
    /// # Errors
    /// Transport failures from the strided header read.
    pub fn read_metadata(
        &self,
        start: u64,
        count: usize,
        rule: &Arc<Rule>,
    ) -> Result<TraceMetadata, PiolError> {
        let count = self.clamp(start, count);
        let mut buf = vec![0u8; count * TRACE_HEADER_LEN];
        self.io.read_strided(
            self.trace_offset(start),
            TRACE_HEADER_LEN,
            self.trace_len(),
            count,
            &mut buf,
        )?;
        let mut prm = TraceMetadata::new(Arc::clone(rule), count);
        for (i, header) in buf.chunks_exact(TRACE_HEADER_LEN).enumerate() {
            extract_metadata(&mut prm, i, header, i as u64, start + i as u64);
        }
        Ok(prm)
    }

    /// Write metadata records over the headers of the contiguous trace
    /// range starting at `start`.
    ///
    /// # Errors
    /// Transport failures from the strided header write.
    pub fn write_metadata(&self, start: u64, prm: &TraceMetadata) -> Result<(), PiolError> {
        let count = self.clamp(start, prm.size());
        let mut buf = vec![0u8; count * TRACE_HEADER_LEN];
        for (i, header) in buf.chunks_exact_mut(TRACE_HEADER_LEN).enumerate() {
            insert_metadata(prm, i, header);
        }
        self.io.write_strided(
            self.trace_offset(start),
            TRACE_HEADER_LEN,
            self.trace_len(),
            count,
            &buf,
        )
    }

    /// Read metadata for the traces named by `gtns`, in that order. Local
    /// trace numbers follow list position. This is the de-sorted access
    /// path; callers reading large lists should first re-sort the list into
    /// ascending file order via [`crate::sort::order::offset_order`].
    ///
    /// # Errors
    /// `InvalidInput` if a listed trace is out of range, or transport
    /// failures.
    pub fn read_metadata_scattered(
        &self,
        gtns: &[u64],
        rule: &Arc<Rule>,
    ) -> Result<TraceMetadata, PiolError> {
        let offsets = self.scatter_offsets(gtns, false)?;
        let mut buf = vec![0u8; gtns.len() * TRACE_HEADER_LEN];
        self.io.read_scattered(TRACE_HEADER_LEN, &offsets, &mut buf)?;
        let mut prm = TraceMetadata::new(Arc::clone(rule), gtns.len());
        for (i, header) in buf.chunks_exact(TRACE_HEADER_LEN).enumerate() {
            extract_metadata(&mut prm, i, header, i as u64, gtns[i]);
        }
        Ok(prm)
    }

    /// Write metadata records over the headers of the traces named by
    /// `gtns`.
    ///
    /// # Errors
    /// `InvalidInput` on out-of-range traces or record-count mismatch, or
    /// transport failures.
    pub fn write_metadata_scattered(
        &self,
        gtns: &[u64],
        prm: &TraceMetadata,
    ) -> Result<(), PiolError> {
        if gtns.len() != prm.size() {
            return Err(PiolError::InvalidInput(format!(
                "{} offsets for {} metadata records",
                gtns.len(),
                prm.size()
            )));
        }
        let offsets = self.scatter_offsets(gtns, false)?;
        let mut buf = vec![0u8; gtns.len() * TRACE_HEADER_LEN];
        for (i, header) in buf.chunks_exact_mut(TRACE_HEADER_LEN).enumerate() {
            insert_metadata(prm, i, header);
        }
        self.io.write_scattered(TRACE_HEADER_LEN, &offsets, &buf)
    }

    /// Read the sample payloads of the contiguous trace range
    /// `start..start + count` into `buf` (`count * ns * 4` bytes).
    ///
    /// # Errors
    /// `InvalidInput` on buffer-size mismatch, or transport failures.
    pub fn read_trace_data(&self, start: u64, count: usize, buf: &mut [u8]) -> Result<(), PiolError> {
        let count = self.clamp(start, count);
        let len = count * self.ns * SAMPLE_LEN;
        self.io.read_strided(
            self.data_offset(start),
            self.ns * SAMPLE_LEN,
            self.trace_len(),
            count,
            &mut buf[..len],
        )
    }

    /// Write sample payloads over the contiguous trace range starting at
    /// `start`.
    ///
    /// # Errors
    /// `InvalidInput` on buffer-size mismatch, or transport failures.
    pub fn write_trace_data(&self, start: u64, count: usize, buf: &[u8]) -> Result<(), PiolError> {
        let count = self.clamp(start, count);
        let len = count * self.ns * SAMPLE_LEN;
        self.io.write_strided(
            self.data_offset(start),
            self.ns * SAMPLE_LEN,
            self.trace_len(),
            count,
            &buf[..len],
        )
    }

    /// Read the sample payloads of the traces named by `gtns`, packed in
    /// list order.
    ///
    /// # Errors
    /// `InvalidInput` on out-of-range traces, or transport failures.
    pub fn read_trace_data_scattered(&self, gtns: &[u64], buf: &mut [u8]) -> Result<(), PiolError> {
        let offsets = self.scatter_offsets(gtns, true)?;
        self.io.read_scattered(self.ns * SAMPLE_LEN, &offsets, buf)
    }

    /// Write sample payloads over the traces named by `gtns`, from `buf` in
    /// list order.
    ///
    /// # Errors
    /// `InvalidInput` on out-of-range traces, or transport failures.
    pub fn write_trace_data_scattered(&self, gtns: &[u64], buf: &[u8]) -> Result<(), PiolError> {
        let offsets = self.scatter_offsets(gtns, true)?;
        self.io.write_scattered(self.ns * SAMPLE_LEN, &offsets, buf)
    }

    /// Collective variant of [`SegyFile::read_metadata`]; every rank must
    /// call with its own range.
    pub fn read_metadata_collective<C: Communicator>(
        &self,
        comm: &C,
        start: u64,
        count: usize,
        rule: &Arc<Rule>,
    ) -> Result<TraceMetadata, PiolError> {
        let count = self.clamp(start, count);
        let mut buf = vec![0u8; count * TRACE_HEADER_LEN];
        let offsets: Vec<u64> = (0..count)
            .map(|i| self.trace_offset(start + i as u64))
            .collect();
        self.io
            .read_scattered_collective(comm, TRACE_HEADER_LEN, &offsets, &mut buf);
        let mut prm = TraceMetadata::new(Arc::clone(rule), count);
        for (i, header) in buf.chunks_exact(TRACE_HEADER_LEN).enumerate() {
            extract_metadata(&mut prm, i, header, i as u64, start + i as u64);
        }
        Ok(prm)
    }

    /// Collective variant of [`SegyFile::read_trace_data_scattered`].
    pub fn read_trace_data_scattered_collective<C: Communicator>(
        &self,
        comm: &C,
        gtns: &[u64],
        buf: &mut [u8],
    ) -> Result<(), PiolError> {
        let offsets = self.scatter_offsets(gtns, true)?;
        self.io
            .read_scattered_collective(comm, self.ns * SAMPLE_LEN, &offsets, buf);
        Ok(())
    }

    /// Collective variant of [`SegyFile::write_trace_data_scattered`].
    pub fn write_trace_data_scattered_collective<C: Communicator>(
        &self,
        comm: &C,
        gtns: &[u64],
        buf: &[u8],
    ) -> Result<(), PiolError> {
        let offsets = self.scatter_offsets(gtns, true)?;
        self.io
            .write_scattered_collective(comm, self.ns * SAMPLE_LEN, &offsets, buf);
        Ok(())
    }

    fn scatter_offsets(&self, gtns: &[u64], data: bool) -> Result<Vec<u64>, PiolError> {
        if let Some(&bad) = gtns.iter().find(|&&g| g >= self.n_traces) {
            return Err(PiolError::InvalidInput(format!(
                "trace {} out of range, file holds {}",
                bad, self.n_traces
            )));
        }
        Ok(gtns
            .iter()
            .map(|&g| {
                if data {
                    self.data_offset(g)
                } else {
                    self.trace_offset(g)
                }
            })
            .collect())
    }
}

impl<S: Storage> ReadMeta for SegyFile<S> {
    fn num_traces(&self) -> u64 {
        self.n_traces
    }

    fn read_meta(
        &self,
        start: u64,
        count: usize,
        rule: &Arc<Rule>,
    ) -> Result<TraceMetadata, PiolError> {
        self.read_metadata(start, count, rule)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::io::posix::FileStorage;
    use approx::assert_relative_eq;
    use std::path::PathBuf;

    fn tmp_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("piol_segy_{}_{}", tag, std::process::id()))
    }

    fn header_rule() -> Arc<Rule> {
        Arc::new(
            Rule::new(&[
                Key::XSrc,
                Key::YSrc,
                Key::XRcv,
                Key::YRcv,
                Key::SrcElev,
                Key::Il,
                Key::Xl,
                Key::Tic,
                Key::Ltn,
                Key::Gtn,
            ])
            .unwrap(),
        )
    }

    #[test]
    fn test_header_field_round_trip() {
        let rule = header_rule();
        let mut prm = TraceMetadata::new(Arc::clone(&rule), 1);
        prm.set_f64(0, Key::XSrc, 1234.25).unwrap();
        prm.set_f64(0, Key::YSrc, -56.5).unwrap();
        prm.set_f64(0, Key::XRcv, 9000.0).unwrap();
        prm.set_f64(0, Key::YRcv, 42.75).unwrap();
        prm.set_f64(0, Key::SrcElev, -12.0).unwrap();
        prm.set_i64(0, Key::Il, 1001).unwrap();
        prm.set_i64(0, Key::Xl, 2002).unwrap();
        prm.set_i64(0, Key::Tic, 1).unwrap();

        let mut header = [0u8; TRACE_HEADER_LEN];
        insert_metadata(&prm, 0, &mut header);

        let mut back = TraceMetadata::new(Arc::clone(&rule), 1);
        extract_metadata(&mut back, 0, &header, 5, 17);
        assert_relative_eq!(back.get_f64(0, Key::XSrc).unwrap(), 1234.25, epsilon = 1e-6);
        assert_relative_eq!(back.get_f64(0, Key::YSrc).unwrap(), -56.5, epsilon = 1e-6);
        assert_relative_eq!(back.get_f64(0, Key::YRcv).unwrap(), 42.75, epsilon = 1e-6);
        assert_relative_eq!(back.get_f64(0, Key::SrcElev).unwrap(), -12.0, epsilon = 1e-6);
        assert_eq!(back.get_i64(0, Key::Il).unwrap(), 1001);
        assert_eq!(back.get_i64(0, Key::Xl).unwrap(), 2002);
        assert_eq!(back.get_i64(0, Key::Tic).unwrap(), 1);
        assert_eq!(back.get_index(0, Key::Ltn).unwrap(), 5);
        assert_eq!(back.get_index(0, Key::Gtn).unwrap(), 17);
    }

    #[test]
    fn test_coord_scalar_choices() {
        assert_eq!(coord_scalar(&[10.0, -4.0]), 1);
        assert_eq!(coord_scalar(&[1.5]), -10);
        assert_eq!(coord_scalar(&[1.25, 3.0]), -100);
        assert_eq!(coord_scalar(&[0.12345678]), -10000);
    }

    #[test]
    fn test_create_open_round_trip() {
        let path = tmp_path("create_open");
        {
            let storage = FileStorage::create(&path).unwrap();
            SegyFile::create(
                storage,
                ChunkLimits::default(),
                8,
                4000,
                SampleFormat::IeeeFloat,
                6,
            )
            .unwrap();
        }
        let file = SegyFile::open(FileStorage::open(&path).unwrap(), ChunkLimits::default()).unwrap();
        assert_eq!(file.ns(), 8);
        assert_eq!(file.interval(), 4000);
        assert_eq!(file.format(), SampleFormat::IeeeFloat);
        assert_eq!(file.n_traces(), 6);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_metadata_write_read_round_trip() {
        let path = tmp_path("meta_rw");
        let rule = header_rule();
        let file = SegyFile::create(
            FileStorage::create(&path).unwrap(),
            ChunkLimits::default(),
            4,
            2000,
            SampleFormat::IbmFloat,
            5,
        )
        .unwrap();

        let mut prm = TraceMetadata::new(Arc::clone(&rule), 5);
        for i in 0..5 {
            prm.set_f64(i, Key::XSrc, 100.0 + i as f64).unwrap();
            prm.set_f64(i, Key::YSrc, 200.5 + i as f64).unwrap();
            prm.set_i64(i, Key::Il, 10 + i as i64).unwrap();
        }
        file.write_metadata(0, &prm).unwrap();

        let back = file.read_metadata(0, 5, &rule).unwrap();
        assert_eq!(back.size(), 5);
        for i in 0..5 {
            assert_relative_eq!(
                back.get_f64(i, Key::XSrc).unwrap(),
                100.0 + i as f64,
                epsilon = 1e-6
            );
            assert_relative_eq!(
                back.get_f64(i, Key::YSrc).unwrap(),
                200.5 + i as f64,
                epsilon = 1e-6
            );
            assert_eq!(back.get_i64(i, Key::Il).unwrap(), 10 + i as i64);
            assert_eq!(back.get_index(i, Key::Gtn).unwrap(), i as u64);
        }
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_scattered_round_trip_and_clamp() {
        let path = tmp_path("scatter");
        let rule = header_rule();
        let file = SegyFile::create(
            FileStorage::create(&path).unwrap(),
            ChunkLimits::default(),
            2,
            1000,
            SampleFormat::IeeeFloat,
            4,
        )
        .unwrap();

        let mut prm = TraceMetadata::new(Arc::clone(&rule), 4);
        for i in 0..4 {
            prm.set_f64(i, Key::XSrc, i as f64 * 10.0).unwrap();
        }
        file.write_metadata(0, &prm).unwrap();

        // Reversed scattered read comes back in list order.
        let gtns = [3u64, 0, 2];
        let back = file.read_metadata_scattered(&gtns, &rule).unwrap();
        assert_relative_eq!(back.get_f64(0, Key::XSrc).unwrap(), 30.0, epsilon = 1e-6);
        assert_relative_eq!(back.get_f64(1, Key::XSrc).unwrap(), 0.0, epsilon = 1e-6);
        assert_relative_eq!(back.get_f64(2, Key::XSrc).unwrap(), 20.0, epsilon = 1e-6);
        assert_eq!(back.get_index(0, Key::Gtn).unwrap(), 3);

        // Ranges past the extent truncate rather than fail.
        let clamped = file.read_metadata(2, 10, &rule).unwrap();
        assert_eq!(clamped.size(), 2);
        let empty = file.read_metadata(9, 3, &rule).unwrap();
        assert_eq!(empty.size(), 0);

        // Scattered access past the extent is a hard error.
        assert!(file.read_metadata_scattered(&[9], &rule).is_err());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_trace_data_round_trip() {
        let path = tmp_path("data_rw");
        let ns = 3;
        let file = SegyFile::create(
            FileStorage::create(&path).unwrap(),
            ChunkLimits::default(),
            ns,
            1000,
            SampleFormat::IeeeFloat,
            3,
        )
        .unwrap();

        let payload: Vec<u8> = (0..3 * ns * SAMPLE_LEN).map(|i| i as u8).collect();
        file.write_trace_data(0, 3, &payload).unwrap();

        let mut back = vec![0u8; ns * SAMPLE_LEN];
        file.read_trace_data_scattered(&[1], &mut back).unwrap();
        assert_eq!(back, payload[ns * SAMPLE_LEN..2 * ns * SAMPLE_LEN]);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_sort_then_materialize_in_file_order() {
        use crate::comm::single::SelfComm;
        use crate::sort::order::offset_order;

        let path = tmp_path("sort_materialize");
        let ns = 2;
        let trace_bytes = ns * SAMPLE_LEN;
        let rule = header_rule();
        let file = SegyFile::create(
            FileStorage::create(&path).unwrap(),
            ChunkLimits::default(),
            ns,
            1000,
            SampleFormat::IeeeFloat,
            6,
        )
        .unwrap();

        // Source x decreasing with the trace number; payload tagged per trace.
        let mut prm = TraceMetadata::new(Arc::clone(&rule), 6);
        let mut payload = vec![0u8; 6 * trace_bytes];
        for i in 0..6 {
            prm.set_f64(i, Key::XSrc, (60 - i * 10) as f64).unwrap();
            payload[i * trace_bytes..(i + 1) * trace_bytes].fill(i as u8);
        }
        file.write_metadata(0, &prm).unwrap();
        file.write_trace_data(0, 6, &payload).unwrap();

        let comm = SelfComm::new();
        let mut shard = file.read_metadata(0, 6, &rule).unwrap();
        let perm = crate::sort(&comm, &mut shard, crate::SortType::SrcRcv).unwrap();
        assert_eq!(perm, vec![5, 4, 3, 2, 1, 0]);

        // Fetch the payloads in ascending file order, then undo into sorted
        // order.
        let (ascending, undo) = offset_order(&perm);
        let mut buf = vec![0u8; 6 * trace_bytes];
        file.read_trace_data_scattered(&ascending, &mut buf).unwrap();
        for (j, &at) in undo.iter().enumerate() {
            let block = &buf[at * trace_bytes..(at + 1) * trace_bytes];
            assert!(block.iter().all(|&b| b == perm[j] as u8));
        }
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_ragged_tail_ignored() {
        let path = tmp_path("ragged");
        {
            let storage = FileStorage::create(&path).unwrap();
            SegyFile::create(
                storage,
                ChunkLimits::default(),
                2,
                1000,
                SampleFormat::IeeeFloat,
                2,
            )
            .unwrap();
        }
        // Append a fragment shorter than one trace.
        let storage = FileStorage::open(&path).unwrap();
        let size = crate::traits::storage::Storage::size(&storage).unwrap();
        crate::traits::storage::Storage::set_size(&storage, size + 10).unwrap();
        let file = SegyFile::open(storage, ChunkLimits::default()).unwrap();
        assert_eq!(file.n_traces(), 2);
        let _ = std::fs::remove_file(&path);
    }
}
