//! # Parallel I/O Library for seismic trace data (PIOL)
//!
//! A process-parallel library for reading, globally sorting, and rewriting
//! large SEG-Y trace datasets across many cooperating ranks, so that a
//! multi-terabyte file never has to fit on one node.
//!
//! Notable features of this library are:
//! * A rule-driven metadata store that packs only the trace attributes a
//!   file actually uses into compact typed arrays.
//! * A comparator-driven distributed sort built from local sorts and
//!   neighbor block exchanges, touching each trace only a few times.
//! * A chunked I/O adapter for contiguous and scattered trace ranges that
//!   respects the transport's 31-bit per-call count limit and keeps
//!   collective call counts aligned across ranks.
//! * Flexible trait seams for the communicator and storage transports; MPI
//!   support sits behind the `mpi` feature, and an in-process threaded
//!   group exercises every distributed path under plain `cargo test`.
#![cfg_attr(feature = "strict", deny(warnings))]
#![warn(missing_docs)]

pub mod comm;
pub mod file;
pub mod helpers;
pub mod io;
pub mod meta;
pub mod sort;
pub mod traits;

// Public API
#[doc(inline)]
pub use comm::single::SelfComm;
#[doc(inline)]
pub use comm::threaded::ThreadComm;
#[doc(inline)]
pub use file::segy::SegyFile;
#[doc(inline)]
pub use io::adapter::ChunkedIo;
#[doc(inline)]
pub use io::chunk::ChunkLimits;
#[doc(inline)]
pub use io::posix::FileStorage;
#[doc(inline)]
pub use meta::param::TraceMetadata;
#[doc(inline)]
pub use meta::rule::{Key, Rule};
#[doc(inline)]
pub use sort::global::{check_order, sort, sort_by};
#[doc(inline)]
pub use sort::order::SortType;
#[doc(inline)]
pub use traits::types::PiolError;
