//! # SEG-Y file access
//!
//! Geometry, header codecs, and the [`segy::SegyFile`] handle that connects
//! the metadata store and the chunked I/O adapter to the on-disk trace
//! format.
pub mod segy;
