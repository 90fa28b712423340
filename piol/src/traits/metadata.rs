//! Interface for contiguous trace-metadata readers.

use std::sync::Arc;

use crate::meta::param::TraceMetadata;
use crate::meta::rule::Rule;
use crate::traits::types::PiolError;

/// Capability to read a contiguous range of trace metadata, used by the sort
/// verification helper.
pub trait ReadMeta {
    /// Number of traces addressable through this reader.
    fn num_traces(&self) -> u64;

    /// Read `count` records starting at global trace `start` under `rule`.
    /// Ranges extending past the known extent are truncated.
    fn read_meta(
        &self,
        start: u64,
        count: usize,
        rule: &Arc<Rule>,
    ) -> Result<TraceMetadata, PiolError>;
}
