//! Comparators and permutation plumbing for the distributed sort.

use std::cmp::Ordering;

use itertools::Itertools;

use crate::meta::param::TraceMetadata;
use crate::meta::rule::Key;

/// A strict ordering between two metadata records, possibly held in
/// different stores.
///
/// Built-in comparators assume their keys are present; [`crate::sort::global::sort`]
/// validates the rule before any comparison runs.
pub type Compare = fn(&TraceMetadata, usize, &TraceMetadata, usize) -> Ordering;

/// Built-in orderings over trace metadata.
///
/// Every variant breaks remaining ties on the file trace number, giving a
/// total order and a deterministic permutation. Coordinate levels compare
/// exactly (`total_cmp`), preserving the legacy sort output bit for bit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortType {
    /// Order by source x/y, then receiver x/y.
    SrcRcv,
    /// Order by inline then crossline number.
    Line,
    /// Order by source-to-receiver offset.
    OffsetLine,
}

impl SortType {
    /// Keys the comparator reads; the sort validates these against the
    /// store's rule before running.
    pub fn required_keys(&self) -> &'static [Key] {
        match self {
            SortType::SrcRcv => &[Key::XSrc, Key::YSrc, Key::XRcv, Key::YRcv, Key::Gtn],
            SortType::Line => &[Key::Il, Key::Xl, Key::Gtn],
            SortType::OffsetLine => &[Key::Offset, Key::Gtn],
        }
    }

    /// The comparator for this ordering.
    pub fn comparator(&self) -> Compare {
        match self {
            SortType::SrcRcv => cmp_src_rcv,
            SortType::Line => cmp_line,
            SortType::OffsetLine => cmp_offset,
        }
    }
}

fn float_level(a: &TraceMetadata, ai: usize, b: &TraceMetadata, bi: usize, key: Key) -> Ordering {
    let lhs = a.get_f64(ai, key).unwrap_or_default();
    let rhs = b.get_f64(bi, key).unwrap_or_default();
    lhs.total_cmp(&rhs)
}

fn long_level(a: &TraceMetadata, ai: usize, b: &TraceMetadata, bi: usize, key: Key) -> Ordering {
    let lhs = a.get_i64(ai, key).unwrap_or_default();
    let rhs = b.get_i64(bi, key).unwrap_or_default();
    lhs.cmp(&rhs)
}

fn gtn_level(a: &TraceMetadata, ai: usize, b: &TraceMetadata, bi: usize) -> Ordering {
    let lhs = a.get_index(ai, Key::Gtn).unwrap_or_default();
    let rhs = b.get_index(bi, Key::Gtn).unwrap_or_default();
    lhs.cmp(&rhs)
}

fn cmp_src_rcv(a: &TraceMetadata, ai: usize, b: &TraceMetadata, bi: usize) -> Ordering {
    float_level(a, ai, b, bi, Key::XSrc)
        .then_with(|| float_level(a, ai, b, bi, Key::YSrc))
        .then_with(|| float_level(a, ai, b, bi, Key::XRcv))
        .then_with(|| float_level(a, ai, b, bi, Key::YRcv))
        .then_with(|| gtn_level(a, ai, b, bi))
}

fn cmp_line(a: &TraceMetadata, ai: usize, b: &TraceMetadata, bi: usize) -> Ordering {
    long_level(a, ai, b, bi, Key::Il)
        .then_with(|| long_level(a, ai, b, bi, Key::Xl))
        .then_with(|| gtn_level(a, ai, b, bi))
}

fn cmp_offset(a: &TraceMetadata, ai: usize, b: &TraceMetadata, bi: usize) -> Ordering {
    long_level(a, ai, b, bi, Key::Offset).then_with(|| gtn_level(a, ai, b, bi))
}

/// Re-sort a permutation of global trace numbers into ascending file order
/// for sequential reading, with the undo mapping that restores output
/// order.
///
/// Reading blocks at the ascending offsets fills a buffer `b`; the record
/// for output slot `j` then sits at `b[undo[j]]`.
pub fn offset_order(perm: &[u64]) -> (Vec<u64>, Vec<usize>) {
    let mut idx = (0..perm.len()).collect_vec();
    idx.sort_by_key(|&i| perm[i]);
    let ascending = idx.iter().map(|&i| perm[i]).collect_vec();
    let mut undo = vec![0usize; perm.len()];
    for (pos, &i) in idx.iter().enumerate() {
        undo[i] = pos;
    }
    (ascending, undo)
}

/// Invert a local permutation: `invert(p)[p[i]] == i`.
pub fn invert(perm: &[usize]) -> Vec<usize> {
    let mut out = vec![0usize; perm.len()];
    for (i, &p) in perm.iter().enumerate() {
        out[p] = i;
    }
    out
}
