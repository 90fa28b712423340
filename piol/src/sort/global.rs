//! The distributed sort engine.
//!
//! Each rank locally sorts its shard of trace metadata, then repeatedly
//! trades boundary blocks with its neighbors until every rank holds exactly
//! the records that belong on it under the global order. No rank ever
//! materializes more than its own shard plus one boundary region.

use std::cmp::Ordering;
use std::sync::Arc;

use rayon::slice::ParallelSliceMut;

use crate::meta::param::TraceMetadata;
use crate::meta::rule::{Key, Rule};
use crate::sort::order::SortType;
use crate::traits::communicator::Communicator;
use crate::traits::metadata::ReadMeta;
use crate::traits::types::PiolError;

/// Globally sort `prm` across all ranks under a built-in ordering.
///
/// On return the store holds this rank's shard of the global order and the
/// result is the permutation: entry `i` is the global trace number that
/// belongs in local output slot `i`.
///
/// # Errors
/// `EntryNotFound` if the rule lacks a key the comparator reads, or the
/// global trace number.
pub fn sort<C: Communicator>(
    comm: &C,
    prm: &mut TraceMetadata,
    kind: SortType,
) -> Result<Vec<u64>, PiolError> {
    for &key in kind.required_keys() {
        if prm.rule().entry(key).is_none() {
            return Err(PiolError::EntryNotFound(key));
        }
    }
    sort_by(comm, prm, kind.comparator())
}

/// Globally sort `prm` under a caller-supplied comparator.
///
/// The comparator must be a strict weak ordering and must resolve every
/// tie (the built-ins fall through to the file trace number), otherwise
/// the permutation is transport-dependent. Ranks holding zero records
/// still participate in every exchange and reduction.
///
/// # Errors
/// `EntryNotFound` if the rule lacks the global trace number.
pub fn sort_by<C, F>(comm: &C, prm: &mut TraceMetadata, comp: F) -> Result<Vec<u64>, PiolError>
where
    C: Communicator,
    F: Fn(&TraceMetadata, usize, &TraceMetadata, usize) -> Ordering + Sync,
{
    if prm.rule().entry(Key::Gtn).is_none() {
        return Err(PiolError::EntryNotFound(Key::Gtn));
    }
    local_order(prm, &comp);
    if comm.num_ranks() > 1 && !boundaries_ordered(comm, prm, &comp)? {
        loop {
            let before = held_gtns(prm)?;
            exchange_low(comm, prm, &comp)?;
            exchange_high(comm, prm, &comp)?;
            let unchanged = held_gtns(prm)? == before;
            // Termination is collective: one rank's unchanged view does not
            // imply global stability.
            if comm.all(unchanged) {
                break;
            }
        }
    }
    (0..prm.size())
        .map(|i| prm.get_index(i, Key::Gtn))
        .collect()
}

/// Read a contiguous metadata range end to end and verify the comparator
/// holds between every adjacent pair, chunk boundaries included.
///
/// # Errors
/// Reader failures.
pub fn check_order<R, F>(reader: &R, rule: &Arc<Rule>, comp: F) -> Result<bool, PiolError>
where
    R: ReadMeta,
    F: Fn(&TraceMetadata, usize, &TraceMetadata, usize) -> Ordering,
{
    const STEP: usize = 4096;
    let total = reader.num_traces();
    let mut prev: Option<TraceMetadata> = None;
    let mut at = 0u64;
    while at < total {
        let count = STEP.min((total - at) as usize);
        let cur = reader.read_meta(at, count, rule)?;
        if cur.size() == 0 {
            break;
        }
        if let Some(p) = &prev {
            if comp(p, p.size() - 1, &cur, 0) == Ordering::Greater {
                return Ok(false);
            }
        }
        for i in 0..cur.size() - 1 {
            if comp(&cur, i, &cur, i + 1) == Ordering::Greater {
                return Ok(false);
            }
        }
        at += cur.size() as u64;
        prev = Some(cur);
    }
    Ok(true)
}

/// Sort the local shard in place, reordering records through
/// `copy_entries` so every key travels with its record.
fn local_order<F>(prm: &mut TraceMetadata, comp: &F)
where
    F: Fn(&TraceMetadata, usize, &TraceMetadata, usize) -> Ordering + Sync,
{
    let n = prm.size();
    let mut idx: Vec<usize> = (0..n).collect();
    {
        let view = &*prm;
        idx.par_sort_by(|&a, &b| comp(view, a, view, b));
    }
    let mut scratch = TraceMetadata::new(Arc::clone(prm.rule()), n);
    for (to, &from) in idx.iter().enumerate() {
        scratch.copy_entries(to, prm, from);
    }
    *prm = scratch;
}

/// One record per rank travels down the chain to test whether the global
/// boundary order already holds; empty ranks forward their upper
/// neighbor's record.
fn boundaries_ordered<C, F>(comm: &C, prm: &TraceMetadata, comp: &F) -> Result<bool, PiolError>
where
    C: Communicator,
    F: Fn(&TraceMetadata, usize, &TraceMetadata, usize) -> Ordering,
{
    let rank = comm.rank();
    let num_ranks = comm.num_ranks();
    let n = prm.size();

    let mut above: Option<TraceMetadata> = None;
    if rank < num_ranks - 1 {
        let bytes = comm.recv(rank + 1);
        if !bytes.is_empty() {
            above = Some(TraceMetadata::unpack(Arc::clone(prm.rule()), &bytes)?);
        }
    }
    if rank > 0 {
        let payload = if n > 0 {
            prm.pack(0, 1)
        } else {
            above.as_ref().map(|a| a.pack(0, 1)).unwrap_or_default()
        };
        comm.send(rank - 1, &payload);
    }
    let ordered = match &above {
        Some(a) if n > 0 => comp(prm, n - 1, a, 0) != Ordering::Greater,
        _ => true,
    };
    Ok(comm.all(ordered))
}

/// Boundary block size for one correction round.
fn region(n: usize) -> usize {
    if n == 0 {
        0
    } else {
        (n / 4).max(1)
    }
}

/// Move low-valued records toward lower ranks: each rank offers its lowest
/// block to the rank below, which merges it against its own shard, keeps
/// the records that belong on it by boundary ownership, and returns the
/// overflow onward.
///
/// An empty interior rank owns no positions and acts as a transparent
/// relay, so blocks still flow between its non-empty neighbors.
fn exchange_low<C, F>(comm: &C, prm: &mut TraceMetadata, comp: &F) -> Result<(), PiolError>
where
    C: Communicator,
    F: Fn(&TraceMetadata, usize, &TraceMetadata, usize) -> Ordering,
{
    let rank = comm.rank();
    let num_ranks = comm.num_ranks();
    let rule = Arc::clone(prm.rule());

    if prm.size() == 0 && rank > 0 && rank < num_ranks - 1 {
        let inc = comm.recv(rank + 1);
        comm.send(rank - 1, &inc);
        let ret = comm.recv(rank - 1);
        comm.send(rank + 1, &ret);
        return Ok(());
    }
    if rank < num_ranks - 1 {
        let inc = TraceMetadata::unpack(Arc::clone(&rule), &comm.recv(rank + 1))?;
        let overflow = merge_keep_low(prm, &inc, comp);
        comm.send(rank + 1, &overflow.pack_all());
    }
    if rank > 0 {
        let b = region(prm.size());
        comm.send(rank - 1, &prm.pack(0, b));
        let ret = TraceMetadata::unpack(Arc::clone(&rule), &comm.recv(rank - 1))?;
        merge_back_low(prm, b, &ret, comp);
    }
    Ok(())
}

/// Symmetric step moving high-valued records toward higher ranks.
fn exchange_high<C, F>(comm: &C, prm: &mut TraceMetadata, comp: &F) -> Result<(), PiolError>
where
    C: Communicator,
    F: Fn(&TraceMetadata, usize, &TraceMetadata, usize) -> Ordering,
{
    let rank = comm.rank();
    let num_ranks = comm.num_ranks();
    let rule = Arc::clone(prm.rule());

    if prm.size() == 0 && rank > 0 && rank < num_ranks - 1 {
        let inc = comm.recv(rank - 1);
        comm.send(rank + 1, &inc);
        let ret = comm.recv(rank + 1);
        comm.send(rank - 1, &ret);
        return Ok(());
    }
    if rank > 0 {
        let inc = TraceMetadata::unpack(Arc::clone(&rule), &comm.recv(rank - 1))?;
        let overflow = merge_keep_high(prm, &inc, comp);
        comm.send(rank - 1, &overflow.pack_all());
    }
    if rank < num_ranks - 1 {
        let n = prm.size();
        let b = region(n);
        comm.send(rank + 1, &prm.pack(n - b, b));
        let ret = TraceMetadata::unpack(Arc::clone(&rule), &comm.recv(rank + 1))?;
        merge_back_high(prm, b, &ret, comp);
    }
    Ok(())
}

/// Merge two locally ordered stores into one, taking from `a` on ties.
fn merge_all<F>(a: &TraceMetadata, b: &TraceMetadata, comp: &F) -> TraceMetadata
where
    F: Fn(&TraceMetadata, usize, &TraceMetadata, usize) -> Ordering,
{
    let (na, nb) = (a.size(), b.size());
    let mut out = TraceMetadata::new(Arc::clone(a.rule()), na + nb);
    let (mut i, mut j) = (0, 0);
    for k in 0..na + nb {
        let take_a = i < na && (j >= nb || comp(a, i, b, j) != Ordering::Greater);
        if take_a {
            out.copy_entries(k, a, i);
            i += 1;
        } else {
            out.copy_entries(k, b, j);
            j += 1;
        }
    }
    out
}

/// Merge `inc` into `local`, keep the lowest `local.size()` records, and
/// return the overflow.
fn merge_keep_low<F>(local: &mut TraceMetadata, inc: &TraceMetadata, comp: &F) -> TraceMetadata
where
    F: Fn(&TraceMetadata, usize, &TraceMetadata, usize) -> Ordering,
{
    let (n, b) = (local.size(), inc.size());
    if b == 0 {
        return TraceMetadata::new(Arc::clone(local.rule()), 0);
    }
    let merged = merge_all(local, inc, comp);
    let overflow = merged.slice(n, b);
    *local = merged.slice(0, n);
    overflow
}

/// Merge `inc` into `local`, keep the highest `local.size()` records, and
/// return the overflow.
fn merge_keep_high<F>(local: &mut TraceMetadata, inc: &TraceMetadata, comp: &F) -> TraceMetadata
where
    F: Fn(&TraceMetadata, usize, &TraceMetadata, usize) -> Ordering,
{
    let (n, b) = (local.size(), inc.size());
    if b == 0 {
        return TraceMetadata::new(Arc::clone(local.rule()), 0);
    }
    let merged = merge_all(local, inc, comp);
    let overflow = merged.slice(0, b);
    *local = merged.slice(b, n);
    overflow
}

/// Fold the block returned for our lowest `b` records back into the shard.
fn merge_back_low<F>(prm: &mut TraceMetadata, b: usize, ret: &TraceMetadata, comp: &F)
where
    F: Fn(&TraceMetadata, usize, &TraceMetadata, usize) -> Ordering,
{
    debug_assert_eq!(ret.size(), b);
    if b == 0 {
        return;
    }
    let tail = prm.slice(b, prm.size() - b);
    *prm = merge_all(ret, &tail, comp);
}

/// Fold the block returned for our highest `b` records back into the shard.
fn merge_back_high<F>(prm: &mut TraceMetadata, b: usize, ret: &TraceMetadata, comp: &F)
where
    F: Fn(&TraceMetadata, usize, &TraceMetadata, usize) -> Ordering,
{
    debug_assert_eq!(ret.size(), b);
    if b == 0 {
        return;
    }
    let head = prm.slice(0, prm.size() - b);
    *prm = merge_all(&head, ret, comp);
}

/// The sorted list of global trace numbers this rank currently holds, used
/// as the convergence snapshot.
fn held_gtns(prm: &TraceMetadata) -> Result<Vec<u64>, PiolError> {
    let mut gtns = (0..prm.size())
        .map(|i| prm.get_index(i, Key::Gtn))
        .collect::<Result<Vec<_>, _>>()?;
    gtns.sort_unstable();
    Ok(gtns)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::comm::single::SelfComm;
    use crate::comm::threaded::ThreadComm;
    use crate::comm::decompose;
    use crate::helpers::random_metadata;
    use itertools::Itertools;

    fn sort_rule() -> Arc<Rule> {
        Arc::new(Rule::default_rule())
    }

    /// The order the whole dataset should end up in, by naive argsort.
    fn naive_order(prm: &TraceMetadata, kind: SortType) -> Vec<u64> {
        let comp = kind.comparator();
        let mut idx = (0..prm.size()).collect_vec();
        idx.sort_by(|&a, &b| comp(prm, a, prm, b));
        idx.into_iter()
            .map(|i| prm.get_index(i, Key::Gtn).unwrap())
            .collect()
    }

    #[test]
    fn test_single_rank_matches_naive_sort() {
        let rule = sort_rule();
        let mut prm = random_metadata(&rule, 50, 0, 7);
        let expect = naive_order(&prm, SortType::SrcRcv);
        let comm = SelfComm::new();
        let perm = sort(&comm, &mut prm, SortType::SrcRcv).unwrap();
        assert_eq!(perm, expect);
        // The store itself was reordered to match.
        let held: Vec<u64> = (0..prm.size())
            .map(|i| prm.get_index(i, Key::Gtn).unwrap())
            .collect();
        assert_eq!(held, expect);
    }

    #[test]
    fn test_missing_sort_key_is_rejected() {
        let rule = Arc::new(Rule::new(&[Key::XSrc, Key::Gtn]).unwrap());
        let mut prm = TraceMetadata::new(rule, 4);
        let comm = SelfComm::new();
        assert!(matches!(
            sort(&comm, &mut prm, SortType::Line),
            Err(PiolError::EntryNotFound(Key::Il))
        ));
    }

    #[test]
    fn test_four_ranks_end_to_end() {
        let rule = sort_rule();
        let global = random_metadata(&rule, 40, 0, 99);
        let expect = naive_order(&global, SortType::SrcRcv);

        let results = ThreadComm::run(4, |comm| {
            let (offset, count) = decompose(40, comm.num_ranks(), comm.rank());
            let mut shard = global.slice(offset as usize, count as usize);
            let perm = sort(&comm, &mut shard, SortType::SrcRcv).unwrap();
            assert_eq!(perm.len(), count as usize);
            perm
        });

        let concatenated: Vec<u64> = results.into_iter().flatten().collect();
        assert_eq!(concatenated, expect);
        // Every original trace appears exactly once.
        let multiset = concatenated.iter().copied().sorted().collect_vec();
        assert_eq!(multiset, (0..40).collect_vec());
    }

    #[test]
    fn test_sorted_input_is_identity() {
        let rule = sort_rule();
        let global = random_metadata(&rule, 32, 0, 3);
        let expect = naive_order(&global, SortType::SrcRcv);

        let results = ThreadComm::run(4, |comm| {
            let (offset, count) = decompose(32, comm.num_ranks(), comm.rank());
            let mut shard = global.slice(offset as usize, count as usize);
            let first = sort(&comm, &mut shard, SortType::SrcRcv).unwrap();
            // A second run over the now-sorted distribution must return the
            // same permutation without moving any record between ranks.
            let again = sort(&comm, &mut shard, SortType::SrcRcv).unwrap();
            assert_eq!(first, again);
            again
        });
        let concatenated: Vec<u64> = results.into_iter().flatten().collect();
        assert_eq!(concatenated, expect);
    }

    #[test]
    fn test_empty_rank_still_participates() {
        let rule = sort_rule();
        let global = random_metadata(&rule, 12, 0, 21);
        let expect = naive_order(&global, SortType::SrcRcv);
        let counts = [5usize, 0, 7];
        let offsets = [0usize, 5, 5];

        let results = ThreadComm::run(3, |comm| {
            let rank = comm.rank();
            let mut shard = global.slice(offsets[rank], counts[rank]);
            let perm = sort(&comm, &mut shard, SortType::SrcRcv).unwrap();
            assert_eq!(perm.len(), counts[rank]);
            perm
        });
        let concatenated: Vec<u64> = results.into_iter().flatten().collect();
        assert_eq!(concatenated, expect);
    }

    #[test]
    fn test_ties_resolve_by_trace_number() {
        let rule = sort_rule();
        // Identical coordinates on every record: order must fall back to
        // the global trace number.
        let results = ThreadComm::run(2, |comm| {
            let rank = comm.rank();
            let mut shard = TraceMetadata::new(Arc::clone(&rule), 4);
            for i in 0..4 {
                shard.set_f64(i, Key::XSrc, 5.0).unwrap();
                // Interleave trace numbers across ranks.
                let gtn = (i * 2 + rank) as u64;
                shard.set_index(i, Key::Gtn, gtn).unwrap();
            }
            sort(&comm, &mut shard, SortType::SrcRcv).unwrap()
        });
        let concatenated: Vec<u64> = results.into_iter().flatten().collect();
        assert_eq!(concatenated, (0..8).collect_vec());
    }

    struct MemReader {
        prm: TraceMetadata,
    }

    impl ReadMeta for MemReader {
        fn num_traces(&self) -> u64 {
            self.prm.size() as u64
        }

        fn read_meta(
            &self,
            start: u64,
            count: usize,
            _rule: &Arc<Rule>,
        ) -> Result<TraceMetadata, PiolError> {
            let count = count.min(self.prm.size() - start as usize);
            Ok(self.prm.slice(start as usize, count))
        }
    }

    #[test]
    fn test_check_order_accepts_sorted_rejects_shuffled() {
        let rule = sort_rule();
        // Strictly descending source x: unordered by construction.
        let mut prm = TraceMetadata::new(Arc::clone(&rule), 30);
        for i in 0..30 {
            prm.set_f64(i, Key::XSrc, (30 - i) as f64).unwrap();
            prm.set_index(i, Key::Gtn, i as u64).unwrap();
        }
        let comm = SelfComm::new();
        let comp = SortType::SrcRcv.comparator();

        let shuffled = MemReader { prm: prm.clone() };
        sort(&comm, &mut prm, SortType::SrcRcv).unwrap();
        let sorted = MemReader { prm };

        assert!(check_order(&sorted, &rule, comp).unwrap());
        assert!(!check_order(&shuffled, &rule, comp).unwrap());
    }
}
