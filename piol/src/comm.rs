//! # Process-group communication backends
//!
//! Implementations of [`crate::traits::communicator::Communicator`]: a
//! single-rank loopback, an in-process threaded group used to exercise
//! distributed paths under plain `cargo test`, and the MPI transport behind
//! the `mpi` feature.
pub mod single;
pub mod threaded;

#[cfg(feature = "mpi")]
pub mod mpi;

/// Contiguous block decomposition of `total` items over `num_ranks` ranks:
/// the `(offset, count)` owned by `rank`, with remainders spread over the
/// low ranks.
pub fn decompose(total: u64, num_ranks: usize, rank: usize) -> (u64, u64) {
    let num_ranks = num_ranks as u64;
    let rank = rank as u64;
    let base = total / num_ranks;
    let rem = total % num_ranks;
    let count = base + u64::from(rank < rem);
    let offset = rank * base + rank.min(rem);
    (offset, count)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_decompose_covers_range() {
        for total in [0u64, 1, 7, 40, 41, 43] {
            let mut expect = 0;
            for rank in 0..4 {
                let (offset, count) = decompose(total, 4, rank);
                assert_eq!(offset, expect);
                expect += count;
            }
            assert_eq!(expect, total);
        }
    }

    #[test]
    fn test_decompose_balances() {
        let counts: Vec<u64> = (0..4).map(|r| decompose(10, 4, r).1).collect();
        assert_eq!(counts, vec![3, 3, 2, 2]);
    }
}
