//! Single-process demonstration of the distributed sort over the threaded
//! communicator.
use std::sync::Arc;

use piol::comm::decompose;
use piol::helpers::random_metadata;
use piol::traits::communicator::Communicator;
use piol::{Rule, SortType, ThreadComm};

fn main() {
    let n_traces = 40;
    let rule = Arc::new(Rule::default_rule());
    let global = random_metadata(&rule, n_traces, 0, 12345);

    let results = ThreadComm::run(4, |comm| {
        let (offset, count) = decompose(n_traces as u64, comm.num_ranks(), comm.rank());
        let mut shard = global.slice(offset as usize, count as usize);
        piol::sort(&comm, &mut shard, SortType::SrcRcv).unwrap()
    });

    for (rank, perm) in results.iter().enumerate() {
        println!("rank {}: {:?}", rank, perm);
    }
}
