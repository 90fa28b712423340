//? mpirun -n {{NPROCESSES}} --features "mpi"
#[cfg(feature = "mpi")]
use std::sync::Arc;

#[cfg(feature = "mpi")]
use piol::comm::decompose;
#[cfg(feature = "mpi")]
use piol::comm::mpi::MpiContext;
#[cfg(feature = "mpi")]
use piol::sort::order::offset_order;
#[cfg(feature = "mpi")]
use piol::traits::communicator::Communicator;
#[cfg(feature = "mpi")]
use piol::{ChunkLimits, FileStorage, Rule, SegyFile, SortType};

#[cfg(feature = "mpi")]
fn main() {
    // Setup MPI
    let context = MpiContext::new().expect("MPI runtime already initialized");
    let comm = context.world();
    let rank = comm.rank();

    let path = std::env::args()
        .nth(1)
        .expect("usage: mpi_sort_segy <file.segy>");

    let file = SegyFile::open(FileStorage::open(&path).unwrap(), ChunkLimits::default()).unwrap();
    let rule = Arc::new(Rule::default_rule());

    // Each rank reads its contiguous shard of trace metadata.
    let (offset, count) = decompose(file.n_traces(), comm.num_ranks(), rank);
    let mut shard = file
        .read_metadata(offset, count as usize, &rule)
        .unwrap();

    let perm = piol::sort(&comm, &mut shard, SortType::SrcRcv).unwrap();

    // Materialize this rank's slice of the sorted data: fetch traces in
    // ascending file order, then undo back into sorted order.
    let (ascending, undo) = offset_order(&perm);
    let trace_bytes = file.ns() * 4;
    let mut buf = vec![0u8; ascending.len() * trace_bytes];
    file.read_trace_data_scattered_collective(&comm, &ascending, &mut buf)
        .unwrap();
    let mut sorted = vec![0u8; buf.len()];
    for (j, &at) in undo.iter().enumerate() {
        sorted[j * trace_bytes..(j + 1) * trace_bytes]
            .copy_from_slice(&buf[at * trace_bytes..(at + 1) * trace_bytes]);
    }

    let moved = comm.sum_u64(sorted.len() as u64);
    if rank == 0 {
        println!(
            "...sorted {} traces over {} ranks, {} payload bytes materialized",
            file.n_traces(),
            comm.num_ranks(),
            moved
        );
    }
}

#[cfg(not(feature = "mpi"))]
fn main() {}
