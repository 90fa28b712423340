//! MPI communicator backend.
//!
//! Requires the `mpi` feature and an MPI installation; launched under
//! `mpirun` like the binaries in `examples/`.

use mpi::datatype::PartitionMut;
use mpi::collective::SystemOperation;
use mpi::environment::Universe;
use mpi::topology::SimpleCommunicator;
use mpi::traits::{Communicator as MpiCommunicator, CommunicatorCollectives, Destination, Source};
use mpi::Count;

use crate::traits::communicator::Communicator;

/// Owner of the MPI runtime for the lifetime of the job.
///
/// Created exactly once at program start; finalization is tied to this
/// value's scope rather than hidden static state. Returns `None` when the
/// runtime was already initialized elsewhere.
pub struct MpiContext {
    universe: Universe,
}

impl MpiContext {
    /// Initialize the MPI runtime.
    pub fn new() -> Option<MpiContext> {
        mpi::initialize().map(|universe| MpiContext { universe })
    }

    /// A communicator over all ranks of the job.
    pub fn world(&self) -> MpiComm {
        MpiComm {
            comm: self.universe.world(),
        }
    }
}

/// [`Communicator`] over an MPI communicator.
///
/// Transport failures follow the MPI default error handler and terminate
/// the job; none of these operations report recoverable errors.
pub struct MpiComm {
    comm: SimpleCommunicator,
}

impl Communicator for MpiComm {
    fn rank(&self) -> usize {
        self.comm.rank() as usize
    }

    fn num_ranks(&self) -> usize {
        self.comm.size() as usize
    }

    fn barrier(&self) {
        self.comm.barrier();
    }

    fn gather_u64(&self, vals: &[u64]) -> Vec<u64> {
        let size = self.comm.size() as usize;
        let mut counts = vec![0 as Count; size];
        self.comm
            .all_gather_into(&(vals.len() as Count), &mut counts[..]);

        let displs: Vec<Count> = counts
            .iter()
            .scan(0, |acc, &x| {
                let tmp = *acc;
                *acc += x;
                Some(tmp)
            })
            .collect();
        let total = counts.iter().sum::<Count>();

        let mut out = vec![0u64; total as usize];
        {
            let mut partition = PartitionMut::new(&mut out[..], counts, &displs[..]);
            self.comm.all_gather_varcount_into(vals, &mut partition);
        }
        out
    }

    fn sum_u64(&self, val: u64) -> u64 {
        let mut out = 0u64;
        self.comm
            .all_reduce_into(&val, &mut out, SystemOperation::sum());
        out
    }

    fn max_u64(&self, val: u64) -> u64 {
        let mut out = 0u64;
        self.comm
            .all_reduce_into(&val, &mut out, SystemOperation::max());
        out
    }

    fn all(&self, flag: bool) -> bool {
        let mut out = false;
        self.comm
            .all_reduce_into(&flag, &mut out, SystemOperation::logical_and());
        out
    }

    fn offset(&self, val: u64) -> u64 {
        let mut out = 0u64;
        self.comm
            .exclusive_scan_into(&val, &mut out, SystemOperation::sum());
        // The exclusive scan leaves rank 0's output undefined.
        if self.comm.rank() == 0 {
            out = 0;
        }
        out
    }

    fn send(&self, to: usize, buf: &[u8]) {
        self.comm.process_at_rank(to as i32).send(buf);
    }

    fn recv(&self, from: usize) -> Vec<u8> {
        let (data, _status) = self.comm.process_at_rank(from as i32).receive_vec::<u8>();
        data
    }

    fn abort(&self, code: i32) -> ! {
        self.comm.abort(code)
    }
}
