//! In-process multi-rank communicator backed by threads.
//!
//! Reproduces the blocking collective semantics of the MPI transport inside
//! one process, so the distributed sort and collective I/O paths run under
//! plain `cargo test` and on workstations without an MPI launcher.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Barrier, Condvar, Mutex};

use crate::traits::communicator::Communicator;

struct Shared {
    num_ranks: usize,
    barrier: Barrier,
    board: Mutex<Vec<Vec<u64>>>,
    mail: Mutex<HashMap<(usize, usize), VecDeque<Vec<u8>>>>,
    mail_ready: Condvar,
}

/// One rank's handle onto an in-process group.
///
/// Collectives rendezvous on a shared barrier with a per-rank contribution
/// board; point-to-point messages travel through per-pair FIFO mailboxes.
pub struct ThreadComm {
    rank: usize,
    shared: Arc<Shared>,
}

impl ThreadComm {
    /// Create handles for every rank of an `num_ranks`-wide group.
    pub fn split(num_ranks: usize) -> Vec<ThreadComm> {
        let shared = Arc::new(Shared {
            num_ranks,
            barrier: Barrier::new(num_ranks),
            board: Mutex::new(vec![Vec::new(); num_ranks]),
            mail: Mutex::new(HashMap::new()),
            mail_ready: Condvar::new(),
        });
        (0..num_ranks)
            .map(|rank| ThreadComm {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    /// Run `f` once per rank on `num_ranks` threads and collect the results
    /// in rank order. Panics in any rank propagate to the caller.
    pub fn run<R, F>(num_ranks: usize, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(ThreadComm) -> R + Send + Sync,
    {
        let comms = ThreadComm::split(num_ranks);
        let f = &f;
        std::thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| scope.spawn(move || f(comm)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("rank thread panicked"))
                .collect()
        })
    }

    /// Post `vals` on the board, rendezvous, and read every rank's posting.
    fn exchange_board(&self, vals: &[u64]) -> Vec<Vec<u64>> {
        if let Ok(mut board) = self.shared.board.lock() {
            board[self.rank] = vals.to_vec();
        }
        self.shared.barrier.wait();
        let all = self
            .shared
            .board
            .lock()
            .map(|board| board.clone())
            .unwrap_or_default();
        // Hold everyone until all postings are read, so the next collective
        // cannot overwrite them.
        self.shared.barrier.wait();
        all
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn num_ranks(&self) -> usize {
        self.shared.num_ranks
    }

    fn barrier(&self) {
        self.shared.barrier.wait();
    }

    fn gather_u64(&self, vals: &[u64]) -> Vec<u64> {
        self.exchange_board(vals).into_iter().flatten().collect()
    }

    fn sum_u64(&self, val: u64) -> u64 {
        self.gather_u64(&[val]).into_iter().sum()
    }

    fn max_u64(&self, val: u64) -> u64 {
        self.gather_u64(&[val]).into_iter().max().unwrap_or(0)
    }

    fn all(&self, flag: bool) -> bool {
        self.gather_u64(&[u64::from(flag)]).into_iter().all(|v| v != 0)
    }

    fn offset(&self, val: u64) -> u64 {
        self.gather_u64(&[val]).iter().take(self.rank).sum()
    }

    fn send(&self, to: usize, buf: &[u8]) {
        if let Ok(mut mail) = self.shared.mail.lock() {
            mail.entry((self.rank, to)).or_default().push_back(buf.to_vec());
            self.shared.mail_ready.notify_all();
        }
    }

    fn recv(&self, from: usize) -> Vec<u8> {
        let Ok(mut mail) = self.shared.mail.lock() else {
            return Vec::new();
        };
        loop {
            if let Some(payload) = mail
                .get_mut(&(from, self.rank))
                .and_then(|queue| queue.pop_front())
            {
                return payload;
            }
            mail = match self.shared.mail_ready.wait(mail) {
                Ok(guard) => guard,
                Err(_) => return Vec::new(),
            };
        }
    }

    fn abort(&self, code: i32) -> ! {
        // In-process job: a panic takes the whole test harness down with a
        // diagnostic rather than killing the process.
        panic!("rank {} aborting with code {}", self.rank, code)
    }
}
