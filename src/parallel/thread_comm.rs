//! In-process communicator: each rank runs on its own scoped thread and the
//! collectives meet at a shared barrier.
//!
//! Reductions are evaluated in rank order on every rank, so all ranks see
//! bit-identical results, matching what an MPI reduction guarantees.
//!
//! # Example
//! ```
//! use kspmg::parallel::{Comm, ThreadComm};
//! let sums = ThreadComm::run(3, |comm| comm.all_reduce(comm.rank() as f64).unwrap());
//! assert_eq!(sums, vec![3.0, 3.0, 3.0]);
//! ```

use std::sync::{Arc, Barrier, Mutex};

use super::{check_counts, Comm, CommRef};
use crate::error::KError;

struct Shared {
    size: usize,
    barrier: Barrier,
    slots: Mutex<Vec<Vec<f64>>>,
}

pub struct ThreadComm {
    rank: usize,
    shared: Arc<Shared>,
}

impl ThreadComm {
    /// Run `f` on `size` ranks and collect the per-rank results in rank order.
    ///
    /// A panic on any rank is re-raised on the caller once all ranks finished
    /// or got stuck; a stuck collective blocks the whole communicator.
    pub fn run<F, R>(size: usize, f: F) -> Vec<R>
    where
        F: Fn(CommRef) -> R + Sync,
        R: Send,
    {
        assert!(size > 0, "a communicator needs at least one rank");
        let shared = Arc::new(Shared {
            size,
            barrier: Barrier::new(size),
            slots: Mutex::new(vec![Vec::new(); size]),
        });
        std::thread::scope(|s| {
            let handles: Vec<_> = (0..size)
                .map(|rank| {
                    let shared = Arc::clone(&shared);
                    let f = &f;
                    s.spawn(move || {
                        let comm: CommRef = Arc::new(ThreadComm { rank, shared });
                        f(comm)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(r) => r,
                    Err(payload) => std::panic::resume_unwind(payload),
                })
                .collect()
        })
    }

    /// Deposit `local`, wait for every rank, read all deposits.
    fn exchange(&self, local: &[f64]) -> Result<Vec<Vec<f64>>, KError> {
        {
            let mut slots = self
                .shared
                .slots
                .lock()
                .map_err(|_| KError::Communication("rank panicked during a collective".into()))?;
            slots[self.rank] = local.to_vec();
        }
        self.shared.barrier.wait();
        let all = self
            .shared
            .slots
            .lock()
            .map_err(|_| KError::Communication("rank panicked during a collective".into()))?
            .clone();
        // slots are reused by the next collective
        self.shared.barrier.wait();
        Ok(all)
    }
}

impl Comm for ThreadComm {
    fn rank(&self) -> usize { self.rank }
    fn size(&self) -> usize { self.shared.size }

    fn barrier(&self) -> Result<(), KError> {
        self.shared.barrier.wait();
        Ok(())
    }

    fn all_reduce(&self, x: f64) -> Result<f64, KError> {
        let all = self.exchange(&[x])?;
        Ok(all.iter().map(|v| v[0]).sum())
    }

    fn all_reduce_max(&self, x: f64) -> Result<f64, KError> {
        let all = self.exchange(&[x])?;
        Ok(all.iter().map(|v| v[0]).fold(f64::NEG_INFINITY, f64::max))
    }

    fn all_reduce_slice(&self, local: &[f64], out: &mut [f64]) -> Result<(), KError> {
        if local.len() != out.len() {
            return Err(KError::InvalidArgument("reduction buffers differ in length".into()));
        }
        let all = self.exchange(local)?;
        out.iter_mut().for_each(|o| *o = 0.0);
        for contrib in &all {
            if contrib.len() != out.len() {
                return Err(KError::Communication("ranks reduced buffers of different length".into()));
            }
            for (o, &c) in out.iter_mut().zip(contrib) {
                *o += c;
            }
        }
        Ok(())
    }

    fn all_gather_varcount(&self, local: &[f64], counts: &[usize]) -> Result<Vec<f64>, KError> {
        check_counts(counts, self.size())?;
        if local.len() != counts[self.rank] {
            return Err(KError::InvalidArgument(format!(
                "rank {} contributes {} values, counts say {}",
                self.rank,
                local.len(),
                counts[self.rank]
            )));
        }
        let all = self.exchange(local)?;
        let mut out = Vec::with_capacity(counts.iter().sum());
        for (contrib, &c) in all.iter().zip(counts) {
            if contrib.len() != c {
                return Err(KError::Communication("gathered block has unexpected length".into()));
            }
            out.extend_from_slice(contrib);
        }
        Ok(out)
    }
}
