//! MPI-backed communicator (feature `mpi`).
//!
//! `MpiComm` keeps the `Universe` alive for as long as the communicator
//! exists; dropping the last handle finalizes MPI.
//!
//! # Example
//! ```no_run
//! # #[cfg(feature = "mpi")] {
//! use kspmg::parallel::{Comm, MpiComm};
//! let comm = MpiComm::init().unwrap();
//! println!("rank {} of {}", comm.rank(), comm.size());
//! # }
//! ```

use mpi::collective::SystemOperation;
use mpi::datatype::PartitionMut;
use mpi::environment::Universe;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;
use mpi::Count;

use super::{check_counts, Comm};
use crate::error::KError;

pub struct MpiComm {
    _universe: Option<Universe>,
    world: SimpleCommunicator,
    rank: usize,
    size: usize,
}

impl MpiComm {
    /// Initialize MPI and wrap the world communicator.
    pub fn init() -> Result<Self, KError> {
        let universe = mpi::initialize()
            .ok_or_else(|| KError::Communication("MPI already initialized or unavailable".into()))?;
        let world = universe.world();
        Ok(Self::build(Some(universe), world))
    }

    /// Wrap an existing communicator; MPI lifetime stays with the caller.
    pub fn from_communicator(world: SimpleCommunicator) -> Self {
        Self::build(None, world)
    }

    fn build(universe: Option<Universe>, world: SimpleCommunicator) -> Self {
        let rank = world.rank() as usize;
        let size = world.size() as usize;
        MpiComm { _universe: universe, world, rank, size }
    }
}

impl Comm for MpiComm {
    fn rank(&self) -> usize { self.rank }
    fn size(&self) -> usize { self.size }

    fn barrier(&self) -> Result<(), KError> {
        self.world.barrier();
        Ok(())
    }

    fn all_reduce(&self, x: f64) -> Result<f64, KError> {
        let mut y = 0.0f64;
        self.world.all_reduce_into(&x, &mut y, SystemOperation::sum());
        Ok(y)
    }

    fn all_reduce_max(&self, x: f64) -> Result<f64, KError> {
        let mut y = 0.0f64;
        self.world.all_reduce_into(&x, &mut y, SystemOperation::max());
        Ok(y)
    }

    fn all_reduce_slice(&self, local: &[f64], out: &mut [f64]) -> Result<(), KError> {
        if local.len() != out.len() {
            return Err(KError::InvalidArgument("reduction buffers differ in length".into()));
        }
        self.world.all_reduce_into(local, out, SystemOperation::sum());
        Ok(())
    }

    fn all_gather_varcount(&self, local: &[f64], counts: &[usize]) -> Result<Vec<f64>, KError> {
        check_counts(counts, self.size)?;
        let total: usize = counts.iter().sum();
        let counts_mpi: Vec<Count> = counts.iter().map(|&c| c as Count).collect();
        let displs: Vec<Count> = counts_mpi
            .iter()
            .scan(0, |acc, &c| {
                let d = *acc;
                *acc += c;
                Some(d)
            })
            .collect();
        let mut buf = vec![0.0f64; total];
        {
            let mut partition = PartitionMut::new(&mut buf[..], counts_mpi, &displs[..]);
            self.world.all_gather_varcount_into(local, &mut partition);
        }
        Ok(buf)
    }
}
