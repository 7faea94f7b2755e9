//! Process-level communication for distributed vectors and operators.
//!
//! Every collective in this module is blocking: all ranks of a communicator
//! must issue the same sequence of calls. Reductions travel as `f64`, the
//! same way `DVector` converts its scalar type at reduction points.
//!
//! Three backends are provided:
//! - [`SerialComm`], a single rank with no communication at all,
//! - [`ThreadComm`], in-process ranks on scoped threads, used to exercise
//!   the collective code paths without a launcher,
//! - `MpiComm` (feature `mpi`), an MPI communicator.

use std::sync::Arc;

use crate::error::KError;

pub mod thread_comm;
pub use thread_comm::ThreadComm;

#[cfg(feature = "mpi")]
pub mod mpi_comm;
#[cfg(feature = "mpi")]
pub use mpi_comm::MpiComm;

/// Shared communicator handle.
pub type CommRef = Arc<dyn Comm>;

pub trait Comm {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn barrier(&self) -> Result<(), KError>;

    /// Sum of `x` over all ranks.
    fn all_reduce(&self, x: f64) -> Result<f64, KError>;
    /// Maximum of `x` over all ranks.
    fn all_reduce_max(&self, x: f64) -> Result<f64, KError>;
    /// Element-wise sum of `local` over all ranks, in a single reduction.
    fn all_reduce_slice(&self, local: &[f64], out: &mut [f64]) -> Result<(), KError>;
    /// Concatenation of every rank's `local` in rank order. `counts[r]` is
    /// the length contributed by rank `r`.
    fn all_gather_varcount(&self, local: &[f64], counts: &[usize]) -> Result<Vec<f64>, KError>;

    /// One count per rank, in rank order.
    fn all_gather_count(&self, n: usize) -> Result<Vec<usize>, KError> {
        let counts = vec![1; self.size()];
        let all = self.all_gather_varcount(&[n as f64], &counts)?;
        Ok(all.into_iter().map(|c| c as usize).collect())
    }

    /// Index gather, carried through the floating point path.
    fn all_gather_indices(&self, local: &[usize], counts: &[usize]) -> Result<Vec<usize>, KError> {
        let send: Vec<f64> = local.iter().map(|&i| i as f64).collect();
        let all = self.all_gather_varcount(&send, counts)?;
        Ok(all.into_iter().map(|i| i as usize).collect())
    }
}

fn check_counts(counts: &[usize], size: usize) -> Result<(), KError> {
    if counts.len() != size {
        return Err(KError::InvalidArgument(format!(
            "expected {size} per-rank counts, got {}",
            counts.len()
        )));
    }
    Ok(())
}

/// The one-rank communicator.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialComm;

impl SerialComm {
    pub fn shared() -> CommRef {
        Arc::new(SerialComm)
    }
}

impl Comm for SerialComm {
    fn rank(&self) -> usize { 0 }
    fn size(&self) -> usize { 1 }
    fn barrier(&self) -> Result<(), KError> { Ok(()) }
    fn all_reduce(&self, x: f64) -> Result<f64, KError> { Ok(x) }
    fn all_reduce_max(&self, x: f64) -> Result<f64, KError> { Ok(x) }
    fn all_reduce_slice(&self, local: &[f64], out: &mut [f64]) -> Result<(), KError> {
        if local.len() != out.len() {
            return Err(KError::InvalidArgument("reduction buffers differ in length".into()));
        }
        out.copy_from_slice(local);
        Ok(())
    }
    fn all_gather_varcount(&self, local: &[f64], counts: &[usize]) -> Result<Vec<f64>, KError> {
        check_counts(counts, 1)?;
        Ok(local.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_collectives_are_identity() {
        let comm = SerialComm::shared();
        assert_eq!(comm.all_reduce(3.5).unwrap(), 3.5);
        assert_eq!(comm.all_gather_count(7).unwrap(), vec![7]);
        let mut out = [0.0; 2];
        comm.all_reduce_slice(&[1.0, 2.0], &mut out).unwrap();
        assert_eq!(out, [1.0, 2.0]);
        assert!(comm.all_gather_varcount(&[1.0], &[1, 1]).is_err());
    }
}
