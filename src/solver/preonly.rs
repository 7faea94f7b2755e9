//! Apply the preconditioner once: `x = B b`.
//!
//! Used with direct preconditioners (LU, redundant LU) where the
//! preconditioner application is the solve.

use crate::core::traits::{LinearOperator, Scalar};
use crate::core::vector::DVector;
use crate::error::KError;
use crate::preconditioner::Preconditioner;
use crate::solver::KrylovMethod;
use crate::utils::convergence::{ConvergedReason, Convergence, SolveStats};

#[derive(Debug, Default, Clone, Copy)]
pub struct PreOnly;

impl<T: Scalar> KrylovMethod<T> for PreOnly {
    fn name(&self) -> &'static str {
        "preonly"
    }

    fn solve(
        &mut self,
        _a: &dyn LinearOperator<T>,
        pc: &mut dyn Preconditioner<T>,
        b: &DVector<T>,
        x: &mut DVector<T>,
        conv: &mut Convergence<T>,
    ) -> Result<SolveStats<T>, KError> {
        conv.reset();
        pc.apply(b, x)?;
        Ok(SolveStats::new(1, T::nan(), ConvergedReason::ConvergedIts))
    }
}
