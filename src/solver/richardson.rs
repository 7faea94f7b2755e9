//! Preconditioned Richardson iteration `x ← x + s·B(b − A x)`.
//!
//! With unit damping and a preconditioner that provides its own fused
//! Richardson kernel (SOR, multigrid), the whole iteration is delegated to
//! the preconditioner. This is how multigrid smoothers normally run.

use crate::core::traits::{LinearOperator, Scalar};
use crate::core::vector::{DVector, NormType};
use crate::error::KError;
use crate::preconditioner::Preconditioner;
use crate::solver::KrylovMethod;
use crate::utils::convergence::{ConvergedReason, Convergence, SolveStats};

#[derive(Debug, Clone, Copy)]
pub struct RichardsonSolver<T> {
    /// Damping factor `s`
    pub scale: T,
}

impl<T: Scalar> Default for RichardsonSolver<T> {
    fn default() -> Self {
        RichardsonSolver { scale: T::one() }
    }
}

impl<T: Scalar> RichardsonSolver<T> {
    pub fn new(scale: T) -> Self {
        RichardsonSolver { scale }
    }
}

impl<T: Scalar> KrylovMethod<T> for RichardsonSolver<T> {
    fn name(&self) -> &'static str {
        "richardson"
    }

    fn solve(
        &mut self,
        a: &dyn LinearOperator<T>,
        pc: &mut dyn Preconditioner<T>,
        b: &DVector<T>,
        x: &mut DVector<T>,
        conv: &mut Convergence<T>,
    ) -> Result<SolveStats<T>, KError> {
        conv.reset();
        if self.scale == T::one() && pc.has_richardson() {
            let outcome = pc.apply_richardson(b, x, &conv.tol)?;
            return Ok(SolveStats::new(outcome.its, T::nan(), outcome.reason));
        }

        let needs_norm = conv.needs_residual_norm();
        let mut r = b.duplicate();
        let mut z = b.duplicate();
        a.residual(b, x, &mut r)?;
        let mut res_norm = T::nan();
        let mut reason = ConvergedReason::Iterating;
        let mut its = 0usize;
        while its < conv.tol.max_its {
            if needs_norm {
                res_norm = r.norm(NormType::L2)?;
            }
            reason = conv.check(its, res_norm);
            if !reason.is_iterating() {
                break;
            }
            pc.apply(&r, &mut z)?;
            x.axpy(self.scale, &z);
            its += 1;
            if its < conv.tol.max_its || needs_norm {
                a.residual(b, x, &mut r)?;
            }
        }
        if reason.is_iterating() {
            if needs_norm {
                res_norm = r.norm(NormType::L2)?;
            }
            reason = conv.check(its, res_norm);
            if reason.is_iterating() {
                reason = ConvergedReason::ConvergedIts;
            }
        }
        Ok(SolveStats::new(its, res_norm, reason))
    }

    fn view(&self) -> String {
        format!("KSP type: richardson\n  damping factor={}", self.scale)
    }
}
