//! Preconditioned Conjugate Gradient per Saad §9.2.
//!
//! For symmetric positive definite operators with a symmetric positive
//! definite preconditioner. A non-positive curvature `pᵀAp` or `rᵀz`
//! ends the solve with `DivergedBreakdown`.

use crate::core::traits::{LinearOperator, Scalar};
use crate::core::vector::{DVector, NormType};
use crate::error::KError;
use crate::preconditioner::Preconditioner;
use crate::solver::KrylovMethod;
use crate::utils::convergence::{ConvergedReason, Convergence, SolveStats};

#[derive(Debug, Default, Clone, Copy)]
pub struct CgSolver;

impl CgSolver {
    pub fn new() -> Self {
        CgSolver
    }
}

impl<T: Scalar> KrylovMethod<T> for CgSolver {
    fn name(&self) -> &'static str {
        "cg"
    }

    fn solve(
        &mut self,
        a: &dyn LinearOperator<T>,
        pc: &mut dyn Preconditioner<T>,
        b: &DVector<T>,
        x: &mut DVector<T>,
        conv: &mut Convergence<T>,
    ) -> Result<SolveStats<T>, KError> {
        let mut r = b.duplicate();
        let mut z = b.duplicate();
        let mut ap = b.duplicate();
        a.residual(b, x, &mut r)?;
        pc.apply(&r, &mut z)?;
        let mut p = z.clone();
        let mut rz = r.dot(&z)?;

        conv.reset();
        let mut res_norm = r.norm(NormType::L2)?;
        let mut reason = conv.check(0, res_norm);
        let mut its = 0usize;

        while reason.is_iterating() {
            if rz <= T::zero() {
                if rz < T::zero() {
                    log::warn!("CG: indefinite preconditioner at iteration {its}");
                }
                reason = ConvergedReason::DivergedBreakdown;
                break;
            }
            a.apply(&p, &mut ap)?;
            let pap = p.dot(&ap)?;
            if pap <= T::zero() {
                log::warn!("CG: non-positive curvature at iteration {its}");
                reason = ConvergedReason::DivergedBreakdown;
                break;
            }
            let alpha = rz / pap;
            x.axpy(alpha, &p);
            r.axpy(-alpha, &ap);
            its += 1;
            res_norm = r.norm(NormType::L2)?;
            reason = conv.check(its, res_norm);
            if !reason.is_iterating() {
                break;
            }
            pc.apply(&r, &mut z)?;
            let rz_new = r.dot(&z)?;
            let beta = rz_new / rz;
            p.aypx(beta, &z);
            rz = rz_new;
        }

        Ok(SolveStats::new(its, res_norm, reason))
    }
}
