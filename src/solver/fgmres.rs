//! Flexible GMRES (FGMRES) solver (Saad §9.4)
//!
//! Right-preconditioned GMRES that stores every preconditioned direction
//! `zⱼ = Bⱼ vⱼ`, so the preconditioner may change from one application to
//! the next. This is the outer method to pair with preconditioners that
//! are themselves iterative, such as a nested Krylov solve.
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems, 2nd Edition. SIAM. §9.4

use crate::core::traits::{LinearOperator, Scalar};
use crate::core::vector::{DVector, NormType};
use crate::error::KError;
use crate::preconditioner::Preconditioner;
use crate::solver::gmres::{GmresConfig, KrylovState};
use crate::solver::KrylovMethod;
use crate::utils::convergence::{ConvergedReason, Convergence, SolveStats};

pub struct FgmresSolver<T> {
    pub config: GmresConfig,
    state: KrylovState<T>,
    /// Preconditioned directions of the current cycle
    zvecs: Vec<DVector<T>>,
}

impl<T: Scalar> FgmresSolver<T> {
    pub fn new(config: GmresConfig) -> Result<Self, KError> {
        config.validate()?;
        Ok(FgmresSolver { state: KrylovState::new(config.restart), config, zvecs: Vec::new() })
    }

    pub fn state(&self) -> &KrylovState<T> {
        &self.state
    }
}

impl<T: Scalar> KrylovMethod<T> for FgmresSolver<T> {
    fn name(&self) -> &'static str {
        "fgmres"
    }

    fn solve(
        &mut self,
        a: &dyn LinearOperator<T>,
        pc: &mut dyn Preconditioner<T>,
        b: &DVector<T>,
        x: &mut DVector<T>,
        conv: &mut Convergence<T>,
    ) -> Result<SolveStats<T>, KError> {
        let restart = self.config.restart;
        self.state = KrylovState::new(restart);
        self.zvecs.clear();
        let mut r = b.duplicate();
        let mut w = b.duplicate();
        let max_its = conv.tol.max_its;
        let haptol = T::from_f64_lossy(self.config.haptol);

        conv.reset();
        let mut its = 0usize;
        a.residual(b, x, &mut r)?;
        let mut res_norm = r.norm(NormType::L2)?;
        let mut reason = conv.check(0, res_norm);

        while reason.is_iterating() {
            let beta = res_norm;
            if beta == T::zero() {
                reason = ConvergedReason::ConvergedAtol;
                break;
            }
            r.scale(T::one() / beta);
            self.state.start(&r, beta);

            let mut happy = false;
            while self.state.dim() < restart && its < max_its {
                let j = self.state.dim();
                if self.zvecs.len() <= j {
                    self.zvecs.push(b.duplicate());
                }
                pc.apply(&self.state.basis()[j], &mut self.zvecs[j])?;
                a.apply(&self.zvecs[j], &mut w)?;
                let (hnext, _) = self.state.extend(&mut w, &self.config.orthog)?;
                res_norm = self.state.rotate();
                its += 1;
                happy = hnext <= haptol * beta;
                reason = conv.check(its, res_norm);
                if !reason.is_iterating() || happy {
                    break;
                }
            }

            let y = self.state.least_squares();
            x.maxpy(&y, &self.zvecs[..y.len()]);

            if reason.is_iterating() {
                a.residual(b, x, &mut r)?;
                res_norm = r.norm(NormType::L2)?;
                if happy {
                    reason = conv.verdict(its, res_norm);
                    if reason.is_iterating() {
                        log::warn!("FGMRES breakdown at iteration {its} with residual {res_norm:e}");
                        reason = ConvergedReason::DivergedBreakdown;
                    }
                } else if its >= max_its {
                    reason = ConvergedReason::ConvergedIts;
                }
            }
        }

        log::debug!("FGMRES finished after {its} iterations: {reason}");
        Ok(SolveStats::new(its, res_norm, reason))
    }

    /// Flexible directions depend on the forward preconditioner.
    fn solve_transpose(
        &mut self,
        _a: &dyn LinearOperator<T>,
        _pc: &mut dyn Preconditioner<T>,
        _b: &DVector<T>,
        _x: &mut DVector<T>,
        _conv: &mut Convergence<T>,
    ) -> Result<SolveStats<T>, KError> {
        Err(KError::Unsupported("transpose solve with FGMRES".into()))
    }

    fn view(&self) -> String {
        format!("KSP type: fgmres\n  restart={}, orthogonalization={:?}", self.config.restart, self.config.orthog)
    }
}
