//! Convergence tracking & tolerance checks for iterative solvers.
//!
//! A [`ConvergenceTest`] maps `(iteration, residual norm)` to a
//! [`ConvergedReason`]. Its only memory is the per-solve
//! [`ConvergenceContext`] (initial norm, target, optional history), so the
//! same test object can serve any number of solves.

use std::fmt;

use crate::core::traits::Scalar;
use crate::error::KError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergedReason {
    Iterating,
    ConvergedRtol,
    ConvergedAtol,
    ConvergedIts,
    DivergedDtol,
    DivergedNan,
    DivergedBreakdown,
    DivergedOther,
}

impl ConvergedReason {
    pub fn is_iterating(self) -> bool {
        self == ConvergedReason::Iterating
    }
    pub fn is_converged(self) -> bool {
        matches!(
            self,
            ConvergedReason::ConvergedRtol | ConvergedReason::ConvergedAtol | ConvergedReason::ConvergedIts
        )
    }
    pub fn is_diverged(self) -> bool {
        !self.is_iterating() && !self.is_converged()
    }
}

impl fmt::Display for ConvergedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConvergedReason::Iterating => "ITERATING",
            ConvergedReason::ConvergedRtol => "CONVERGED_RTOL",
            ConvergedReason::ConvergedAtol => "CONVERGED_ATOL",
            ConvergedReason::ConvergedIts => "CONVERGED_ITS",
            ConvergedReason::DivergedDtol => "DIVERGED_DTOL",
            ConvergedReason::DivergedNan => "DIVERGED_NAN",
            ConvergedReason::DivergedBreakdown => "DIVERGED_BREAKDOWN",
            ConvergedReason::DivergedOther => "DIVERGED_OTHER",
        };
        f.write_str(s)
    }
}

/// Stopping tolerances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerances<T> {
    /// relative decrease of the residual norm
    pub rtol: T,
    /// absolute residual norm
    pub atol: T,
    /// divergence factor over the initial norm
    pub dtol: T,
    pub max_its: usize,
}

impl<T: Scalar> Default for Tolerances<T> {
    fn default() -> Self {
        Tolerances {
            rtol: T::from_f64_lossy(1e-5),
            atol: T::from_f64_lossy(1e-50),
            dtol: T::from_f64_lossy(1e5),
            max_its: 10_000,
        }
    }
}

impl<T: Scalar> Tolerances<T> {
    pub fn new(rtol: T, atol: T, dtol: T, max_its: usize) -> Result<Self, KError> {
        let tol = Tolerances { rtol, atol, dtol, max_its };
        tol.validate()?;
        Ok(tol)
    }

    pub fn validate(&self) -> Result<(), KError> {
        if !(self.rtol >= T::zero() && self.rtol < T::one()) {
            return Err(KError::InvalidArgument(format!("relative tolerance {} must be in [0,1)", self.rtol)));
        }
        if !(self.atol >= T::zero()) {
            return Err(KError::InvalidArgument(format!("absolute tolerance {} must be non-negative", self.atol)));
        }
        if !(self.dtol > T::zero()) {
            return Err(KError::InvalidArgument(format!("divergence tolerance {} must be positive", self.dtol)));
        }
        Ok(())
    }
}

/// Per-solve state of a convergence test.
#[derive(Debug, Clone)]
pub struct ConvergenceContext<T> {
    /// Residual norm seen at iteration 0.
    pub rnorm0: T,
    /// Target norm fixed at iteration 0.
    pub ttol: T,
    history: Option<Vec<T>>,
}

impl<T: Scalar> ConvergenceContext<T> {
    pub fn new() -> Self {
        ConvergenceContext { rnorm0: T::zero(), ttol: T::zero(), history: None }
    }

    pub fn with_history(mut self) -> Self {
        self.history = Some(Vec::new());
        self
    }

    pub fn set_history(&mut self, on: bool) {
        self.history = if on { Some(Vec::new()) } else { None };
    }

    pub fn history(&self) -> Option<&[T]> {
        self.history.as_deref()
    }

    pub fn reset(&mut self) {
        self.rnorm0 = T::zero();
        self.ttol = T::zero();
        if let Some(h) = self.history.as_mut() {
            h.clear();
        }
    }

    fn record(&mut self, rnorm: T) {
        if let Some(h) = self.history.as_mut() {
            h.push(rnorm);
        }
    }
}

impl<T: Scalar> Default for ConvergenceContext<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Decides, after each iteration, whether the solve is done.
pub trait ConvergenceTest<T: Scalar> {
    fn test(&self, its: usize, rnorm: T, tol: &Tolerances<T>, ctx: &mut ConvergenceContext<T>) -> ConvergedReason;

    /// Whether callers must compute residual norms for this test.
    fn needs_residual_norm(&self) -> bool {
        true
    }
}

impl<T, F> ConvergenceTest<T> for F
where
    T: Scalar,
    F: Fn(usize, T, &Tolerances<T>, &mut ConvergenceContext<T>) -> ConvergedReason,
{
    fn test(&self, its: usize, rnorm: T, tol: &Tolerances<T>, ctx: &mut ConvergenceContext<T>) -> ConvergedReason {
        self(its, rnorm, tol, ctx)
    }
}

/// Relative / absolute / divergence / iteration-count test.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConvergence;

impl<T: Scalar> ConvergenceTest<T> for DefaultConvergence {
    fn test(&self, its: usize, rnorm: T, tol: &Tolerances<T>, ctx: &mut ConvergenceContext<T>) -> ConvergedReason {
        if !rnorm.is_finite() {
            return ConvergedReason::DivergedNan;
        }
        if its == 0 {
            ctx.rnorm0 = rnorm;
            ctx.ttol = (tol.rtol * rnorm).max(tol.atol);
        }
        if rnorm <= ctx.ttol {
            if rnorm < tol.atol {
                ConvergedReason::ConvergedAtol
            } else {
                ConvergedReason::ConvergedRtol
            }
        } else if its > 0 && rnorm >= tol.dtol * ctx.rnorm0 {
            ConvergedReason::DivergedDtol
        } else if its >= tol.max_its {
            ConvergedReason::ConvergedIts
        } else {
            ConvergedReason::Iterating
        }
    }
}

/// Runs exactly `max_its` iterations; residual norms are never needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipConvergence;

impl<T: Scalar> ConvergenceTest<T> for SkipConvergence {
    fn test(&self, its: usize, _rnorm: T, tol: &Tolerances<T>, _ctx: &mut ConvergenceContext<T>) -> ConvergedReason {
        if its >= tol.max_its {
            ConvergedReason::ConvergedIts
        } else {
            ConvergedReason::Iterating
        }
    }

    fn needs_residual_norm(&self) -> bool {
        false
    }
}

/// Stopping criteria, the test deciding on them and its per-solve state.
pub struct Convergence<T: Scalar> {
    pub tol: Tolerances<T>,
    test: Box<dyn ConvergenceTest<T>>,
    pub ctx: ConvergenceContext<T>,
    monitor: Option<Box<dyn FnMut(usize, T)>>,
}

impl<T: Scalar> Convergence<T> {
    pub fn new(tol: Tolerances<T>) -> Self {
        Convergence { tol, test: Box::new(DefaultConvergence), ctx: ConvergenceContext::new(), monitor: None }
    }

    pub fn set_test(&mut self, test: Box<dyn ConvergenceTest<T>>) {
        self.test = test;
    }

    pub fn set_monitor(&mut self, monitor: Box<dyn FnMut(usize, T)>) {
        self.monitor = Some(monitor);
    }

    pub fn needs_residual_norm(&self) -> bool {
        self.test.needs_residual_norm()
    }

    /// Start of a solve: forget the previous one.
    pub fn reset(&mut self) {
        self.ctx.reset();
    }

    /// Record `rnorm` at iteration `its` and ask the test for a verdict.
    pub fn check(&mut self, its: usize, rnorm: T) -> ConvergedReason {
        log::debug!("iteration {its}: residual norm {rnorm:e}");
        self.ctx.record(rnorm);
        if let Some(m) = self.monitor.as_mut() {
            m(its, rnorm);
        }
        self.test.test(its, rnorm, &self.tol, &mut self.ctx)
    }

    /// Ask the test about `rnorm` without recording it or calling the monitor.
    pub fn verdict(&mut self, its: usize, rnorm: T) -> ConvergedReason {
        self.test.test(its, rnorm, &self.tol, &mut self.ctx)
    }
}

#[derive(Clone, Debug)]
pub struct SolveStats<T> {
    pub iterations: usize,
    pub final_residual: T,
    pub converged: bool,
    pub reason: ConvergedReason,
}

impl<T> SolveStats<T> {
    pub fn new(iterations: usize, final_residual: T, reason: ConvergedReason) -> Self {
        SolveStats { iterations, final_residual, converged: reason.is_converged(), reason }
    }
}
