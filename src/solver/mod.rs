//! Krylov solver interfaces.
//!
//! Every method implements [`KrylovMethod`]. The driver
//! ([`KspContext`](crate::context::KspContext)) owns the operator handles,
//! the preconditioner and the convergence policy and lends them to the
//! method for the duration of one solve.

use std::sync::Arc;

use crate::core::traits::{LinearOperator, Scalar};
use crate::core::vector::{DVector, Layout};
use crate::error::KError;
use crate::preconditioner::{PcOperators, Preconditioner};
use crate::utils::convergence::{Convergence, SolveStats};

pub mod orthog;
pub use orthog::{CgsRefinement, Orthogonalization, OrthogOutcome, CGS_REFINE_THRESHOLD};

pub mod cg;
pub use cg::CgSolver;

pub mod gmres;
pub use gmres::{GmresConfig, GmresSolver, KrylovState, Preconditioning};

pub mod fgmres;
pub use fgmres::FgmresSolver;

pub mod richardson;
pub use richardson::RichardsonSolver;

pub mod preonly;
pub use preonly::PreOnly;

/// Common interface of the Krylov methods.
pub trait KrylovMethod<T: Scalar> {
    fn name(&self) -> &'static str;

    /// Solve `A x = b`; `x` holds the initial guess on entry.
    fn solve(
        &mut self,
        a: &dyn LinearOperator<T>,
        pc: &mut dyn Preconditioner<T>,
        b: &DVector<T>,
        x: &mut DVector<T>,
        conv: &mut Convergence<T>,
    ) -> Result<SolveStats<T>, KError>;

    /// Solve `Aᵀ x = b` by running the method on the transposed operator
    /// and preconditioner.
    fn solve_transpose(
        &mut self,
        a: &dyn LinearOperator<T>,
        pc: &mut dyn Preconditioner<T>,
        b: &DVector<T>,
        x: &mut DVector<T>,
        conv: &mut Convergence<T>,
    ) -> Result<SolveStats<T>, KError> {
        let at = Transposed { inner: a };
        let mut pct = TransposedPc { inner: pc };
        self.solve(&at, &mut pct, b, x, conv)
    }

    fn view(&self) -> String {
        format!("KSP type: {}", self.name())
    }
}

/// Aᵀ as an operator.
struct Transposed<'a, T: Scalar> {
    inner: &'a dyn LinearOperator<T>,
}

impl<T: Scalar> LinearOperator<T> for Transposed<'_, T> {
    fn row_layout(&self) -> &Arc<Layout> { self.inner.col_layout() }
    fn col_layout(&self) -> &Arc<Layout> { self.inner.row_layout() }
    fn apply(&self, x: &DVector<T>, y: &mut DVector<T>) -> Result<(), KError> {
        self.inner.apply_transpose(x, y)
    }
    fn apply_transpose(&self, x: &DVector<T>, y: &mut DVector<T>) -> Result<(), KError> {
        self.inner.apply(x, y)
    }
}

/// Bᵀ as a preconditioner; already set up through the wrapped one.
struct TransposedPc<'a, T: Scalar> {
    inner: &'a mut dyn Preconditioner<T>,
}

impl<T: Scalar> Preconditioner<T> for TransposedPc<'_, T> {
    fn name(&self) -> &'static str { self.inner.name() }
    fn setup(&mut self, _ops: &PcOperators<T>) -> Result<(), KError> { Ok(()) }
    fn apply(&mut self, x: &DVector<T>, y: &mut DVector<T>) -> Result<(), KError> {
        self.inner.apply_transpose(x, y)
    }
    fn apply_transpose(&mut self, x: &DVector<T>, y: &mut DVector<T>) -> Result<(), KError> {
        self.inner.apply(x, y)
    }
}
