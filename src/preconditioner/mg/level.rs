//! One level of the multigrid hierarchy and the grid transfers.

use crate::context::ksp_context::{KspContext, SolverKind};
use crate::core::traits::{LinearOperator, OperatorRef, Scalar};
use crate::core::vector::DVector;
use crate::error::KError;
use crate::parallel::CommRef;
use crate::preconditioner::{PcType, SorConfig, SorSweep};
use crate::utils::convergence::SkipConvergence;

/// Right-hand side, iterate, residual and a transfer scratch vector.
pub(crate) struct LevelWork<T> {
    pub b: DVector<T>,
    pub x: DVector<T>,
    pub r: DVector<T>,
    pub t: DVector<T>,
}

impl<T: Scalar> LevelWork<T> {
    pub fn for_operator(a: &dyn LinearOperator<T>) -> Self {
        LevelWork {
            b: DVector::zeros(a.row_layout()),
            x: DVector::zeros(a.col_layout()),
            r: DVector::zeros(a.row_layout()),
            t: DVector::zeros(a.col_layout()),
        }
    }

    /// Seed from one user vector; the operators are square, so every work
    /// vector shares its layout.
    pub fn like(v: &DVector<T>) -> Self {
        LevelWork { b: v.duplicate(), x: v.duplicate(), r: v.duplicate(), t: v.duplicate() }
    }

    pub fn matches(&self, a: &dyn LinearOperator<T>) -> bool {
        self.b.layout().compatible(a.row_layout())
            && self.r.layout().compatible(a.row_layout())
            && self.x.layout().compatible(a.col_layout())
    }
}

pub struct MgLevel<T: Scalar> {
    pub(crate) smooth_down: KspContext<T>,
    /// `None`: the down smoother also post-smooths
    pub(crate) smooth_up: Option<KspContext<T>>,
    pub(crate) interpolate: Option<OperatorRef<T>>,
    pub(crate) restrict: Option<OperatorRef<T>>,
    pub(crate) residual: Option<OperatorRef<T>>,
    pub(crate) work: Option<LevelWork<T>>,
    pub(crate) cycles: usize,
}

impl<T: Scalar> MgLevel<T> {
    pub(crate) fn new(smooth_down: KspContext<T>) -> Self {
        MgLevel {
            smooth_down,
            smooth_up: None,
            interpolate: None,
            restrict: None,
            residual: None,
            work: None,
            cycles: 1,
        }
    }

    /// Operator of the residual computation: the one set explicitly, else
    /// the smoother's system operator.
    pub(crate) fn residual_operator(&self) -> Option<OperatorRef<T>> {
        self.residual
            .clone()
            .or_else(|| self.smooth_down.operators().map(|ops| ops.amat.clone()))
    }

    pub(crate) fn interpolation(&self) -> Option<OperatorRef<T>> {
        self.interpolate.clone()
    }

    /// Restriction, defaulting to the interpolation applied transposed.
    pub(crate) fn restriction(&self) -> Option<OperatorRef<T>> {
        self.restrict.clone().or_else(|| self.interpolate.clone())
    }

    pub(crate) fn cycles(&self) -> usize {
        self.cycles
    }
}

/// Richardson + SOR, one sweep, no convergence test, nonzero guess.
pub(crate) fn default_smoother<T: Scalar>(comm: &CommRef) -> Result<KspContext<T>, KError> {
    let mut ksp = KspContext::new(comm, SolverKind::Richardson { scale: 1.0 })?;
    let sweep = if comm.size() > 1 { SorSweep::LocalForward } else { SorSweep::Forward };
    ksp.set_pc_type(PcType::Sor(SorConfig { sweep, ..SorConfig::default() }))?;
    ksp.set_tolerances(None, None, None, Some(1))?;
    ksp.set_convergence_test(SkipConvergence);
    ksp.set_initial_guess_nonzero(true);
    Ok(ksp)
}

/// One application of LU, replicated when the level spans several ranks.
pub(crate) fn default_coarse_solver<T: Scalar>(comm: &CommRef) -> Result<KspContext<T>, KError> {
    let mut ksp = KspContext::new(comm, SolverKind::PreOnly)?;
    let pc = if comm.size() > 1 { PcType::Redundant(Box::new(PcType::Lu)) } else { PcType::Lu };
    ksp.set_pc_type(pc)?;
    ksp.set_tolerances(None, None, None, Some(1))?;
    Ok(ksp)
}

/// `coarse = R fine`. A short-and-wide operator is the restriction itself,
/// a tall one is an interpolation and is applied transposed.
pub(crate) fn restrict<T: Scalar>(
    op: &dyn LinearOperator<T>,
    fine: &DVector<T>,
    coarse: &mut DVector<T>,
) -> Result<(), KError> {
    let (m, n) = op.global_shape();
    if n > m { op.apply(fine, coarse) } else { op.apply_transpose(fine, coarse) }
}

/// `fine = P coarse`, with the same orientation rule as [`restrict`].
pub(crate) fn interpolate<T: Scalar>(
    op: &dyn LinearOperator<T>,
    coarse: &DVector<T>,
    fine: &mut DVector<T>,
) -> Result<(), KError> {
    let (m, n) = op.global_shape();
    if n > m { op.apply_transpose(coarse, fine) } else { op.apply(coarse, fine) }
}
