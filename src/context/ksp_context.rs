//! Driver for Krylov subspace solves.
//!
//! `KspContext` ties together a Krylov method, a preconditioner, the
//! operator pair and the convergence policy. It is the object users (and
//! the composite preconditioners: nested Krylov, multigrid smoothers)
//! configure and call `solve` on.
//!
//! # Usage
//!
//! 1. Create a context on the operators' communicator with a [`SolverKind`].
//! 2. Pick a preconditioner with `set_pc_type` or install one with `set_pc`.
//! 3. `set_operators`, optionally `set_tolerances` / `set_from_options`.
//! 4. `solve(b, x)`; the returned [`SolveStats`] carries the converged reason.
//!
//! # Supported Solvers
//! - Richardson, CG, GMRES (left/right), FGMRES, PreOnly
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems. SIAM.
//! - PETSc documentation: https://petsc.org/release/docs/manualpages/KSP/

use crate::config::OptionsDb;
use crate::context::pc_context::PcType;
use crate::core::traits::{MatStructure, OperatorRef, Scalar};
use crate::core::vector::DVector;
use crate::error::KError;
use crate::parallel::CommRef;
use crate::preconditioner::{indent, PcOperators, Preconditioner};
use crate::solver::{CgSolver, FgmresSolver, GmresConfig, GmresSolver, KrylovMethod, PreOnly, RichardsonSolver};
use crate::utils::convergence::{
    ConvergedReason, Convergence, ConvergenceTest, SkipConvergence, SolveStats, Tolerances,
};

/// Enum representing the available Krylov solver types.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SolverKind {
    /// Preconditioned Richardson with damping `scale`
    Richardson { scale: f64 },
    /// Preconditioned Conjugate Gradient (SPD systems)
    Cg,
    /// Restarted GMRES
    Gmres(GmresConfig),
    /// Flexible GMRES; the preconditioner may change between iterations
    Fgmres(GmresConfig),
    /// One preconditioner application
    PreOnly,
}

impl Default for SolverKind {
    fn default() -> Self {
        SolverKind::Gmres(GmresConfig::default())
    }
}

impl SolverKind {
    pub fn name(&self) -> &'static str {
        match self {
            SolverKind::Richardson { .. } => "richardson",
            SolverKind::Cg => "cg",
            SolverKind::Gmres(_) => "gmres",
            SolverKind::Fgmres(_) => "fgmres",
            SolverKind::PreOnly => "preonly",
        }
    }

    fn gmres_config(&self) -> Option<GmresConfig> {
        match self {
            SolverKind::Gmres(cfg) | SolverKind::Fgmres(cfg) => Some(*cfg),
            _ => None,
        }
    }

    /// `{prefix}ksp_type` plus the method's own keys, starting from `current`.
    pub fn from_options(db: &OptionsDb, prefix: &str, current: SolverKind) -> Result<Self, KError> {
        let name = db.get_str(&format!("{prefix}ksp_type")).unwrap_or(current.name()).to_ascii_lowercase();
        let gmres_base = current.gmres_config().unwrap_or_default();
        Ok(match name.as_str() {
            "richardson" => {
                let base = match current {
                    SolverKind::Richardson { scale } => scale,
                    _ => 1.0,
                };
                SolverKind::Richardson { scale: db.get_real(&format!("{prefix}ksp_richardson_scale"), base)? }
            }
            "cg" => SolverKind::Cg,
            "gmres" => SolverKind::Gmres(GmresConfig::from_options(db, prefix, gmres_base)?),
            "fgmres" => SolverKind::Fgmres(GmresConfig::from_options(db, prefix, gmres_base)?),
            "preonly" => SolverKind::PreOnly,
            other => return Err(KError::InvalidArgument(format!("unknown Krylov method '{other}'"))),
        })
    }

    pub fn build<T: Scalar>(&self) -> Result<Box<dyn KrylovMethod<T>>, KError> {
        Ok(match *self {
            SolverKind::Richardson { scale } => {
                if !(scale > 0.0) {
                    return Err(KError::InvalidArgument(format!("Richardson damping {scale} must be positive")));
                }
                Box::new(RichardsonSolver::new(T::from_f64_lossy(scale)))
            }
            SolverKind::Cg => Box::new(CgSolver::new()),
            SolverKind::Gmres(cfg) => Box::new(GmresSolver::<T>::new(cfg)?),
            SolverKind::Fgmres(cfg) => Box::new(FgmresSolver::<T>::new(cfg)?),
            SolverKind::PreOnly => Box::new(PreOnly),
        })
    }
}

/// Context and configuration for a Krylov subspace solver.
pub struct KspContext<T: Scalar> {
    comm: CommRef,
    kind: SolverKind,
    method: Box<dyn KrylovMethod<T>>,
    pc: Box<dyn Preconditioner<T>>,
    /// `None` once a user-built preconditioner is installed
    pc_type: Option<PcType>,
    ops: Option<PcOperators<T>>,
    conv: Convergence<T>,
    guess_nonzero: bool,
    pc_setup_needed: bool,
    last: Option<SolveStats<T>>,
}

impl<T: Scalar> KspContext<T> {
    /// New solver on `comm`, no preconditioning, default tolerances.
    pub fn new(comm: &CommRef, kind: SolverKind) -> Result<Self, KError> {
        Ok(KspContext {
            comm: comm.clone(),
            kind,
            method: kind.build()?,
            pc: PcType::None.build(comm)?,
            pc_type: Some(PcType::None),
            ops: None,
            conv: Convergence::new(Tolerances::default()),
            guess_nonzero: false,
            pc_setup_needed: true,
            last: None,
        })
    }

    pub fn comm(&self) -> &CommRef {
        &self.comm
    }

    pub fn kind(&self) -> SolverKind {
        self.kind
    }

    pub fn set_type(&mut self, kind: SolverKind) -> Result<(), KError> {
        self.method = kind.build()?;
        self.kind = kind;
        Ok(())
    }

    pub fn method(&self) -> &dyn KrylovMethod<T> {
        self.method.as_ref()
    }

    /// Replace the preconditioner with a new one of type `pc_type`.
    pub fn set_pc_type(&mut self, pc_type: PcType) -> Result<(), KError> {
        self.pc = pc_type.build(&self.comm)?;
        self.pc_type = Some(pc_type);
        self.pc_setup_needed = true;
        Ok(())
    }

    /// Install a preconditioner built by the caller.
    pub fn set_pc(&mut self, pc: Box<dyn Preconditioner<T>>) {
        self.pc = pc;
        self.pc_type = None;
        self.pc_setup_needed = true;
    }

    pub fn pc(&self) -> &dyn Preconditioner<T> {
        self.pc.as_ref()
    }

    pub fn pc_mut(&mut self) -> &mut dyn Preconditioner<T> {
        self.pc.as_mut()
    }

    pub fn pc_type(&self) -> Option<&PcType> {
        self.pc_type.as_ref()
    }

    /// Operator pair of subsequent solves. `amat` defines the system,
    /// `pmat` is handed to the preconditioner. With
    /// [`MatStructure::SamePreconditioner`] an existing preconditioner is
    /// kept as is.
    pub fn set_operators(
        &mut self,
        amat: OperatorRef<T>,
        pmat: OperatorRef<T>,
        structure: MatStructure,
    ) -> Result<(), KError> {
        let (m, n) = amat.global_shape();
        if m != n {
            return Err(KError::InvalidArgument(format!("Krylov solve needs a square operator, got {m}x{n}")));
        }
        if pmat.global_shape() != (m, n) {
            return Err(KError::InvalidArgument(format!(
                "preconditioning operator is {:?}, system operator is {:?}",
                pmat.global_shape(),
                (m, n)
            )));
        }
        if structure != MatStructure::SamePreconditioner || self.ops.is_none() {
            self.pc_setup_needed = true;
        }
        self.ops = Some(PcOperators { amat, pmat, structure });
        Ok(())
    }

    pub fn operators(&self) -> Option<&PcOperators<T>> {
        self.ops.as_ref()
    }

    /// Change the stopping criteria; `None` keeps the current value.
    pub fn set_tolerances(
        &mut self,
        rtol: Option<T>,
        atol: Option<T>,
        dtol: Option<T>,
        max_its: Option<usize>,
    ) -> Result<(), KError> {
        let cur = &self.conv.tol;
        let tol = Tolerances::new(
            rtol.unwrap_or(cur.rtol),
            atol.unwrap_or(cur.atol),
            dtol.unwrap_or(cur.dtol),
            max_its.unwrap_or(cur.max_its),
        )?;
        self.conv.tol = tol;
        Ok(())
    }

    pub fn tolerances(&self) -> &Tolerances<T> {
        &self.conv.tol
    }

    /// Replace the convergence test for subsequent solves.
    pub fn set_convergence_test(&mut self, test: impl ConvergenceTest<T> + 'static) {
        self.conv.set_test(Box::new(test));
    }

    /// Called with `(iteration, residual norm)` at every convergence check.
    pub fn set_monitor(&mut self, monitor: impl FnMut(usize, T) + 'static) {
        self.conv.set_monitor(Box::new(monitor));
    }

    /// Record the residual norm of every convergence check.
    pub fn set_residual_history(&mut self, on: bool) {
        self.conv.ctx.set_history(on);
    }

    pub fn residual_history(&self) -> Option<&[T]> {
        self.conv.ctx.history()
    }

    pub fn set_initial_guess_nonzero(&mut self, on: bool) {
        self.guess_nonzero = on;
    }

    pub fn initial_guess_nonzero(&self) -> bool {
        self.guess_nonzero
    }

    /// Set up the preconditioner if the operators changed since the last
    /// setup.
    pub fn set_up(&mut self) -> Result<(), KError> {
        let ops = self
            .ops
            .as_ref()
            .ok_or_else(|| KError::WrongState("operators must be set before the solver is set up".into()))?;
        if self.pc_setup_needed {
            self.pc.setup(ops)?;
            self.pc_setup_needed = false;
        }
        Ok(())
    }

    fn check_vectors(&self, b: &DVector<T>, x: &DVector<T>) -> Result<(), KError> {
        if let Some(ops) = &self.ops {
            if !b.layout().compatible(ops.amat.row_layout()) || !x.layout().compatible(ops.amat.col_layout()) {
                return Err(KError::InvalidArgument(
                    "right-hand side or solution vector does not match the operator layout".into(),
                ));
            }
        }
        Ok(())
    }

    /// Solve `A x = b`. `x` is zeroed first unless the initial guess is
    /// declared nonzero.
    pub fn solve(&mut self, b: &DVector<T>, x: &mut DVector<T>) -> Result<SolveStats<T>, KError> {
        self.set_up()?;
        self.check_vectors(b, x)?;
        if !self.guess_nonzero {
            x.set(T::zero());
        }
        let ops = self
            .ops
            .as_ref()
            .ok_or_else(|| KError::WrongState("operators must be set before solving".into()))?;
        let stats = self.method.solve(ops.amat.as_ref(), self.pc.as_mut(), b, x, &mut self.conv)?;
        log::debug!(
            "KSP {}: {} after {} iterations",
            self.method.name(),
            stats.reason,
            stats.iterations
        );
        self.last = Some(stats.clone());
        Ok(stats)
    }

    /// Solve `Aᵀ x = b`.
    pub fn solve_transpose(&mut self, b: &DVector<T>, x: &mut DVector<T>) -> Result<SolveStats<T>, KError> {
        self.set_up()?;
        if !self.guess_nonzero {
            x.set(T::zero());
        }
        let ops = self
            .ops
            .as_ref()
            .ok_or_else(|| KError::WrongState("operators must be set before solving".into()))?;
        let stats = self.method.solve_transpose(ops.amat.as_ref(), self.pc.as_mut(), b, x, &mut self.conv)?;
        log::debug!(
            "KSP {} (transpose): {} after {} iterations",
            self.method.name(),
            stats.reason,
            stats.iterations
        );
        self.last = Some(stats.clone());
        Ok(stats)
    }

    pub fn last_stats(&self) -> Option<&SolveStats<T>> {
        self.last.as_ref()
    }

    /// Iterations of the last solve (0 before any solve).
    pub fn iteration_number(&self) -> usize {
        self.last.as_ref().map_or(0, |s| s.iterations)
    }

    pub fn converged_reason(&self) -> ConvergedReason {
        self.last.as_ref().map_or(ConvergedReason::Iterating, |s| s.reason)
    }

    /// Apply `ksp_type`, the tolerance keys, `ksp_initial_guess_nonzero`,
    /// `pc_type` and the preconditioner's own keys, all under `prefix`.
    pub fn set_from_options(&mut self, db: &OptionsDb, prefix: &str) -> Result<(), KError> {
        let key = |k: &str| format!("{prefix}{k}");
        let kind = SolverKind::from_options(db, prefix, self.kind)?;
        if kind != self.kind {
            self.set_type(kind)?;
        }
        let cur = self.conv.tol;
        self.conv.tol = Tolerances::new(
            T::from_f64_lossy(db.get_real(&key("ksp_rtol"), cur.rtol.to_f64_lossy())?),
            T::from_f64_lossy(db.get_real(&key("ksp_atol"), cur.atol.to_f64_lossy())?),
            T::from_f64_lossy(db.get_real(&key("ksp_divtol"), cur.dtol.to_f64_lossy())?),
            db.get_int(&key("ksp_max_it"), cur.max_its)?,
        )?;
        self.guess_nonzero = db.get_bool(&key("ksp_initial_guess_nonzero"), self.guess_nonzero)?;
        if let Some(pc_type) = PcType::from_options(db, prefix)? {
            if self.pc_type.as_ref() != Some(&pc_type) {
                self.set_pc_type(pc_type)?;
            }
        }
        self.pc.set_from_options(db, prefix)
    }

    /// A new solver of the same kind, preconditioner type, tolerances,
    /// convergence test family and operators.
    pub(crate) fn spawn_like(&self) -> Result<Self, KError> {
        let mut ksp = KspContext::new(&self.comm, self.kind)?;
        let pc_type = self.pc_type.clone().unwrap_or_else(|| {
            log::warn!("copying a solver with a user-built preconditioner; the copy is unpreconditioned");
            PcType::None
        });
        ksp.set_pc_type(pc_type)?;
        ksp.conv.tol = self.conv.tol;
        if !self.conv.needs_residual_norm() {
            ksp.set_convergence_test(SkipConvergence);
        }
        ksp.guess_nonzero = self.guess_nonzero;
        if let Some(ops) = &self.ops {
            ksp.set_operators(ops.amat.clone(), ops.pmat.clone(), ops.structure)?;
        }
        Ok(ksp)
    }

    pub fn view(&self) -> String {
        let tol = &self.conv.tol;
        format!(
            "{}\n  maximum iterations={}, initial guess is {}\n  tolerances: relative={:e}, absolute={:e}, divergence={:e}\n{}",
            self.method.view(),
            tol.max_its,
            if self.guess_nonzero { "nonzero" } else { "zero" },
            tol.rtol,
            tol.atol,
            tol.dtol,
            indent(&self.pc.view())
        )
    }
}
