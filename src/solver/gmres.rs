//! Generalized Minimal Residual (GMRES) solver with fixed restart (Saad §6.5)
//!
//! Restarted GMRES for nonsymmetric systems. The Arnoldi basis is extended
//! one vector per iteration through the configured [`Orthogonalization`];
//! the least-squares problem is kept in triangular form with Givens
//! rotations so the residual norm is available after every step without
//! forming the iterate.
//!
//! # Features
//! - left or right preconditioning (or none)
//! - classical (with optional refinement) or modified Gram-Schmidt
//! - happy breakdown detection; a breakdown that does not reach the
//!   tolerance ends the solve with `DivergedBreakdown`
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems, 2nd Edition. SIAM. §6.5
//! - https://en.wikipedia.org/wiki/Generalized_minimal_residual_method

use faer::Mat;

use crate::config::OptionsDb;
use crate::core::traits::{LinearOperator, Scalar};
use crate::core::vector::{DVector, NormType};
use crate::error::KError;
use crate::preconditioner::Preconditioner;
use crate::solver::orthog::{CgsRefinement, Orthogonalization, OrthogOutcome, CGS_REFINE_THRESHOLD};
use crate::solver::KrylovMethod;
use crate::utils::convergence::{ConvergedReason, Convergence, SolveStats};

/// Preconditioning mode for GMRES (none, left, or right)
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Preconditioning {
    None,
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GmresConfig {
    /// Number of Arnoldi vectors before restart
    pub restart: usize,
    pub orthog: Orthogonalization,
    pub preconditioning: Preconditioning,
    /// Happy breakdown threshold, relative to the cycle's initial residual
    pub haptol: f64,
}

impl Default for GmresConfig {
    fn default() -> Self {
        GmresConfig {
            restart: 30,
            orthog: Orthogonalization::default(),
            preconditioning: Preconditioning::Left,
            haptol: 1e-30,
        }
    }
}

impl GmresConfig {
    pub fn validate(&self) -> Result<(), KError> {
        if self.restart == 0 {
            return Err(KError::InvalidArgument("GMRES restart must be at least 1".into()));
        }
        if let Orthogonalization::Classical { threshold, .. } = self.orthog {
            if !(threshold > 0.0) {
                return Err(KError::InvalidArgument(format!("refinement threshold {threshold} must be positive")));
            }
        }
        if !(self.haptol >= 0.0) {
            return Err(KError::InvalidArgument("happy breakdown tolerance must be non-negative".into()));
        }
        Ok(())
    }

    /// Read `{prefix}ksp_gmres_restart`, `{prefix}ksp_gmres_modifiedgramschmidt`,
    /// `{prefix}ksp_gmres_cgs_refinement_type` (never / ifneeded / always),
    /// `{prefix}ksp_gmres_haptol` and `{prefix}ksp_pc_side` (left / right).
    pub fn from_options(db: &OptionsDb, prefix: &str, base: GmresConfig) -> Result<Self, KError> {
        let mut cfg = base;
        cfg.restart = db.get_int(&format!("{prefix}ksp_gmres_restart"), cfg.restart)?;
        cfg.haptol = db.get_real(&format!("{prefix}ksp_gmres_haptol"), cfg.haptol)?;
        if db.get_bool(&format!("{prefix}ksp_gmres_modifiedgramschmidt"), false)? {
            cfg.orthog = Orthogonalization::Modified;
        }
        if let Some(kind) = db.get_str(&format!("{prefix}ksp_gmres_cgs_refinement_type")) {
            let refinement = match kind.to_ascii_lowercase().as_str() {
                "never" | "refine_never" => CgsRefinement::Never,
                "ifneeded" | "refine_ifneeded" => CgsRefinement::IfNeeded,
                "always" | "refine_always" => CgsRefinement::Always,
                other => {
                    return Err(KError::InvalidArgument(format!("unknown CGS refinement type '{other}'")));
                }
            };
            cfg.orthog = Orthogonalization::Classical { refinement, threshold: CGS_REFINE_THRESHOLD };
        }
        if let Some(side) = db.get_str(&format!("{prefix}ksp_pc_side")) {
            cfg.preconditioning = match side.to_ascii_lowercase().as_str() {
                "left" => Preconditioning::Left,
                "right" => Preconditioning::Right,
                "none" => Preconditioning::None,
                other => return Err(KError::InvalidArgument(format!("unknown preconditioning side '{other}'"))),
            };
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Arnoldi basis and least-squares state of one restart cycle.
///
/// `hes` keeps the Hessenberg matrix as produced by the orthogonalization,
/// `hh` the same columns after the Givens rotations.
pub struct KrylovState<T> {
    basis: Vec<DVector<T>>,
    hes: Mat<T>,
    hh: Mat<T>,
    cs: Vec<T>,
    sn: Vec<T>,
    grs: Vec<T>,
    restart: usize,
    dim: usize,
}

impl<T: Scalar> KrylovState<T> {
    pub fn new(restart: usize) -> Self {
        KrylovState {
            basis: Vec::new(),
            hes: Mat::zeros(restart + 1, restart),
            hh: Mat::zeros(restart + 1, restart),
            cs: vec![T::zero(); restart],
            sn: vec![T::zero(); restart],
            grs: vec![T::zero(); restart + 1],
            restart,
            dim: 0,
        }
    }

    /// Basis vectors produced so far in this cycle (`dim + 1` of them).
    pub fn basis(&self) -> &[DVector<T>] {
        let n = (self.dim + 1).min(self.basis.len());
        &self.basis[..n]
    }

    /// Unrotated Hessenberg matrix; the leading `(dim + 1) × dim` block is valid.
    pub fn hessenberg(&self) -> &Mat<T> {
        &self.hes
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Start a cycle from the normalized vector `v0` with residual norm `beta`.
    pub fn start(&mut self, v0: &DVector<T>, beta: T) {
        let compatible = self
            .basis
            .first()
            .is_some_and(|v| v.layout().compatible(v0.layout()));
        if !compatible {
            self.basis.clear();
        }
        if self.basis.is_empty() {
            self.basis.push(v0.duplicate());
        }
        self.basis[0].copy_from(v0);
        for j in 0..self.restart {
            for i in 0..=self.restart {
                self.hes[(i, j)] = T::zero();
                self.hh[(i, j)] = T::zero();
            }
        }
        self.cs.iter_mut().chain(self.sn.iter_mut()).for_each(|c| *c = T::zero());
        self.grs.iter_mut().for_each(|g| *g = T::zero());
        self.grs[0] = beta;
        self.dim = 0;
    }

    /// Orthogonalize `w` against the basis as column `dim` and append the
    /// normalized remainder. Returns the remainder norm.
    pub fn extend(&mut self, w: &mut DVector<T>, orth: &Orthogonalization) -> Result<(T, OrthogOutcome), KError> {
        let j = self.dim;
        assert!(j < self.restart, "Krylov basis is full");
        let mut h = vec![T::zero(); j + 1];
        let outcome = orth.orthogonalize(&self.basis[..=j], w, &mut h)?;
        let hnext = w.norm(NormType::L2)?;
        for (i, &hij) in h.iter().enumerate() {
            self.hes[(i, j)] = hij;
            self.hh[(i, j)] = hij;
        }
        self.hes[(j + 1, j)] = hnext;
        self.hh[(j + 1, j)] = hnext;
        if self.basis.len() <= j + 1 {
            self.basis.push(w.duplicate());
        }
        self.basis[j + 1].copy_from(w);
        if hnext > T::zero() {
            self.basis[j + 1].scale(T::one() / hnext);
        }
        self.dim = j + 1;
        Ok((hnext, outcome))
    }

    /// Rotate the newest column into triangular form; returns the
    /// least-squares residual norm.
    pub fn rotate(&mut self) -> T {
        let j = self.dim - 1;
        for i in 0..j {
            let a = self.hh[(i, j)];
            let b = self.hh[(i + 1, j)];
            self.hh[(i, j)] = self.cs[i] * a + self.sn[i] * b;
            self.hh[(i + 1, j)] = -self.sn[i] * a + self.cs[i] * b;
        }
        let a = self.hh[(j, j)];
        let b = self.hh[(j + 1, j)];
        let denom = a.hypot(b);
        if denom == T::zero() {
            self.cs[j] = T::one();
            self.sn[j] = T::zero();
        } else {
            self.cs[j] = a / denom;
            self.sn[j] = b / denom;
        }
        self.hh[(j, j)] = self.cs[j] * a + self.sn[j] * b;
        self.hh[(j + 1, j)] = T::zero();
        self.grs[j + 1] = -self.sn[j] * self.grs[j];
        self.grs[j] = self.cs[j] * self.grs[j];
        self.grs[j + 1].abs()
    }

    /// Coefficients of the basis minimizing the residual over the cycle.
    pub fn least_squares(&self) -> Vec<T> {
        let k = self.dim;
        let mut y = vec![T::zero(); k];
        for i in (0..k).rev() {
            let mut s = self.grs[i];
            for j in (i + 1)..k {
                s = s - self.hh[(i, j)] * y[j];
            }
            let d = self.hh[(i, i)];
            y[i] = if d != T::zero() { s / d } else { T::zero() };
        }
        y
    }
}

/// GMRES solver.
pub struct GmresSolver<T> {
    pub config: GmresConfig,
    state: KrylovState<T>,
    refinements: usize,
}

impl<T: Scalar> GmresSolver<T> {
    pub fn new(config: GmresConfig) -> Result<Self, KError> {
        config.validate()?;
        Ok(GmresSolver { state: KrylovState::new(config.restart), config, refinements: 0 })
    }

    /// Set the preconditioning mode (left, right, or none).
    pub fn with_preconditioning(mut self, mode: Preconditioning) -> Self {
        self.config.preconditioning = mode;
        self
    }

    pub fn with_orthogonalization(mut self, orthog: Orthogonalization) -> Self {
        self.config.orthog = orthog;
        self
    }

    /// Arnoldi state of the last cycle.
    pub fn state(&self) -> &KrylovState<T> {
        &self.state
    }

    /// Classical refinement passes run during the last solve.
    pub fn refinements(&self) -> usize {
        self.refinements
    }

    /// Cycle start vector: the (preconditioned) residual.
    fn initial_residual(
        &self,
        a: &dyn LinearOperator<T>,
        pc: &mut dyn Preconditioner<T>,
        b: &DVector<T>,
        x: &DVector<T>,
        r: &mut DVector<T>,
        v0: &mut DVector<T>,
    ) -> Result<T, KError> {
        a.residual(b, x, r)?;
        match self.config.preconditioning {
            Preconditioning::Left => pc.apply(r, v0)?,
            Preconditioning::Right | Preconditioning::None => v0.copy_from(r),
        }
        v0.norm(NormType::L2)
    }
}

impl<T: Scalar> KrylovMethod<T> for GmresSolver<T> {
    fn name(&self) -> &'static str {
        "gmres"
    }

    fn solve(
        &mut self,
        a: &dyn LinearOperator<T>,
        pc: &mut dyn Preconditioner<T>,
        b: &DVector<T>,
        x: &mut DVector<T>,
        conv: &mut Convergence<T>,
    ) -> Result<SolveStats<T>, KError> {
        if self.state.restart != self.config.restart {
            self.state = KrylovState::new(self.config.restart);
        }
        self.refinements = 0;
        let mut r = b.duplicate();
        let mut v0 = b.duplicate();
        let mut z = b.duplicate();
        let mut w = b.duplicate();
        let max_its = conv.tol.max_its;
        let haptol = T::from_f64_lossy(self.config.haptol);

        conv.reset();
        let mut its = 0usize;
        let mut res_norm = self.initial_residual(a, pc, b, x, &mut r, &mut v0)?;
        let mut reason = conv.check(0, res_norm);

        while reason.is_iterating() {
            let beta = res_norm;
            if beta == T::zero() {
                reason = ConvergedReason::ConvergedAtol;
                break;
            }
            v0.scale(T::one() / beta);
            self.state.start(&v0, beta);

            let mut happy = false;
            while self.state.dim() < self.config.restart && its < max_its {
                let j = self.state.dim();
                match self.config.preconditioning {
                    Preconditioning::Left => {
                        a.apply(&self.state.basis[j], &mut z)?;
                        pc.apply(&z, &mut w)?;
                    }
                    Preconditioning::Right => {
                        pc.apply(&self.state.basis[j], &mut z)?;
                        a.apply(&z, &mut w)?;
                    }
                    Preconditioning::None => a.apply(&self.state.basis[j], &mut w)?,
                }
                let (hnext, outcome) = self.state.extend(&mut w, &self.config.orthog)?;
                if outcome.refined {
                    self.refinements += 1;
                }
                res_norm = self.state.rotate();
                its += 1;
                happy = hnext <= haptol * beta;
                reason = conv.check(its, res_norm);
                if !reason.is_iterating() || happy {
                    break;
                }
            }

            // x ← x + V y (right preconditioning: x ← x + B V y)
            let y = self.state.least_squares();
            z.set(T::zero());
            z.maxpy(&y, &self.state.basis[..y.len()]);
            match self.config.preconditioning {
                Preconditioning::Right => {
                    pc.apply(&z, &mut w)?;
                    x.axpy(T::one(), &w);
                }
                Preconditioning::Left | Preconditioning::None => x.axpy(T::one(), &z),
            }

            if reason.is_iterating() && (happy || its >= max_its || self.state.dim() == self.config.restart) {
                res_norm = self.initial_residual(a, pc, b, x, &mut r, &mut v0)?;
                if happy {
                    reason = conv.verdict(its, res_norm);
                    if reason.is_iterating() {
                        log::warn!("GMRES breakdown at iteration {its} with residual {res_norm:e}");
                        reason = ConvergedReason::DivergedBreakdown;
                    }
                } else if its >= max_its {
                    reason = ConvergedReason::ConvergedIts;
                }
            }
        }

        log::debug!("GMRES finished after {its} iterations: {reason}");
        Ok(SolveStats::new(its, res_norm, reason))
    }

    fn view(&self) -> String {
        format!(
            "KSP type: gmres\n  restart={}, orthogonalization={:?}, preconditioning={:?}",
            self.config.restart, self.config.orthog, self.config.preconditioning
        )
    }
}
