//! A full Krylov solve as the preconditioner.
//!
//! `apply(x, y)` solves `M y = x` with an inner [`KspContext`], where `M`
//! is the preconditioning operator (or the true operator when requested).
//! Unless the inner solve is converged to high accuracy the resulting
//! preconditioner changes from one application to the next, so the outer
//! method should be flexible ([`FgmresSolver`](crate::solver::FgmresSolver)).
//! That is the caller's responsibility and is not checked.

use crate::config::OptionsDb;
use crate::context::KspContext;
use crate::core::traits::Scalar;
use crate::core::vector::DVector;
use crate::error::KError;
use crate::preconditioner::{indent, PcOperators, Preconditioner};

pub struct NestedKrylov<T: Scalar> {
    ksp: KspContext<T>,
    use_true_operator: bool,
    inner_its: usize,
}

impl<T: Scalar> NestedKrylov<T> {
    pub fn new(ksp: KspContext<T>) -> Self {
        NestedKrylov { ksp, use_true_operator: false, inner_its: 0 }
    }

    /// Solve with `amat` instead of `pmat`.
    pub fn set_use_true_operator(&mut self, on: bool) {
        self.use_true_operator = on;
    }

    pub fn ksp(&self) -> &KspContext<T> {
        &self.ksp
    }

    pub fn ksp_mut(&mut self) -> &mut KspContext<T> {
        &mut self.ksp
    }

    /// Inner iterations summed over every application so far.
    pub fn total_iterations(&self) -> usize {
        self.inner_its
    }
}

impl<T: Scalar> Preconditioner<T> for NestedKrylov<T> {
    fn name(&self) -> &'static str {
        "ksp"
    }

    fn setup(&mut self, ops: &PcOperators<T>) -> Result<(), KError> {
        let a = if self.use_true_operator { ops.amat.clone() } else { ops.pmat.clone() };
        self.ksp.set_operators(a, ops.pmat.clone(), ops.structure)?;
        self.ksp.set_up()
    }

    fn apply(&mut self, x: &DVector<T>, y: &mut DVector<T>) -> Result<(), KError> {
        let stats = self.ksp.solve(x, y)?;
        self.inner_its += stats.iterations;
        Ok(())
    }

    fn apply_transpose(&mut self, x: &DVector<T>, y: &mut DVector<T>) -> Result<(), KError> {
        let stats = self.ksp.solve_transpose(x, y)?;
        self.inner_its += stats.iterations;
        Ok(())
    }

    fn set_from_options(&mut self, db: &OptionsDb, prefix: &str) -> Result<(), KError> {
        self.use_true_operator = db.get_bool(&format!("{prefix}pc_ksp_true"), self.use_true_operator)?;
        self.ksp.set_from_options(db, &format!("{prefix}ksp_"))
    }

    fn view(&self) -> String {
        format!(
            "PC type: ksp\n  inner solve uses the {} operator\n{}",
            if self.use_true_operator { "true" } else { "preconditioning" },
            indent(&self.ksp.view())
        )
    }
}
