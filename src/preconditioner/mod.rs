//! Preconditioners for linear solvers.
//!
//! A preconditioner is a strategy object behind the [`Preconditioner`]
//! trait: `setup` sees the operator pair once per change, `apply` computes
//! `y = B x` with `B ≈ A⁻¹`. Strategies that own inner solvers (nested
//! Krylov, redundant, multigrid) hold them as boxed trait objects, so the
//! preconditioner tree is an ordinary ownership tree.

use crate::config::OptionsDb;
use crate::core::traits::{MatStructure, OperatorRef, Scalar};
use crate::core::vector::DVector;
use crate::error::KError;
use crate::utils::convergence::{ConvergedReason, Tolerances};

pub mod jacobi;
pub mod lu;
pub mod mg;
pub mod nested;
pub mod redundant;
pub mod sor;

pub use jacobi::Jacobi;
pub use lu::Lu;
pub use mg::{MgType, Multigrid};
pub use nested::NestedKrylov;
pub use redundant::Redundant;
pub use sor::{MatSorType, Sor, SorConfig, SorSweep};

/// Unified preconditioner configuration.
pub use crate::context::pc_context::PcType;

/// Operator pair handed to `setup`: `amat` defines the system, `pmat` is
/// what the preconditioner is built from.
pub struct PcOperators<T: Scalar> {
    pub amat: OperatorRef<T>,
    pub pmat: OperatorRef<T>,
    pub structure: MatStructure,
}

impl<T: Scalar> Clone for PcOperators<T> {
    fn clone(&self) -> Self {
        PcOperators { amat: self.amat.clone(), pmat: self.pmat.clone(), structure: self.structure }
    }
}

/// Result of a preconditioner-native Richardson iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RichardsonOutcome {
    pub its: usize,
    pub reason: ConvergedReason,
}

/// A preconditioner B ≈ A⁻¹.
pub trait Preconditioner<T: Scalar> {
    /// Short type name, e.g. `"sor"`.
    fn name(&self) -> &'static str;

    /// Build (or rebuild) from the operators.
    fn setup(&mut self, ops: &PcOperators<T>) -> Result<(), KError>;

    /// y = B x
    fn apply(&mut self, x: &DVector<T>, y: &mut DVector<T>) -> Result<(), KError>;

    /// y = Bᵀ x
    fn apply_transpose(&mut self, _x: &DVector<T>, _y: &mut DVector<T>) -> Result<(), KError> {
        Err(KError::Unsupported(format!("transpose application of the {} preconditioner", self.name())))
    }

    /// Whether [`apply_richardson`](Self::apply_richardson) is implemented.
    fn has_richardson(&self) -> bool {
        false
    }

    /// Run up to `tol.max_its` Richardson steps `x ← x + B (b − A x)`
    /// with the preconditioner's own fused kernel. `x` holds the guess.
    fn apply_richardson(
        &mut self,
        _b: &DVector<T>,
        _x: &mut DVector<T>,
        _tol: &Tolerances<T>,
    ) -> Result<RichardsonOutcome, KError> {
        Err(KError::Unsupported(format!("Richardson application of the {} preconditioner", self.name())))
    }

    /// Read strategy-specific options under `prefix`.
    fn set_from_options(&mut self, _db: &OptionsDb, _prefix: &str) -> Result<(), KError> {
        Ok(())
    }

    /// Human readable description.
    fn view(&self) -> String {
        format!("PC type: {}", self.name())
    }
}

/// B = I.
#[derive(Debug, Default, Clone, Copy)]
pub struct Identity;

impl<T: Scalar> Preconditioner<T> for Identity {
    fn name(&self) -> &'static str {
        "none"
    }
    fn setup(&mut self, _ops: &PcOperators<T>) -> Result<(), KError> {
        Ok(())
    }
    fn apply(&mut self, x: &DVector<T>, y: &mut DVector<T>) -> Result<(), KError> {
        y.copy_from(x);
        Ok(())
    }
    fn apply_transpose(&mut self, x: &DVector<T>, y: &mut DVector<T>) -> Result<(), KError> {
        y.copy_from(x);
        Ok(())
    }
}

/// Indent every line of a nested `view`.
pub(crate) fn indent(text: &str) -> String {
    text.lines().map(|l| format!("  {l}")).collect::<Vec<_>>().join("\n")
}
