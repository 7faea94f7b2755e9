//! Core linear-algebra traits for kspmg.

use std::fmt::{Debug, Display, LowerExp};
use std::sync::Arc;

use faer::traits::RealField;
use num_traits::{Float, FromPrimitive, ToPrimitive};

use crate::core::vector::{DVector, Layout};
use crate::error::KError;
use crate::matrix::sparse::CsrMatrix;
use crate::parallel::CommRef;

/// Real scalar usable in vectors, operators and faer dense kernels.
pub trait Scalar:
    Float + FromPrimitive + ToPrimitive + RealField + Debug + Display + LowerExp + Send + Sync + 'static
{
    /// Lossy conversion used at reduction points.
    fn to_f64_lossy(self) -> f64 {
        self.to_f64().unwrap_or(f64::NAN)
    }
    fn from_f64_lossy(x: f64) -> Self {
        Self::from_f64(x).unwrap_or_else(Self::nan)
    }
}

impl<T> Scalar for T where
    T: Float + FromPrimitive + ToPrimitive + RealField + Debug + Display + LowerExp + Send + Sync + 'static
{
}

/// How a new operator pair relates to the one the preconditioner last saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatStructure {
    /// Values changed, nonzero pattern did not.
    SameNonzeroPattern,
    /// Anything may have changed.
    DifferentNonzeroPattern,
    /// Keep the current preconditioner as is.
    SamePreconditioner,
}

/// Matrix-like operator distributed by rows.
///
/// `y = A x` where `x` follows `col_layout` and `y` follows `row_layout`.
/// Both applications are collective over the operator's communicator.
pub trait LinearOperator<T: Scalar> {
    fn row_layout(&self) -> &Arc<Layout>;
    fn col_layout(&self) -> &Arc<Layout>;

    /// y ← A x
    fn apply(&self, x: &DVector<T>, y: &mut DVector<T>) -> Result<(), KError>;
    /// y ← Aᵀ x
    fn apply_transpose(&self, x: &DVector<T>, y: &mut DVector<T>) -> Result<(), KError>;

    /// Rows `[start, end)` owned by this rank.
    fn ownership_range(&self) -> (usize, usize) {
        self.row_layout().ownership_range()
    }

    /// Global (rows, cols).
    fn global_shape(&self) -> (usize, usize) {
        (self.row_layout().global_len(), self.col_layout().global_len())
    }

    fn comm(&self) -> &CommRef {
        self.row_layout().comm()
    }

    /// r ← b − A x
    fn residual(&self, b: &DVector<T>, x: &DVector<T>, r: &mut DVector<T>) -> Result<(), KError> {
        self.apply(x, r)?;
        r.aypx(-T::one(), b);
        Ok(())
    }

    /// Assembled row storage, for strategies that need entries
    /// (relaxation sweeps, factorizations, replication).
    fn as_csr(&self) -> Option<&CsrMatrix<T>> {
        None
    }
}

/// Shared operator handle.
pub type OperatorRef<T> = Arc<dyn LinearOperator<T>>;
