// Jacobi preconditioner implementation

use crate::core::traits::{MatStructure, Scalar};
use crate::core::vector::DVector;
use crate::error::KError;
use crate::preconditioner::{PcOperators, Preconditioner};

/// Jacobi preconditioner: B = D⁻¹
pub struct Jacobi<T> {
    pub(crate) inv_diag: Vec<T>,
    ready: bool,
}

impl<T: Scalar> Jacobi<T> {
    /// new with empty state; user must call `setup`.
    pub fn new() -> Self {
        Self { inv_diag: Vec::new(), ready: false }
    }
}

impl<T: Scalar> Default for Jacobi<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scalar> Preconditioner<T> for Jacobi<T> {
    fn name(&self) -> &'static str {
        "jacobi"
    }

    fn setup(&mut self, ops: &PcOperators<T>) -> Result<(), KError> {
        if self.ready && ops.structure == MatStructure::SamePreconditioner {
            return Ok(());
        }
        let diag = match ops.pmat.as_csr() {
            Some(csr) => csr.diagonal(),
            None => {
                // probe the operator column by column; collective on every rank
                let pmat = &ops.pmat;
                let (start, end) = pmat.ownership_range();
                let mut e = DVector::zeros(pmat.col_layout());
                let mut col = DVector::zeros(pmat.row_layout());
                let mut diag = vec![T::zero(); end - start];
                let (cstart, cend) = pmat.col_layout().ownership_range();
                for j in 0..pmat.global_shape().1 {
                    e.set(T::zero());
                    if j >= cstart && j < cend {
                        e.local_mut()[j - cstart] = T::one();
                    }
                    pmat.apply(&e, &mut col)?;
                    if j >= start && j < end {
                        diag[j - start] = col.local()[j - start];
                    }
                }
                diag
            }
        };
        self.inv_diag = diag
            .into_iter()
            .map(|d| if d != T::zero() { T::one() / d } else { T::one() })
            .collect();
        self.ready = true;
        Ok(())
    }

    fn apply(&mut self, x: &DVector<T>, y: &mut DVector<T>) -> Result<(), KError> {
        if !self.ready {
            return Err(KError::WrongState("Jacobi applied before setup".into()));
        }
        for ((yi, &xi), &d) in y.local_mut().iter_mut().zip(x.local()).zip(&self.inv_diag) {
            *yi = d * xi;
        }
        Ok(())
    }

    fn apply_transpose(&mut self, x: &DVector<T>, y: &mut DVector<T>) -> Result<(), KError> {
        self.apply(x, y)
    }
}
