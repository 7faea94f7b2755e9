//! Sequential dense operator on top of Faer.
//!
//! Handy for small transfer operators and coarse problems; lives on a single
//! rank.

use std::sync::Arc;

use faer::Mat;

use crate::core::traits::{LinearOperator, Scalar};
use crate::core::vector::{DVector, Layout};
use crate::error::KError;

pub struct DenseMatrix<T> {
    mat: Mat<T>,
    rows: Arc<Layout>,
    cols: Arc<Layout>,
}

impl<T: Scalar> DenseMatrix<T> {
    pub fn new(mat: Mat<T>) -> Self {
        let rows = Layout::sequential(mat.nrows());
        let cols = Layout::sequential(mat.ncols());
        DenseMatrix { mat, rows, cols }
    }

    /// Construct from raw column-major storage.
    pub fn from_raw(nrows: usize, ncols: usize, data: Vec<T>) -> Result<Self, KError> {
        if data.len() != nrows * ncols {
            return Err(KError::InvalidArgument(format!(
                "{} values cannot fill a {nrows}x{ncols} matrix",
                data.len()
            )));
        }
        Ok(Self::new(Mat::from_fn(nrows, ncols, |i, j| data[j * nrows + i])))
    }

    pub fn mat(&self) -> &Mat<T> { &self.mat }
}

impl<T: Scalar> LinearOperator<T> for DenseMatrix<T> {
    fn row_layout(&self) -> &Arc<Layout> { &self.rows }
    fn col_layout(&self) -> &Arc<Layout> { &self.cols }

    fn apply(&self, x: &DVector<T>, y: &mut DVector<T>) -> Result<(), KError> {
        if x.local_len() != self.mat.ncols() || y.local_len() != self.mat.nrows() {
            return Err(KError::InvalidArgument("dense product with mismatched vectors".into()));
        }
        let x = x.local();
        for (i, yi) in y.local_mut().iter_mut().enumerate() {
            *yi = (0..self.mat.ncols()).fold(T::zero(), |acc, j| acc + self.mat[(i, j)] * x[j]);
        }
        Ok(())
    }

    fn apply_transpose(&self, x: &DVector<T>, y: &mut DVector<T>) -> Result<(), KError> {
        if x.local_len() != self.mat.nrows() || y.local_len() != self.mat.ncols() {
            return Err(KError::InvalidArgument("dense product with mismatched vectors".into()));
        }
        let x = x.local();
        for (j, yj) in y.local_mut().iter_mut().enumerate() {
            *yj = (0..self.mat.nrows()).fold(T::zero(), |acc, i| acc + self.mat[(i, j)] * x[i]);
        }
        Ok(())
    }
}
