//! Dense LU factorization with partial pivoting as a preconditioner.
//!
//! `PA = LU` is computed once per setup and reused by every application,
//! forward and transposed. The operator must live on a single rank; wrap
//! it in a [`Redundant`](super::Redundant) preconditioner to use it on a
//! distributed matrix. A pivot that vanishes relative to the largest entry
//! fails the setup with `ZeroPivot`; a NaN or infinite entry with
//! `FactorError`.
//!
//! # References
//! - Golub & Van Loan, Matrix Computations, §3.4

use faer::Mat;

use crate::core::traits::{LinearOperator, MatStructure, Scalar};
use crate::core::vector::DVector;
use crate::error::KError;
use crate::preconditioner::{PcOperators, Preconditioner};

struct Factors<T> {
    /// unit lower triangle below the diagonal, U on and above
    lu: Mat<T>,
    /// row `i` of `PA` is row `perm[i]` of `A`
    perm: Vec<usize>,
}

pub struct Lu<T> {
    factors: Option<Factors<T>>,
    factorizations: usize,
}

impl<T: Scalar> Default for Lu<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scalar> Lu<T> {
    pub fn new() -> Self {
        Lu { factors: None, factorizations: 0 }
    }

    /// Numeric factorizations performed so far.
    pub fn factorizations(&self) -> usize {
        self.factorizations
    }

    fn factor(mut a: Mat<T>) -> Result<Factors<T>, KError> {
        let n = a.nrows();
        if a.ncols() != n {
            return Err(KError::InvalidArgument(format!("LU needs a square matrix, got {}x{}", n, a.ncols())));
        }
        let mut scale = T::zero();
        for j in 0..n {
            for i in 0..n {
                let v = a[(i, j)];
                if !v.is_finite() {
                    return Err(KError::FactorError(format!("non-finite entry at ({i}, {j})")));
                }
                scale = scale.max(v.abs());
            }
        }
        let tiny = T::epsilon() * scale;
        let mut perm: Vec<usize> = (0..n).collect();
        for k in 0..n {
            let mut p = k;
            for i in (k + 1)..n {
                if a[(i, k)].abs() > a[(p, k)].abs() {
                    p = i;
                }
            }
            if a[(p, k)].abs() <= tiny {
                return Err(KError::ZeroPivot(k));
            }
            if p != k {
                perm.swap(p, k);
                for j in 0..n {
                    let t = a[(k, j)];
                    a[(k, j)] = a[(p, j)];
                    a[(p, j)] = t;
                }
            }
            let pivot = a[(k, k)];
            for i in (k + 1)..n {
                let l = a[(i, k)] / pivot;
                a[(i, k)] = l;
                if l != T::zero() {
                    for j in (k + 1)..n {
                        a[(i, j)] = a[(i, j)] - l * a[(k, j)];
                    }
                }
            }
        }
        Ok(Factors { lu: a, perm })
    }
}

/// Dense copy of a single-rank operator.
pub(crate) fn dense_copy<T: Scalar>(op: &dyn LinearOperator<T>) -> Result<Mat<T>, KError> {
    if op.comm().size() != 1 {
        return Err(KError::Unsupported(
            "direct factorization of a distributed matrix; use the redundant preconditioner".into(),
        ));
    }
    if let Some(csr) = op.as_csr() {
        return csr.to_dense();
    }
    let (m, n) = op.global_shape();
    let mut a = Mat::<T>::zeros(m, n);
    let mut e = DVector::zeros(op.col_layout());
    let mut col = DVector::zeros(op.row_layout());
    for j in 0..n {
        e.set(T::zero());
        e.local_mut()[j] = T::one();
        op.apply(&e, &mut col)?;
        for (i, &v) in col.local().iter().enumerate() {
            a[(i, j)] = v;
        }
    }
    Ok(a)
}

impl<T: Scalar> Preconditioner<T> for Lu<T> {
    fn name(&self) -> &'static str {
        "lu"
    }

    fn setup(&mut self, ops: &PcOperators<T>) -> Result<(), KError> {
        if self.factors.is_some() && ops.structure == MatStructure::SamePreconditioner {
            return Ok(());
        }
        self.factors = None;
        let a = dense_copy(ops.pmat.as_ref())?;
        self.factors = Some(Self::factor(a)?);
        self.factorizations += 1;
        log::debug!("LU: factored a {}x{} matrix", ops.pmat.global_shape().0, ops.pmat.global_shape().1);
        Ok(())
    }

    fn apply(&mut self, x: &DVector<T>, y: &mut DVector<T>) -> Result<(), KError> {
        let f = self
            .factors
            .as_ref()
            .ok_or_else(|| KError::WrongState("LU applied before a successful setup".into()))?;
        let n = f.perm.len();
        if x.local_len() != n || y.local_len() != n {
            return Err(KError::InvalidArgument("LU applied to vectors of the wrong size".into()));
        }
        let xs = x.local();
        let ys = y.local_mut();
        for (i, yi) in ys.iter_mut().enumerate() {
            *yi = xs[f.perm[i]];
        }
        for i in 0..n {
            let mut s = ys[i];
            for j in 0..i {
                s = s - f.lu[(i, j)] * ys[j];
            }
            ys[i] = s;
        }
        for i in (0..n).rev() {
            let mut s = ys[i];
            for j in (i + 1)..n {
                s = s - f.lu[(i, j)] * ys[j];
            }
            ys[i] = s / f.lu[(i, i)];
        }
        Ok(())
    }

    fn apply_transpose(&mut self, x: &DVector<T>, y: &mut DVector<T>) -> Result<(), KError> {
        let f = self
            .factors
            .as_ref()
            .ok_or_else(|| KError::WrongState("LU applied before a successful setup".into()))?;
        let n = f.perm.len();
        if x.local_len() != n || y.local_len() != n {
            return Err(KError::InvalidArgument("LU applied to vectors of the wrong size".into()));
        }
        // Uᵀ w = x, Lᵀ v = w, y = Pᵀ v
        let mut v: Vec<T> = x.local().to_vec();
        for i in 0..n {
            let mut s = v[i];
            for j in 0..i {
                s = s - f.lu[(j, i)] * v[j];
            }
            v[i] = s / f.lu[(i, i)];
        }
        for i in (0..n).rev() {
            let mut s = v[i];
            for j in (i + 1)..n {
                s = s - f.lu[(j, i)] * v[j];
            }
            v[i] = s;
        }
        let ys = y.local_mut();
        for (i, &vi) in v.iter().enumerate() {
            ys[f.perm[i]] = vi;
        }
        Ok(())
    }
}
