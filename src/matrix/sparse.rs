//! Row-distributed CSR matrix.
//!
//! Each rank stores its owned rows with *global* column indices. Products
//! gather the input vector to every rank, which keeps the kernel simple and
//! is adequate for the moderate sizes this crate targets; transpose products
//! accumulate a global-length buffer and reduce it in one collective.

use std::sync::Arc;

use faer::Mat;

use crate::core::traits::{LinearOperator, Scalar};
use crate::core::vector::{DVector, Layout};
use crate::error::KError;

#[derive(Clone)]
pub struct CsrMatrix<T> {
    rows: Arc<Layout>,
    cols: Arc<Layout>,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<T>,
}

impl<T: std::fmt::Debug> std::fmt::Debug for CsrMatrix<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrMatrix")
            .field("rows", &self.rows)
            .field("global_cols", &self.cols.global_len())
            .field("nnz_local", &self.values.len())
            .finish()
    }
}

impl<T: Scalar> CsrMatrix<T> {
    /// Build from the owned rows in CSR form.
    pub fn from_csr(
        rows: &Arc<Layout>,
        cols: &Arc<Layout>,
        row_ptr: Vec<usize>,
        col_idx: Vec<usize>,
        values: Vec<T>,
    ) -> Result<Self, KError> {
        let nloc = rows.local_len();
        if row_ptr.len() != nloc + 1 || row_ptr[0] != 0 {
            return Err(KError::InvalidArgument(format!(
                "row_ptr must start at 0 and hold {} entries",
                nloc + 1
            )));
        }
        if row_ptr.windows(2).any(|w| w[1] < w[0]) {
            return Err(KError::InvalidArgument("row_ptr is not monotone".into()));
        }
        let nnz = row_ptr[nloc];
        if col_idx.len() != nnz || values.len() != nnz {
            return Err(KError::InvalidArgument(format!(
                "row_ptr announces {nnz} entries, got {} columns and {} values",
                col_idx.len(),
                values.len()
            )));
        }
        let ncols = cols.global_len();
        if let Some(&bad) = col_idx.iter().find(|&&c| c >= ncols) {
            return Err(KError::InvalidArgument(format!("column {bad} out of range 0..{ncols}")));
        }
        Ok(CsrMatrix {
            rows: Arc::clone(rows),
            cols: Arc::clone(cols),
            row_ptr,
            col_idx,
            values,
        })
    }

    /// Build from `(global_row, global_col, value)` entries. Entries for rows
    /// owned by other ranks are ignored; duplicates are summed.
    pub fn from_triplets(
        rows: &Arc<Layout>,
        cols: &Arc<Layout>,
        entries: &[(usize, usize, T)],
    ) -> Result<Self, KError> {
        let (start, end) = rows.ownership_range();
        let mut owned: Vec<(usize, usize, T)> = entries
            .iter()
            .copied()
            .filter(|&(r, _, _)| r >= start && r < end)
            .collect();
        owned.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let nloc = end - start;
        let mut row_ptr = vec![0usize; nloc + 1];
        let mut col_idx = Vec::with_capacity(owned.len());
        let mut values: Vec<T> = Vec::with_capacity(owned.len());
        let mut last: Option<(usize, usize)> = None;
        for (r, c, v) in owned {
            if last == Some((r, c)) {
                if let Some(tail) = values.last_mut() {
                    *tail = *tail + v;
                }
                continue;
            }
            row_ptr[r - start + 1] += 1;
            col_idx.push(c);
            values.push(v);
            last = Some((r, c));
        }
        for i in 0..nloc {
            row_ptr[i + 1] += row_ptr[i];
        }
        Self::from_csr(rows, cols, row_ptr, col_idx, values)
    }

    /// Sequential matrix holding the nonzeros of a dense one.
    pub fn from_dense(a: &Mat<T>) -> Self {
        let (m, n) = (a.nrows(), a.ncols());
        let mut row_ptr = Vec::with_capacity(m + 1);
        let mut col_idx = Vec::new();
        let mut values = Vec::new();
        row_ptr.push(0);
        for i in 0..m {
            for j in 0..n {
                let v = a[(i, j)];
                if v != T::zero() {
                    col_idx.push(j);
                    values.push(v);
                }
            }
            row_ptr.push(col_idx.len());
        }
        CsrMatrix {
            rows: Layout::sequential(m),
            cols: Layout::sequential(n),
            row_ptr,
            col_idx,
            values,
        }
    }

    pub fn local_nrows(&self) -> usize { self.row_ptr.len() - 1 }
    pub fn nnz_local(&self) -> usize { self.values.len() }
    pub fn row_ptr(&self) -> &[usize] { &self.row_ptr }
    pub fn col_idx(&self) -> &[usize] { &self.col_idx }
    pub fn values(&self) -> &[T] { &self.values }
    pub fn values_mut(&mut self) -> &mut [T] { &mut self.values }

    /// Global columns and values of local row `i`.
    pub fn row(&self, i: usize) -> (&[usize], &[T]) {
        let (s, e) = (self.row_ptr[i], self.row_ptr[i + 1]);
        (&self.col_idx[s..e], &self.values[s..e])
    }

    /// Diagonal entries of the owned rows (zero where not stored).
    pub fn diagonal(&self) -> Vec<T> {
        let (start, _) = self.rows.ownership_range();
        (0..self.local_nrows())
            .map(|i| {
                let (cols, vals) = self.row(i);
                cols.iter()
                    .position(|&c| c == start + i)
                    .map_or(T::zero(), |k| vals[k])
            })
            .collect()
    }

    /// Same layouts and pattern, all values zero.
    pub fn duplicate_structure(&self) -> Self {
        CsrMatrix {
            rows: Arc::clone(&self.rows),
            cols: Arc::clone(&self.cols),
            row_ptr: self.row_ptr.clone(),
            col_idx: self.col_idx.clone(),
            values: vec![T::zero(); self.values.len()],
        }
    }

    /// Sequential copy of the whole pattern on every rank, values zeroed
    /// (collective).
    pub fn gather_structure(&self) -> Result<CsrMatrix<T>, KError> {
        let comm = self.rows.comm();
        let row_counts = self.rows.counts();
        let row_nnz: Vec<usize> = self.row_ptr.windows(2).map(|w| w[1] - w[0]).collect();
        let all_row_nnz = comm.all_gather_indices(&row_nnz, &row_counts)?;
        let nnz_counts = comm.all_gather_count(self.col_idx.len())?;
        let col_idx = comm.all_gather_indices(&self.col_idx, &nnz_counts)?;

        let mut row_ptr = Vec::with_capacity(all_row_nnz.len() + 1);
        row_ptr.push(0);
        for n in all_row_nnz {
            let last = *row_ptr.last().unwrap_or(&0);
            row_ptr.push(last + n);
        }
        let nnz = col_idx.len();
        CsrMatrix::from_csr(
            &Layout::sequential(self.rows.global_len()),
            &Layout::sequential(self.cols.global_len()),
            row_ptr,
            col_idx,
            vec![T::zero(); nnz],
        )
    }

    /// Refresh the values of a replicated copy produced by
    /// [`gather_structure`](Self::gather_structure), pattern unchanged
    /// (collective).
    pub fn gather_values_into(&self, seq: &mut CsrMatrix<T>) -> Result<(), KError> {
        let comm = self.rows.comm();
        let nnz_counts = comm.all_gather_count(self.values.len())?;
        let total: usize = nnz_counts.iter().sum();
        if total != seq.values.len() || seq.rows.global_len() != self.rows.global_len() {
            return Err(KError::InvalidArgument(
                "replicated matrix no longer matches the distributed pattern".into(),
            ));
        }
        let send: Vec<f64> = self.values.iter().map(|v| v.to_f64_lossy()).collect();
        let all = comm.all_gather_varcount(&send, &nnz_counts)?;
        for (dst, v) in seq.values.iter_mut().zip(all) {
            *dst = T::from_f64_lossy(v);
        }
        Ok(())
    }

    /// Pattern and values on every rank (collective).
    pub fn gather_to_all(&self) -> Result<CsrMatrix<T>, KError> {
        let mut seq = self.gather_structure()?;
        self.gather_values_into(&mut seq)?;
        Ok(seq)
    }

    /// Dense copy; only for matrices that live on a single rank.
    pub fn to_dense(&self) -> Result<Mat<T>, KError> {
        if self.rows.size() != 1 {
            return Err(KError::Unsupported(
                "dense conversion of a matrix distributed over several ranks".into(),
            ));
        }
        let mut a = Mat::<T>::zeros(self.local_nrows(), self.cols.global_len());
        for i in 0..self.local_nrows() {
            let (cols, vals) = self.row(i);
            for (&c, &v) in cols.iter().zip(vals) {
                a[(i, c)] = a[(i, c)] + v;
            }
        }
        Ok(a)
    }

    fn check_shapes(&self, x: &DVector<T>, x_layout: &Layout, y: &DVector<T>, y_layout: &Layout) -> Result<(), KError> {
        if x.global_len() != x_layout.global_len() || x.local_len() != x_layout.local_len() {
            return Err(KError::InvalidArgument(format!(
                "input vector of length {} does not match operator dimension {}",
                x.global_len(),
                x_layout.global_len()
            )));
        }
        if y.global_len() != y_layout.global_len() || y.local_len() != y_layout.local_len() {
            return Err(KError::InvalidArgument(format!(
                "output vector of length {} does not match operator dimension {}",
                y.global_len(),
                y_layout.global_len()
            )));
        }
        Ok(())
    }
}

impl<T: Scalar> LinearOperator<T> for CsrMatrix<T> {
    fn row_layout(&self) -> &Arc<Layout> { &self.rows }
    fn col_layout(&self) -> &Arc<Layout> { &self.cols }

    fn apply(&self, x: &DVector<T>, y: &mut DVector<T>) -> Result<(), KError> {
        self.check_shapes(x, &self.cols, y, &self.rows)?;
        let gathered;
        let xg: &[T] = if self.cols.size() == 1 {
            x.local()
        } else {
            gathered = x.gather_all()?;
            &gathered
        };
        for (i, yi) in y.local_mut().iter_mut().enumerate() {
            let (cols, vals) = self.row(i);
            *yi = cols
                .iter()
                .zip(vals)
                .fold(T::zero(), |acc, (&c, &v)| acc + v * xg[c]);
        }
        Ok(())
    }

    fn apply_transpose(&self, x: &DVector<T>, y: &mut DVector<T>) -> Result<(), KError> {
        self.check_shapes(x, &self.rows, y, &self.cols)?;
        let ncols = self.cols.global_len();
        let mut acc = vec![0.0f64; ncols];
        for (i, &xi) in x.local().iter().enumerate() {
            let (cols, vals) = self.row(i);
            for (&c, &v) in cols.iter().zip(vals) {
                acc[c] += (v * xi).to_f64_lossy();
            }
        }
        let (s, e) = self.cols.ownership_range();
        if self.rows.size() == 1 {
            for (yi, &a) in y.local_mut().iter_mut().zip(&acc[s..e]) {
                *yi = T::from_f64_lossy(a);
            }
            return Ok(());
        }
        let mut sum = vec![0.0f64; ncols];
        self.rows.comm().all_reduce_slice(&acc, &mut sum)?;
        for (yi, &a) in y.local_mut().iter_mut().zip(&sum[s..e]) {
            *yi = T::from_f64_lossy(a);
        }
        Ok(())
    }

    fn as_csr(&self) -> Option<&CsrMatrix<T>> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::ThreadComm;

    fn rect(rows: &Arc<Layout>, cols: &Arc<Layout>) -> CsrMatrix<f64> {
        // [[1,2,0],[0,3,4]]
        CsrMatrix::from_triplets(
            rows,
            cols,
            &[(0, 0, 1.0), (0, 1, 2.0), (1, 1, 3.0), (1, 2, 4.0)],
        )
        .unwrap()
    }

    #[test]
    fn simple_pattern() {
        let m = rect(&Layout::sequential(2), &Layout::sequential(3));
        let x = DVector::from_local(m.col_layout(), vec![1.0, 1.0, 1.0]).unwrap();
        let mut y = DVector::zeros(m.row_layout());
        m.apply(&x, &mut y).unwrap();
        assert_eq!(y.local(), &[3.0, 7.0]);
        let mut z = DVector::zeros(m.col_layout());
        m.apply_transpose(&y, &mut z).unwrap();
        assert_eq!(z.local(), &[3.0, 27.0, 28.0]);
    }

    #[test]
    fn duplicates_are_summed_and_bad_columns_rejected() {
        let l = Layout::sequential(2);
        let m = CsrMatrix::from_triplets(&l, &l, &[(0, 0, 1.0), (0, 0, 2.0), (1, 1, 1.0)]).unwrap();
        assert_eq!(m.diagonal(), vec![3.0, 1.0]);
        assert!(CsrMatrix::from_triplets(&l, &l, &[(0, 5, 1.0)]).is_err());
    }

    #[test]
    fn distributed_products_match_sequential() {
        let out = ThreadComm::run(2, |comm| {
            let rows = Layout::split(comm.clone(), 2);
            let cols = Layout::split(comm, 3);
            let m = rect(&rows, &cols);
            let x = DVector::from_global(&cols, &[1.0, 1.0, 1.0]).unwrap();
            let mut y = DVector::zeros(&rows);
            m.apply(&x, &mut y).unwrap();
            let mut z = DVector::zeros(&cols);
            m.apply_transpose(&y, &mut z).unwrap();
            let seq = m.gather_to_all().unwrap();
            (y.gather_all().unwrap(), z.gather_all().unwrap(), seq.values().to_vec())
        });
        for (y, z, vals) in out {
            assert_eq!(y, vec![3.0, 7.0]);
            assert_eq!(z, vec![3.0, 27.0, 28.0]);
            assert_eq!(vals, vec![1.0, 2.0, 3.0, 4.0]);
        }
    }
}
