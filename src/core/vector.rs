//! Row-distributed vectors.
//!
//! A [`Layout`] records which contiguous block of global indices each rank
//! owns. A [`DVector`] stores only the owned block; reductions (`dot`,
//! `mdot`, `norm`) are collective and return the same value on every rank.
//! Element-wise kernels touch only local data.

use std::fmt;
use std::sync::Arc;

use crate::core::traits::Scalar;
use crate::error::KError;
use crate::parallel::{CommRef, SerialComm};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Ownership ranges of a distributed index space.
pub struct Layout {
    comm: CommRef,
    /// `starts[r]..starts[r + 1]` is owned by rank `r`.
    starts: Vec<usize>,
}

impl fmt::Debug for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Layout")
            .field("rank", &self.comm.rank())
            .field("starts", &self.starts)
            .finish()
    }
}

impl Layout {
    /// Layout from the local length of every rank (collective).
    pub fn new(comm: CommRef, local_len: usize) -> Result<Arc<Layout>, KError> {
        let counts = comm.all_gather_count(local_len)?;
        let mut starts = Vec::with_capacity(counts.len() + 1);
        starts.push(0);
        for c in counts {
            let last = *starts.last().unwrap_or(&0);
            starts.push(last + c);
        }
        Ok(Arc::new(Layout { comm, starts }))
    }

    /// Near-even split of `global_len` indices; the first `global_len % size`
    /// ranks get one extra. No communication.
    pub fn split(comm: CommRef, global_len: usize) -> Arc<Layout> {
        let size = comm.size();
        let base = global_len / size;
        let rem = global_len % size;
        let mut starts = Vec::with_capacity(size + 1);
        starts.push(0);
        for r in 0..size {
            starts.push(starts[r] + base + usize::from(r < rem));
        }
        Arc::new(Layout { comm, starts })
    }

    /// One-rank layout of length `n`.
    pub fn sequential(n: usize) -> Arc<Layout> {
        Arc::new(Layout { comm: SerialComm::shared(), starts: vec![0, n] })
    }

    pub fn comm(&self) -> &CommRef { &self.comm }
    pub fn rank(&self) -> usize { self.comm.rank() }
    pub fn size(&self) -> usize { self.comm.size() }
    pub fn global_len(&self) -> usize { *self.starts.last().unwrap_or(&0) }
    pub fn starts(&self) -> &[usize] { &self.starts }

    pub fn ownership_range(&self) -> (usize, usize) {
        let r = self.rank();
        (self.starts[r], self.starts[r + 1])
    }

    pub fn local_len(&self) -> usize {
        let (s, e) = self.ownership_range();
        e - s
    }

    /// Per-rank lengths, in rank order.
    pub fn counts(&self) -> Vec<usize> {
        self.starts.windows(2).map(|w| w[1] - w[0]).collect()
    }

    /// Same partition on a communicator of the same size.
    pub fn compatible(&self, other: &Layout) -> bool {
        self.starts == other.starts && self.size() == other.size()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormType {
    L1,
    L2,
    Infinity,
}

/// Distributed vector: the owned block of a global vector.
#[derive(Clone)]
pub struct DVector<T> {
    layout: Arc<Layout>,
    data: Vec<T>,
}

impl<T: fmt::Debug> fmt::Debug for DVector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DVector")
            .field("range", &self.layout.ownership_range())
            .field("data", &self.data)
            .finish()
    }
}

impl<T: Scalar> DVector<T> {
    pub fn zeros(layout: &Arc<Layout>) -> Self {
        DVector { layout: Arc::clone(layout), data: vec![T::zero(); layout.local_len()] }
    }

    /// Wrap the owned block.
    pub fn from_local(layout: &Arc<Layout>, data: Vec<T>) -> Result<Self, KError> {
        if data.len() != layout.local_len() {
            return Err(KError::InvalidArgument(format!(
                "local block has {} entries, layout owns {}",
                data.len(),
                layout.local_len()
            )));
        }
        Ok(DVector { layout: Arc::clone(layout), data })
    }

    /// Take the owned block out of a replicated global array.
    pub fn from_global(layout: &Arc<Layout>, global: &[T]) -> Result<Self, KError> {
        if global.len() != layout.global_len() {
            return Err(KError::InvalidArgument(format!(
                "global array has {} entries, layout spans {}",
                global.len(),
                layout.global_len()
            )));
        }
        let (s, e) = layout.ownership_range();
        Ok(DVector { layout: Arc::clone(layout), data: global[s..e].to_vec() })
    }

    /// New zero vector with the same layout.
    pub fn duplicate(&self) -> Self {
        Self::zeros(&self.layout)
    }

    pub fn layout(&self) -> &Arc<Layout> { &self.layout }
    pub fn local(&self) -> &[T] { &self.data }
    pub fn local_mut(&mut self) -> &mut [T] { &mut self.data }
    pub fn local_len(&self) -> usize { self.data.len() }
    pub fn global_len(&self) -> usize { self.layout.global_len() }
    pub fn ownership_range(&self) -> (usize, usize) { self.layout.ownership_range() }

    pub fn set(&mut self, alpha: T) {
        self.data.iter_mut().for_each(|v| *v = alpha);
    }

    pub fn copy_from(&mut self, other: &DVector<T>) {
        assert_eq!(self.data.len(), other.data.len(), "copy between incompatible vectors");
        self.data.copy_from_slice(&other.data);
    }

    pub fn scale(&mut self, alpha: T) {
        self.data.iter_mut().for_each(|v| *v = *v * alpha);
    }

    /// self ← self + α x
    pub fn axpy(&mut self, alpha: T, x: &DVector<T>) {
        assert_eq!(self.data.len(), x.data.len(), "axpy on incompatible vectors");
        for (y, &xi) in self.data.iter_mut().zip(&x.data) {
            *y = *y + alpha * xi;
        }
    }

    /// self ← x + α self
    pub fn aypx(&mut self, alpha: T, x: &DVector<T>) {
        assert_eq!(self.data.len(), x.data.len(), "aypx on incompatible vectors");
        for (y, &xi) in self.data.iter_mut().zip(&x.data) {
            *y = xi + alpha * *y;
        }
    }

    /// self ← self + Σ αᵢ xᵢ
    pub fn maxpy(&mut self, alphas: &[T], xs: &[DVector<T>]) {
        assert_eq!(alphas.len(), xs.len(), "maxpy needs one coefficient per vector");
        #[cfg(feature = "rayon")]
        {
            let cols: Vec<&[T]> = xs.iter().map(|x| x.data.as_slice()).collect();
            for c in &cols {
                assert_eq!(self.data.len(), c.len(), "maxpy on incompatible vectors");
            }
            self.data.par_iter_mut().enumerate().for_each(|(i, y)| {
                *y = alphas.iter().zip(&cols).fold(*y, |acc, (&a, c)| acc + a * c[i]);
            });
        }
        #[cfg(not(feature = "rayon"))]
        {
            for (&a, x) in alphas.iter().zip(xs) {
                self.axpy(a, x);
            }
        }
    }

    fn local_dot(&self, other: &DVector<T>) -> f64 {
        assert_eq!(self.data.len(), other.data.len(), "dot of incompatible vectors");
        #[cfg(feature = "rayon")]
        {
            self.data
                .par_iter()
                .zip(other.data.par_iter())
                .map(|(&a, &b)| (a * b).to_f64_lossy())
                .sum()
        }
        #[cfg(not(feature = "rayon"))]
        {
            self.data
                .iter()
                .zip(&other.data)
                .map(|(&a, &b)| (a * b).to_f64_lossy())
                .sum()
        }
    }

    /// Global inner product (collective).
    pub fn dot(&self, other: &DVector<T>) -> Result<T, KError> {
        let local = self.local_dot(other);
        let global = self.layout.comm().all_reduce(local)?;
        Ok(T::from_f64_lossy(global))
    }

    /// Inner products against several vectors with a single reduction.
    pub fn mdot(&self, others: &[DVector<T>]) -> Result<Vec<T>, KError> {
        let local: Vec<f64> = others.iter().map(|o| self.local_dot(o)).collect();
        let mut global = vec![0.0; local.len()];
        self.layout.comm().all_reduce_slice(&local, &mut global)?;
        Ok(global.into_iter().map(T::from_f64_lossy).collect())
    }

    pub fn norm(&self, kind: NormType) -> Result<T, KError> {
        let comm = self.layout.comm();
        let value = match kind {
            NormType::L1 => {
                let local: f64 = self.data.iter().map(|v| v.abs().to_f64_lossy()).sum();
                comm.all_reduce(local)?
            }
            NormType::L2 => comm.all_reduce(self.local_dot(self))?.sqrt(),
            NormType::Infinity => {
                let local = self
                    .data
                    .iter()
                    .map(|v| v.abs().to_f64_lossy())
                    .fold(0.0, f64::max);
                comm.all_reduce_max(local)?
            }
        };
        Ok(T::from_f64_lossy(value))
    }

    /// The whole global vector, replicated on every rank (collective).
    pub fn gather_all(&self) -> Result<Vec<T>, KError> {
        if self.layout.size() == 1 {
            return Ok(self.data.clone());
        }
        let send: Vec<f64> = self.data.iter().map(|v| v.to_f64_lossy()).collect();
        let all = self.layout.comm().all_gather_varcount(&send, &self.layout.counts())?;
        Ok(all.into_iter().map(T::from_f64_lossy).collect())
    }
}
