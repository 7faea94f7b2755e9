//! Two-phase scatter between a distributed vector and a replicated one.
//!
//! `begin` performs the exchange and returns an in-flight handle; `end`
//! writes the destination. Callers issue the pair back to back.

use std::sync::Arc;

use crate::core::traits::Scalar;
use crate::core::vector::{DVector, Layout};
use crate::error::KError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScatterMode {
    /// distributed → replicated on every rank
    Forward,
    /// replicated → owned block of the distributed vector
    Reverse,
}

/// Scatter context pairing a distributed layout with a sequential copy of
/// the full index space.
#[derive(Debug)]
pub struct VecScatter {
    dist: Arc<Layout>,
    seq: Arc<Layout>,
}

pub struct ScatterInFlight<T> {
    mode: ScatterMode,
    values: Vec<T>,
}

impl VecScatter {
    /// Scatter from `dist` to a replicated vector of the same global length.
    pub fn to_all(dist: &Arc<Layout>) -> Self {
        VecScatter { dist: Arc::clone(dist), seq: Layout::sequential(dist.global_len()) }
    }

    /// Layout of the replicated side.
    pub fn seq_layout(&self) -> &Arc<Layout> { &self.seq }
    pub fn dist_layout(&self) -> &Arc<Layout> { &self.dist }

    pub fn begin<T: Scalar>(&self, src: &DVector<T>, mode: ScatterMode) -> Result<ScatterInFlight<T>, KError> {
        let values = match mode {
            ScatterMode::Forward => {
                self.check(src, &self.dist)?;
                src.gather_all()?
            }
            ScatterMode::Reverse => {
                self.check(src, &self.seq)?;
                let (s, e) = self.dist.ownership_range();
                src.local()[s..e].to_vec()
            }
        };
        Ok(ScatterInFlight { mode, values })
    }

    fn check<T: Scalar>(&self, v: &DVector<T>, expect: &Layout) -> Result<(), KError> {
        if v.local_len() != expect.local_len() || v.global_len() != expect.global_len() {
            return Err(KError::InvalidArgument("scatter source does not match its layout".into()));
        }
        Ok(())
    }
}

impl<T: Scalar> ScatterInFlight<T> {
    pub fn mode(&self) -> ScatterMode { self.mode }

    pub fn end(self, dst: &mut DVector<T>) -> Result<(), KError> {
        if dst.local_len() != self.values.len() {
            return Err(KError::InvalidArgument(format!(
                "scatter destination holds {} entries, {} in flight",
                dst.local_len(),
                self.values.len()
            )));
        }
        dst.local_mut().copy_from_slice(&self.values);
        Ok(())
    }
}
