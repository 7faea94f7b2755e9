//! Redundant preconditioner: every rank holds the whole operator.
//!
//! At setup the distributed preconditioning matrix is gathered onto every
//! rank and an inner sequential preconditioner (LU by default) is built
//! from the copy. `apply` gathers the full input vector, lets the inner
//! preconditioner act on it, and keeps the owned block of the result. All
//! ranks do the same work on the same data, so the result is identical on
//! every rank and equal to a single-rank application.
//!
//! A new pattern (or [`MatStructure::DifferentNonzeroPattern`]) regathers
//! pattern and values; otherwise only the values are refreshed.

use std::sync::Arc;

use crate::config::OptionsDb;
use crate::context::pc_context::PcType;
use crate::core::scatter::{ScatterMode, VecScatter};
use crate::core::traits::{LinearOperator, MatStructure, OperatorRef, Scalar};
use crate::core::vector::DVector;
use crate::error::KError;
use crate::matrix::CsrMatrix;
use crate::parallel::SerialComm;
use crate::preconditioner::{indent, Lu, PcOperators, Preconditioner};

/// Replicated work of a multi-rank setup.
struct Replica<T> {
    scatter: VecScatter,
    xseq: DVector<T>,
    yseq: DVector<T>,
    pmat: Arc<CsrMatrix<T>>,
}

pub struct Redundant<T: Scalar> {
    inner: Box<dyn Preconditioner<T>>,
    replica: Option<Replica<T>>,
    /// single rank: the inner preconditioner works on the operators directly
    passthrough: bool,
}

impl<T: Scalar> Default for Redundant<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scalar> Redundant<T> {
    /// Redundant LU.
    pub fn new() -> Self {
        Self::with_inner(Box::new(Lu::<T>::new()))
    }

    pub fn with_inner(inner: Box<dyn Preconditioner<T>>) -> Self {
        Redundant { inner, replica: None, passthrough: false }
    }

    /// Sequential preconditioner acting on the replicated operator.
    pub fn inner(&self) -> &dyn Preconditioner<T> {
        self.inner.as_ref()
    }

    pub fn inner_mut(&mut self) -> &mut dyn Preconditioner<T> {
        self.inner.as_mut()
    }

    fn replicate(&mut self, pmat: &OperatorRef<T>, structure: MatStructure) -> Result<Arc<CsrMatrix<T>>, KError> {
        let csr = pmat.as_csr().ok_or_else(|| {
            KError::Unsupported("redundant preconditioning needs an assembled sparse matrix".into())
        })?;
        let same_layout = self
            .replica
            .as_ref()
            .is_some_and(|r| r.scatter.dist_layout().compatible(pmat.row_layout()));
        match self.replica.as_mut() {
            Some(rep) if same_layout && structure != MatStructure::DifferentNonzeroPattern => {
                csr.gather_values_into(Arc::make_mut(&mut rep.pmat))?;
                log::debug!("redundant: refreshed values of the replicated matrix");
            }
            _ => {
                let seq = Arc::new(csr.gather_to_all()?);
                let scatter = VecScatter::to_all(pmat.row_layout());
                let xseq = DVector::zeros(scatter.seq_layout());
                let yseq = DVector::zeros(scatter.seq_layout());
                log::debug!(
                    "redundant: gathered a {}x{} matrix with {} nonzeros",
                    seq.global_shape().0,
                    seq.global_shape().1,
                    seq.nnz_local()
                );
                self.replica = Some(Replica { scatter, xseq, yseq, pmat: seq });
            }
        }
        self.replica
            .as_ref()
            .map(|r| r.pmat.clone())
            .ok_or_else(|| KError::WrongState("redundant replica missing after setup".into()))
    }

    fn apply_with(
        &mut self,
        x: &DVector<T>,
        y: &mut DVector<T>,
        transpose: bool,
    ) -> Result<(), KError> {
        if self.passthrough {
            return if transpose { self.inner.apply_transpose(x, y) } else { self.inner.apply(x, y) };
        }
        let rep = self
            .replica
            .as_mut()
            .ok_or_else(|| KError::WrongState("redundant preconditioner applied before setup".into()))?;
        rep.scatter.begin(x, ScatterMode::Forward)?.end(&mut rep.xseq)?;
        if transpose {
            self.inner.apply_transpose(&rep.xseq, &mut rep.yseq)?;
        } else {
            self.inner.apply(&rep.xseq, &mut rep.yseq)?;
        }
        rep.scatter.begin(&rep.yseq, ScatterMode::Reverse)?.end(y)
    }
}

impl<T: Scalar> Preconditioner<T> for Redundant<T> {
    fn name(&self) -> &'static str {
        "redundant"
    }

    fn setup(&mut self, ops: &PcOperators<T>) -> Result<(), KError> {
        if ops.pmat.comm().size() == 1 {
            self.passthrough = true;
            self.replica = None;
            return self.inner.setup(ops);
        }
        self.passthrough = false;
        let first = self.replica.is_none();
        let seq: OperatorRef<T> = self.replicate(&ops.pmat, ops.structure)?;
        let structure = if first { MatStructure::DifferentNonzeroPattern } else { ops.structure };
        self.inner.setup(&PcOperators { amat: seq.clone(), pmat: seq, structure })
    }

    fn apply(&mut self, x: &DVector<T>, y: &mut DVector<T>) -> Result<(), KError> {
        self.apply_with(x, y, false)
    }

    fn apply_transpose(&mut self, x: &DVector<T>, y: &mut DVector<T>) -> Result<(), KError> {
        self.apply_with(x, y, true)
    }

    /// `{prefix}redundant_pc_type` replaces the inner preconditioner;
    /// its own keys are read under `{prefix}redundant_`.
    fn set_from_options(&mut self, db: &OptionsDb, prefix: &str) -> Result<(), KError> {
        let inner_prefix = format!("{prefix}redundant_");
        if let Some(pc_type) = PcType::from_options(db, &inner_prefix)? {
            if pc_type.name() != self.inner.name() {
                self.inner = pc_type.build(&SerialComm::shared())?;
                self.replica = None;
            }
        }
        self.inner.set_from_options(db, &inner_prefix)
    }

    fn view(&self) -> String {
        format!("PC type: redundant\n  inner preconditioner on the replicated matrix:\n{}", indent(&self.inner.view()))
    }
}
