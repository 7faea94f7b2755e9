//! Successive over-relaxation (SOR) and its symmetric variant (Saad §4.1).
//!
//! One relaxation step of row `i` is
//! `xᵢ ← (1 − ω) xᵢ + ω (bᵢ − Σ_{j≠i} aᵢⱼ xⱼ) / aᵢᵢ`.
//!
//! On a single rank every sweep mode is available and `its · lits` sweeps
//! are performed. On several ranks only the local modes are supported: each
//! outer iteration refreshes the off-process coupling `b − A_off x` and then
//! runs `lits` sweeps over the rank's diagonal block (block Jacobi with SOR
//! inside each block).
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems, 2nd Edition. SIAM. §4.1

use std::fmt;

use bitflags::bitflags;

use crate::config::OptionsDb;
use crate::core::traits::{LinearOperator, OperatorRef, Scalar};
use crate::core::vector::DVector;
use crate::error::KError;
use crate::matrix::CsrMatrix;
use crate::preconditioner::{PcOperators, Preconditioner, RichardsonOutcome};
use crate::utils::convergence::{ConvergedReason, Tolerances};

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct MatSorType: u32 {
        const FORWARD_SWEEP            = 0b0000_0001;
        const BACKWARD_SWEEP           = 0b0000_0010;
        const SYMMETRIC_SWEEP          = Self::FORWARD_SWEEP.bits() | Self::BACKWARD_SWEEP.bits();
        const LOCAL_FORWARD_SWEEP      = 0b0000_0100;
        const LOCAL_BACKWARD_SWEEP     = 0b0000_1000;
        const LOCAL_SYMMETRIC_SWEEP    = Self::LOCAL_FORWARD_SWEEP.bits() | Self::LOCAL_BACKWARD_SWEEP.bits();
        const ZERO_INITIAL_GUESS       = 0b0001_0000;
    }
}

impl MatSorType {
    fn forward(self) -> bool {
        self.intersects(MatSorType::FORWARD_SWEEP | MatSorType::LOCAL_FORWARD_SWEEP)
    }
    fn backward(self) -> bool {
        self.intersects(MatSorType::BACKWARD_SWEEP | MatSorType::LOCAL_BACKWARD_SWEEP)
    }
    fn is_local(self) -> bool {
        self.intersects(MatSorType::LOCAL_SYMMETRIC_SWEEP)
    }
}

/// Sweep direction as a configuration value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SorSweep {
    #[default]
    Forward,
    Backward,
    Symmetric,
    LocalForward,
    LocalBackward,
    LocalSymmetric,
}

impl SorSweep {
    pub fn flags(self) -> MatSorType {
        match self {
            SorSweep::Forward => MatSorType::FORWARD_SWEEP,
            SorSweep::Backward => MatSorType::BACKWARD_SWEEP,
            SorSweep::Symmetric => MatSorType::SYMMETRIC_SWEEP,
            SorSweep::LocalForward => MatSorType::LOCAL_FORWARD_SWEEP,
            SorSweep::LocalBackward => MatSorType::LOCAL_BACKWARD_SWEEP,
            SorSweep::LocalSymmetric => MatSorType::LOCAL_SYMMETRIC_SWEEP,
        }
    }
}

/// Validated SOR parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SorConfig {
    pub omega: f64,
    pub its: usize,
    pub lits: usize,
    pub sweep: SorSweep,
}

impl Default for SorConfig {
    fn default() -> Self {
        SorConfig { omega: 1.0, its: 1, lits: 1, sweep: SorSweep::Forward }
    }
}

impl SorConfig {
    pub fn new(omega: f64, its: usize, lits: usize, sweep: SorSweep) -> Result<Self, KError> {
        let cfg = SorConfig { omega, its, lits, sweep };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), KError> {
        if !(self.omega > 0.0 && self.omega < 2.0) {
            return Err(KError::InvalidArgument(format!("relaxation factor {} must be in (0,2)", self.omega)));
        }
        if self.its == 0 || self.lits == 0 {
            return Err(KError::InvalidArgument("SOR iteration counts must be positive".into()));
        }
        Ok(())
    }

    /// `{prefix}pc_sor_omega`, `_its`, `_lits` and one of the flags
    /// `_symmetric`, `_backward`, `_local_forward`, `_local_backward`,
    /// `_local_symmetric`.
    pub fn from_options(db: &OptionsDb, prefix: &str, base: SorConfig) -> Result<Self, KError> {
        let key = |s: &str| format!("{prefix}pc_sor_{s}");
        let mut cfg = base;
        cfg.omega = db.get_real(&key("omega"), cfg.omega)?;
        cfg.its = db.get_int(&key("its"), cfg.its)?;
        cfg.lits = db.get_int(&key("lits"), cfg.lits)?;
        for (flag, sweep) in [
            ("symmetric", SorSweep::Symmetric),
            ("backward", SorSweep::Backward),
            ("local_forward", SorSweep::LocalForward),
            ("local_backward", SorSweep::LocalBackward),
            ("local_symmetric", SorSweep::LocalSymmetric),
        ] {
            if db.get_bool(&key(flag), false)? {
                cfg.sweep = sweep;
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

pub struct Sor<T> {
    pub its: usize,
    pub lits: usize,
    pub sym: MatSorType,
    pub omega: T,
    pmat: Option<OperatorRef<T>>,
}

impl<T: Scalar> Sor<T> {
    pub fn new(config: SorConfig) -> Result<Self, KError> {
        config.validate()?;
        Ok(Self {
            its: config.its,
            lits: config.lits,
            sym: config.sweep.flags(),
            omega: T::from_f64_lossy(config.omega),
            pmat: None,
        })
    }

    pub fn set_omega(&mut self, omega: T) -> Result<(), KError> {
        if !(omega > T::zero() && omega < T::from_f64_lossy(2.0)) {
            return Err(KError::InvalidArgument(format!("relaxation factor {omega} must be in (0,2)")));
        }
        self.omega = omega;
        Ok(())
    }
    pub fn omega(&self) -> T { self.omega }
    pub fn set_iterations(&mut self, its: usize, lits: usize) -> Result<(), KError> {
        if its == 0 || lits == 0 {
            return Err(KError::InvalidArgument("SOR iteration counts must be positive".into()));
        }
        self.its = its;
        self.lits = lits;
        Ok(())
    }
    pub fn set_sweep(&mut self, sweep: SorSweep) { self.sym = sweep.flags(); }
    pub fn sym(&self) -> MatSorType { self.sym }

    fn sweep(&self) -> SorSweep {
        [
            SorSweep::Forward,
            SorSweep::Backward,
            SorSweep::Symmetric,
            SorSweep::LocalForward,
            SorSweep::LocalBackward,
            SorSweep::LocalSymmetric,
        ]
        .into_iter()
        .find(|s| s.flags() == self.sym)
        .unwrap_or_default()
    }

    fn matrix(&self) -> Result<&CsrMatrix<T>, KError> {
        let pmat = self
            .pmat
            .as_ref()
            .ok_or_else(|| KError::WrongState("SOR applied before setup".into()))?;
        pmat.as_csr()
            .ok_or_else(|| KError::Unsupported("SOR needs an assembled sparse matrix".into()))
    }
}

impl<T: Scalar> fmt::Display for Sor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SOR(omega={}, its={}, lits={}, sym={:?})", self.omega, self.its, self.lits, self.sym)
    }
}

/// `x ← relax(A, b, x)` for `its` outer iterations of `lits` sweeps.
///
/// With `ZERO_INITIAL_GUESS` the incoming `x` is ignored.
pub fn relax<T: Scalar>(
    a: &CsrMatrix<T>,
    b: &DVector<T>,
    omega: T,
    flags: MatSorType,
    its: usize,
    lits: usize,
    x: &mut DVector<T>,
) -> Result<(), KError> {
    if flags.contains(MatSorType::ZERO_INITIAL_GUESS) {
        x.set(T::zero());
    }
    let layout = x.layout().clone();
    if layout.size() == 1 {
        let rhs = b.local().to_vec();
        for _ in 0..its * lits {
            sweep_block(a, &rhs, omega, flags, 0, x.local_mut(), None);
        }
        return Ok(());
    }
    if !flags.is_local() {
        return Err(KError::Unsupported(
            "parallel SOR with global sweeps; use a local sweep type".into(),
        ));
    }
    let (start, end) = layout.ownership_range();
    let mut rhs = vec![T::zero(); end - start];
    for _ in 0..its {
        // off-process coupling with the current iterate
        let xg = x.gather_all()?;
        for (i, ri) in rhs.iter_mut().enumerate() {
            let (cols, vals) = a.row(i);
            let off = cols
                .iter()
                .zip(vals)
                .filter(|&(&c, _)| c < start || c >= end)
                .fold(T::zero(), |acc, (&c, &v)| acc + v * xg[c]);
            *ri = b.local()[i] - off;
        }
        for _ in 0..lits {
            sweep_block(a, &rhs, omega, flags, start, x.local_mut(), Some(end));
        }
    }
    Ok(())
}

/// One forward and/or backward sweep over the owned rows. With `block_end`
/// set, only columns in `[start, block_end)` take part.
fn sweep_block<T: Scalar>(
    a: &CsrMatrix<T>,
    rhs: &[T],
    omega: T,
    flags: MatSorType,
    start: usize,
    x: &mut [T],
    block_end: Option<usize>,
) {
    let n = x.len();
    let relax_row = |i: usize, x: &mut [T]| {
        let (cols, vals) = a.row(i);
        let mut sum = rhs[i];
        let mut diag = T::zero();
        for (&c, &v) in cols.iter().zip(vals) {
            if c == start + i {
                diag = diag + v;
            } else if c >= start && block_end.is_none_or(|e| c < e) {
                sum = sum - v * x[c - start];
            }
        }
        if diag != T::zero() {
            x[i] = (T::one() - omega) * x[i] + omega * sum / diag;
        }
    };
    if flags.forward() {
        for i in 0..n {
            relax_row(i, &mut *x);
        }
    }
    if flags.backward() {
        for i in (0..n).rev() {
            relax_row(i, &mut *x);
        }
    }
}

impl<T: Scalar> Preconditioner<T> for Sor<T> {
    fn name(&self) -> &'static str {
        "sor"
    }

    fn setup(&mut self, ops: &PcOperators<T>) -> Result<(), KError> {
        let csr = ops
            .pmat
            .as_csr()
            .ok_or_else(|| KError::Unsupported("SOR needs an assembled sparse matrix".into()))?;
        if let Some(i) = csr.diagonal().iter().position(|&d| d == T::zero()) {
            return Err(KError::ZeroPivot(csr.ownership_range().0 + i));
        }
        self.pmat = Some(ops.pmat.clone());
        Ok(())
    }

    fn apply(&mut self, x: &DVector<T>, y: &mut DVector<T>) -> Result<(), KError> {
        let a = self.matrix()?;
        relax(a, x, self.omega, self.sym | MatSorType::ZERO_INITIAL_GUESS, self.its, self.lits, y)
    }

    fn has_richardson(&self) -> bool {
        true
    }

    fn apply_richardson(
        &mut self,
        b: &DVector<T>,
        x: &mut DVector<T>,
        tol: &Tolerances<T>,
    ) -> Result<RichardsonOutcome, KError> {
        log::info!(
            "SOR Richardson: convergence criteria ignored, running {} sweeps",
            self.its * tol.max_its
        );
        let a = self.matrix()?;
        relax(a, b, self.omega, self.sym, self.its * tol.max_its, self.lits, x)?;
        Ok(RichardsonOutcome { its: tol.max_its, reason: ConvergedReason::ConvergedIts })
    }

    fn set_from_options(&mut self, db: &OptionsDb, prefix: &str) -> Result<(), KError> {
        let current = SorConfig {
            omega: self.omega.to_f64_lossy(),
            its: self.its,
            lits: self.lits,
            sweep: self.sweep(),
        };
        let cfg = SorConfig::from_options(db, prefix, current)?;
        self.omega = T::from_f64_lossy(cfg.omega);
        self.its = cfg.its;
        self.lits = cfg.lits;
        self.sym = cfg.sweep.flags();
        Ok(())
    }

    fn view(&self) -> String {
        format!("PC type: sor\n  {self}")
    }
}
