//! Preconditioner selection.
//!
//! [`PcType`] names a preconditioning strategy together with its
//! configuration and builds the matching [`Preconditioner`] object. It is
//! what a [`KspContext`](crate::context::KspContext) records so that
//! derived solvers (multigrid up smoothers, option-driven rebuilds) can
//! create a fresh preconditioner of the same kind.
//!
//! # Supported Preconditioners
//!
//! - None: identity.
//! - Jacobi: diagonal scaling.
//! - Sor: successive over-relaxation, global or processor-local sweeps.
//! - Lu: dense LU of a single-rank operator.
//! - Redundant: any of the above on a replicated copy of the whole operator.
//! - Ksp: a full inner Krylov solve.
//! - Mg: geometric multigrid; levels, transfers and coarse operators are
//!   attached afterwards through [`Multigrid`].

use crate::config::OptionsDb;
use crate::context::ksp_context::{KspContext, SolverKind};
use crate::core::traits::Scalar;
use crate::error::KError;
use crate::parallel::{CommRef, SerialComm};
use crate::preconditioner::mg::{MgConfig, Multigrid};
use crate::preconditioner::{Identity, Jacobi, Lu, NestedKrylov, Preconditioner, Redundant, Sor, SorConfig};

/// Unified preconditioner configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum PcType {
    /// B = I
    None,
    Jacobi,
    Sor(SorConfig),
    Lu,
    /// Inner preconditioner applied to a copy of the operator replicated
    /// on every rank.
    Redundant(Box<PcType>),
    /// Inner Krylov solve; `use_true_operator` selects `amat` over `pmat`
    /// as the inner system.
    Ksp { kind: SolverKind, pc: Box<PcType>, use_true_operator: bool },
    Mg(MgConfig),
}

impl Default for PcType {
    fn default() -> Self {
        PcType::None
    }
}

impl PcType {
    pub fn name(&self) -> &'static str {
        match self {
            PcType::None => "none",
            PcType::Jacobi => "jacobi",
            PcType::Sor(_) => "sor",
            PcType::Lu => "lu",
            PcType::Redundant(_) => "redundant",
            PcType::Ksp { .. } => "ksp",
            PcType::Mg(_) => "mg",
        }
    }

    /// Default configuration of the strategy called `name`.
    pub fn from_name(name: &str) -> Result<Self, KError> {
        Ok(match name.to_ascii_lowercase().as_str() {
            "none" => PcType::None,
            "jacobi" => PcType::Jacobi,
            "sor" => PcType::Sor(SorConfig::default()),
            "lu" => PcType::Lu,
            "redundant" => PcType::Redundant(Box::new(PcType::Lu)),
            "ksp" => PcType::Ksp {
                kind: SolverKind::default(),
                pc: Box::new(PcType::None),
                use_true_operator: false,
            },
            "mg" => PcType::Mg(MgConfig::default()),
            other => return Err(KError::InvalidArgument(format!("unknown preconditioner type '{other}'"))),
        })
    }

    /// `{prefix}pc_type`, with `{prefix}pc_mg_levels` for multigrid.
    /// Strategy details are read later by
    /// [`Preconditioner::set_from_options`] on the built object.
    pub fn from_options(db: &OptionsDb, prefix: &str) -> Result<Option<Self>, KError> {
        let Some(name) = db.get_str(&format!("{prefix}pc_type")) else {
            return Ok(None);
        };
        let mut pc = Self::from_name(name)?;
        if let PcType::Mg(cfg) = &mut pc {
            cfg.levels = db.get_int(&format!("{prefix}pc_mg_levels"), cfg.levels)?;
        }
        Ok(Some(pc))
    }

    /// Build the preconditioner object; `comm` is the communicator of the
    /// operators it will be set up with.
    pub fn build<T: Scalar>(&self, comm: &CommRef) -> Result<Box<dyn Preconditioner<T>>, KError> {
        Ok(match self {
            PcType::None => Box::new(Identity),
            PcType::Jacobi => Box::new(Jacobi::<T>::new()),
            PcType::Sor(cfg) => Box::new(Sor::<T>::new(*cfg)?),
            PcType::Lu => Box::new(Lu::<T>::new()),
            PcType::Redundant(inner) => {
                let seq = SerialComm::shared();
                Box::new(Redundant::with_inner(inner.build::<T>(&seq)?))
            }
            PcType::Ksp { kind, pc, use_true_operator } => {
                let mut ksp = KspContext::new(comm, *kind)?;
                ksp.set_pc_type((**pc).clone())?;
                let mut nested = NestedKrylov::new(ksp);
                nested.set_use_true_operator(*use_true_operator);
                Box::new(nested)
            }
            PcType::Mg(cfg) => Box::new(Multigrid::from_config(cfg, comm)?),
        })
    }
}
