//! Solver and preconditioner contexts.
//!
//! - [`ksp_context`]: `KspContext`, the driver owning a Krylov method, its
//!   preconditioner, the operators and the convergence policy, and the
//!   `SolverKind` factory.
//! - [`pc_context`]: `PcType`, the preconditioner factory.
//!
//! # Example
//! ```rust,ignore
//! use kspmg::context::{KspContext, SolverKind};
//! use kspmg::preconditioner::PcType;
//! let mut ksp = KspContext::new(&comm, SolverKind::Cg)?;
//! ksp.set_pc_type(PcType::Jacobi)?;
//! ksp.set_operators(a.clone(), a, MatStructure::DifferentNonzeroPattern)?;
//! let stats = ksp.solve(&b, &mut x)?;
//! ```
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems. SIAM.
//! - PETSc documentation: https://petsc.org/release/docs/manualpages/KSP/

pub mod ksp_context;
pub use ksp_context::{KspContext, SolverKind};
pub mod pc_context;
pub use pc_context::PcType;
