//! kspmg: PETSc-style KSP/PC stack with geometric multigrid
//!
//! Krylov solvers (GMRES with classical or modified Gram-Schmidt, FGMRES,
//! CG, Richardson, PreOnly) behind a common driver, composable
//! preconditioners (SOR, LU, Jacobi, redundant, nested Krylov, multigrid)
//! and distributed vectors and sparse matrices over a small communicator
//! abstraction (serial, in-process threads, or MPI).

pub mod parallel;

pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod matrix;
pub mod preconditioner;
pub mod solver;
pub mod utils;

// Re-exports for convenience
pub use config::*;
pub use context::*;
pub use core::*;
pub use error::*;
pub use matrix::*;
pub use preconditioner::*;
pub use solver::*;
pub use utils::*;

// Re-export SolveStats at the crate root for convenience
pub use utils::convergence::SolveStats;
