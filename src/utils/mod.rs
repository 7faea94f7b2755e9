//! Solver utilities.

pub mod convergence;
pub use convergence::{
    ConvergedReason, Convergence, ConvergenceContext, ConvergenceTest, DefaultConvergence, SkipConvergence,
    SolveStats, Tolerances,
};
