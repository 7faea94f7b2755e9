//! Core abstractions: scalar bound, operator trait, distributed vectors and scatters.

pub mod scatter;
pub mod traits;
pub mod vector;

pub use scatter::{ScatterInFlight, ScatterMode, VecScatter};
pub use traits::{LinearOperator, MatStructure, OperatorRef, Scalar};
pub use vector::{DVector, Layout, NormType};
