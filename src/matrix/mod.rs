//! Matrix module: distributed sparse and sequential dense operators.

pub mod dense;
pub use dense::DenseMatrix;
pub mod sparse;
pub use sparse::CsrMatrix;
