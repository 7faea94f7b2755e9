use thiserror::Error;

// Unified error type for kspmg

#[derive(Error, Debug, Clone, PartialEq)]
pub enum KError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("object in wrong state: {0}")]
    WrongState(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("factorization error: {0}")]
    FactorError(String),
    #[error("zero pivot at row {0}")]
    ZeroPivot(usize),
    #[error("communication failure: {0}")]
    Communication(String),
}

impl KError {
    /// True for failures raised by the arithmetic itself rather than by misuse.
    pub fn is_numerical(&self) -> bool {
        matches!(self, KError::FactorError(_) | KError::ZeroPivot(_))
    }
}
