//! Error types shared by the estimators in this crate.
use thiserror::Error;

/// Failure reported by an estimator operation.
///
/// Every variant is raised before the filter commits a new state, so a failed
/// `predict` or `update` always leaves the estimate at its last good value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EstimatorError {
    /// A vector or matrix length does not match the declared dimension, or a
    /// dimension exceeds its compile-time maximum.
    #[error("dimension error: {what} expected {expected}, got {actual}")]
    Dimension {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A matrix square root or inverse could not be computed, or the result
    /// was not finite.
    #[error("numerical error: {0}")]
    Numerical(&'static str),

    /// A model function produced a different number of values than required.
    #[error("model contract violation: expected {expected} outputs, got {actual}")]
    ContractViolation { expected: usize, actual: usize },

    /// A tuning parameter is out of range at construction.
    #[error("invalid parameter: {name} = {value}")]
    InvalidParameter { name: &'static str, value: f64 },
}

/// Result type for estimator operations
pub type Result<T> = std::result::Result<T, EstimatorError>;
