//! Clustering error types.

use thiserror::Error;

/// Errors raised while building or training a binary codebook.
///
/// Every variant is fatal for a training run: the pipeline aborts and the
/// caller re-runs with corrected parameters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("Invalid cluster count: requested {k} clusters from {n} vectors")]
    InvalidClusterCount { k: usize, n: usize },

    #[error("Dimension mismatch: expected {expected} bits, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Budget invariant violated: allocation sums to {got}, expected {expected}")]
    BudgetInvariantViolation { expected: usize, got: usize },

    #[error("Assembled codebook has {got} centroids, expected {expected}")]
    AssemblyLengthMismatch { expected: usize, got: usize },

    #[error("Index {index} out of range for set of {len} vectors")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Invalid dimension {0}: must be a positive multiple of 8")]
    InvalidDimension(usize),

    #[error("Invalid vector data: {0}")]
    InvalidData(String),

    #[error("Training set too large: {n} vectors, at most {max} supported")]
    TrainingSetTooLarge { n: usize, max: usize },

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Invalid index description: {0}")]
    InvalidDescription(String),
}

pub type ClusterResult<T> = Result<T, ClusterError>;
