//! Storage error types.

use bivf_core::ClusterError;
use thiserror::Error;

/// Storage-related errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read .npy file: {0}")]
    ReadNpy(#[from] ndarray_npy::ReadNpyError),

    #[error("Failed to view .npy file: {0}")]
    ViewNpy(#[from] ndarray_npy::ViewNpyError),

    #[error("Failed to write .npy file: {0}")]
    WriteNpy(#[from] ndarray_npy::WriteNpyError),

    #[error("Unsupported array layout: {0}")]
    Layout(String),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

pub type StorageResult<T> = Result<T, StorageError>;
