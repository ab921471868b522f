//! Storage layer for bivf codebook training.
//!
//! Memory-mapped training sets and `.npy` codebook files.

pub mod codebook;
pub mod error;
pub mod vectors;

pub use codebook::{read_codebook_npy, write_codebook_npy};
pub use error::{StorageError, StorageResult};
pub use vectors::MmapVectors;
