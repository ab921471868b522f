//! Core types for bivf: packed binary vector sets, distance kernels,
//! bit codecs, training configuration and errors.

pub mod codec;
pub mod config;
pub mod distance;
pub mod error;
pub mod types;

pub use codec::{accumulate_bits, decode_bits, encode_bits, majority_bits, BINARIZE_THRESHOLD};
pub use config::{
    AllocationStrategy, HierarchicalConfig, IndexDescription, KMeansParams, QuantizerKind,
    MAX_TRAINING_VECTORS,
};
pub use distance::{hamming, l2_distance_squared};
pub use error::{ClusterError, ClusterResult};
pub use types::{BitVectorSet, Codebook};
