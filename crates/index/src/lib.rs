//! Codebook training for binary inverted-file indexes.
//!
//! Implements:
//! - Binary k-means over packed bit vectors
//! - Proportional budget allocation across coarse partitions
//! - Two-level (hierarchical) codebook training
//! - Exact Hamming assignment and flat quantization

pub mod budget;
pub mod hierarchical;
pub mod kmeans;
pub mod quantizer;
pub mod reporter;
pub mod search;

pub use budget::{allocate_budget, verify_budget};
pub use hierarchical::{HierarchicalClusterer, HierarchicalOutput, TrainingSummary};
pub use kmeans::{imbalance_factor, BinaryKMeans, KMeansResult};
pub use quantizer::{FlatQuantizer, Quantizer};
pub use reporter::{
    IterationStats, NoopReporter, PartitionProgress, RatioWarning, Reporter, Stage,
    TracingReporter,
};
pub use search::{assign, batch_knn_hamming, knn_hamming, Assignment, Neighbor};
