//! Training configuration types.

use crate::error::{ClusterError, ClusterResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Largest training set accepted by the two-level trainer.
pub const MAX_TRAINING_VECTORS: usize = i32::MAX as usize;

/// Parameters for a single binary k-means run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KMeansParams {
    /// Maximum number of Lloyd iterations.
    pub iterations: usize,

    /// The input is subsampled to at most `max_points_per_centroid * k`
    /// points before training.
    pub max_points_per_centroid: usize,

    /// Random seed for sampling and initialization.
    pub seed: u64,
}

impl KMeansParams {
    /// Create parameters with the given iteration count.
    pub fn new(iterations: usize) -> Self {
        Self {
            iterations,
            ..Default::default()
        }
    }

    /// Set the maximum number of iterations.
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// Set the subsampling cap.
    pub fn with_max_points_per_centroid(mut self, max_points: usize) -> Self {
        self.max_points_per_centroid = max_points;
        self
    }

    /// Set the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Validate parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.iterations == 0 {
            return Err("iterations must be > 0".to_string());
        }
        if self.max_points_per_centroid == 0 {
            return Err("max_points_per_centroid must be > 0".to_string());
        }
        Ok(())
    }
}

impl Default for KMeansParams {
    fn default() -> Self {
        Self {
            iterations: 25,
            max_points_per_centroid: 256,
            seed: 1234,
        }
    }
}

/// How the fine-centroid budget is split across coarse partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStrategy {
    /// Floor of each partition's quota, leftover units to the largest
    /// remainders. Monotonic in partition size.
    #[default]
    LargestRemainder,

    /// Floor-scaled cumulative sizes, then successive differences.
    Cumulative,
}

/// Configuration for two-level codebook training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchicalConfig {
    /// Number of coarse partitions. `None` means `round(sqrt(nlist))`.
    #[serde(default)]
    pub coarse_clusters: Option<usize>,

    /// k-means parameters for the coarse level.
    #[serde(default = "default_coarse_params")]
    pub coarse: KMeansParams,

    /// k-means parameters for each fine partition. The seed is offset by the
    /// partition index.
    #[serde(default)]
    pub fine: KMeansParams,

    /// Budget allocation strategy.
    #[serde(default)]
    pub allocation: AllocationStrategy,

    /// Lower bound of the recommended `n / nlist` ratio.
    #[serde(default = "default_min_ratio")]
    pub min_training_ratio: usize,

    /// Upper bound of the recommended `n / nlist` ratio.
    #[serde(default = "default_max_ratio")]
    pub max_training_ratio: usize,

    /// Train fine partitions concurrently.
    #[serde(default = "default_true")]
    pub parallel_partitions: bool,
}

fn default_coarse_params() -> KMeansParams {
    KMeansParams {
        iterations: 25,
        max_points_per_centroid: 2000,
        ..Default::default()
    }
}

fn default_min_ratio() -> usize {
    30
}

fn default_max_ratio() -> usize {
    256
}

fn default_true() -> bool {
    true
}

impl HierarchicalConfig {
    /// Set an explicit coarse partition count.
    pub fn with_coarse_clusters(mut self, nc1: usize) -> Self {
        self.coarse_clusters = Some(nc1);
        self
    }

    /// Set the seed for both levels.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.coarse.seed = seed;
        self.fine.seed = seed;
        self
    }

    /// Set the allocation strategy.
    pub fn with_allocation(mut self, allocation: AllocationStrategy) -> Self {
        self.allocation = allocation;
        self
    }

    /// Train partitions one after another.
    pub fn sequential(mut self) -> Self {
        self.parallel_partitions = false;
        self
    }

    /// Coarse partition count for a given total centroid count.
    pub fn coarse_count(&self, nlist: usize) -> usize {
        let nc1 = self
            .coarse_clusters
            .unwrap_or_else(|| (nlist as f64).sqrt().round() as usize);
        nc1.clamp(1, nlist.max(1))
    }

    /// Validate parameters.
    pub fn validate(&self) -> Result<(), String> {
        self.coarse.validate().map_err(|e| format!("coarse: {}", e))?;
        self.fine.validate().map_err(|e| format!("fine: {}", e))?;
        if self.coarse_clusters == Some(0) {
            return Err("coarse_clusters must be > 0".to_string());
        }
        if self.min_training_ratio > self.max_training_ratio {
            return Err(format!(
                "min_training_ratio {} exceeds max_training_ratio {}",
                self.min_training_ratio, self.max_training_ratio
            ));
        }
        Ok(())
    }
}

impl Default for HierarchicalConfig {
    fn default() -> Self {
        Self {
            coarse_clusters: None,
            coarse: default_coarse_params(),
            fine: KMeansParams::default(),
            allocation: AllocationStrategy::default(),
            min_training_ratio: default_min_ratio(),
            max_training_ratio: default_max_ratio(),
            parallel_partitions: true,
        }
    }
}

/// Quantizer structure named by an index description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum QuantizerKind {
    /// Brute-force search over the centroids.
    Flat,
    /// Graph quantizer with `m` links per node.
    Hnsw { m: usize },
}

/// A parsed index description such as `BIVF65536_HNSW32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescription {
    /// Number of inverted lists, i.e. the codebook size.
    pub nlist: usize,
    /// Quantizer over the codebook.
    pub quantizer: QuantizerKind,
}

impl IndexDescription {
    pub fn parse(s: &str) -> ClusterResult<Self> {
        let invalid = || ClusterError::InvalidDescription(s.to_string());
        let mut parts = s.trim().split('_');

        let head = parts.next().ok_or_else(invalid)?;
        let nlist = head
            .strip_prefix("BIVF")
            .ok_or_else(invalid)?
            .parse::<usize>()
            .map_err(|_| invalid())?;
        if nlist == 0 {
            return Err(invalid());
        }

        let quantizer = match parts.next() {
            None | Some("Flat") | Some("FLAT") => QuantizerKind::Flat,
            Some(q) => {
                let m = q
                    .strip_prefix("HNSW")
                    .ok_or_else(invalid)?
                    .parse::<usize>()
                    .map_err(|_| invalid())?;
                QuantizerKind::Hnsw { m }
            }
        };

        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self { nlist, quantizer })
    }
}

impl FromStr for IndexDescription {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for IndexDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.quantizer {
            QuantizerKind::Flat => write!(f, "BIVF{}", self.nlist),
            QuantizerKind::Hnsw { m } => write!(f, "BIVF{}_HNSW{}", self.nlist, m),
        }
    }
}
