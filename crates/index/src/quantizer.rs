//! Quantizers built from a trained codebook.
//!
//! A [`Quantizer`] receives the assembled [`Codebook`] and routes vectors to
//! inverted-file buckets. Graph quantizers and on-disk containers live
//! outside this crate and plug in through the same trait.

use crate::search::{assign, batch_knn_hamming, Assignment, Neighbor};
use bivf_core::{BitVectorSet, ClusterError, ClusterResult, Codebook};

/// Routes binary vectors to their nearest codebook centroids.
pub trait Quantizer {
    /// Install a trained codebook.
    fn train(&mut self, codebook: &Codebook) -> ClusterResult<()>;

    fn is_trained(&self) -> bool;

    /// Number of buckets, i.e. codebook size. 0 until trained.
    fn nlist(&self) -> usize;

    /// Bits per vector.
    fn dim(&self) -> usize;

    /// The `k` nearest buckets for each query.
    fn search(&self, queries: &BitVectorSet<'_>, k: usize) -> ClusterResult<Vec<Vec<Neighbor>>>;
}

/// Exact brute-force quantizer over the codebook centroids.
#[derive(Debug, Clone)]
pub struct FlatQuantizer {
    dim: usize,
    codebook: Option<Codebook>,
}

impl FlatQuantizer {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            codebook: None,
        }
    }

    pub fn codebook(&self) -> Option<&Codebook> {
        self.codebook.as_ref()
    }

    /// Nearest bucket for every vector.
    pub fn assign(&self, vectors: &BitVectorSet<'_>) -> ClusterResult<Assignment> {
        assign(vectors, &self.centroids()?)
    }

    fn centroids(&self) -> ClusterResult<BitVectorSet<'_>> {
        self.codebook
            .as_ref()
            .ok_or_else(|| ClusterError::InvalidParams("quantizer is not trained".into()))?
            .as_set()
    }
}

impl Quantizer for FlatQuantizer {
    fn train(&mut self, codebook: &Codebook) -> ClusterResult<()> {
        if self.codebook.is_some() {
            return Err(ClusterError::InvalidParams(
                "quantizer has already been trained".into(),
            ));
        }
        if codebook.dim != self.dim {
            return Err(ClusterError::DimensionMismatch {
                expected: self.dim,
                got: codebook.dim,
            });
        }
        if codebook.is_empty() {
            return Err(ClusterError::InvalidClusterCount { k: 0, n: 0 });
        }
        self.codebook = Some(codebook.clone());
        Ok(())
    }

    fn is_trained(&self) -> bool {
        self.codebook.is_some()
    }

    fn nlist(&self) -> usize {
        self.codebook.as_ref().map_or(0, Codebook::len)
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn search(&self, queries: &BitVectorSet<'_>, k: usize) -> ClusterResult<Vec<Vec<Neighbor>>> {
        batch_knn_hamming(queries, &self.centroids()?, k)
    }
}
