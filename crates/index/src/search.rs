//! Exact Hamming nearest-neighbor search and partition assignment.

use bivf_core::distance::hamming;
use bivf_core::{BitVectorSet, ClusterError, ClusterResult};
use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A search result: position in the searched set and its Hamming distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Neighbor {
    pub index: usize,
    pub distance: u32,
}

impl Neighbor {
    pub fn new(index: usize, distance: u32) -> Self {
        Self { index, distance }
    }
}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbor {
    /// Larger distances are "greater"; equal distances order by index, so a
    /// max-heap evicts the highest index first and ties favor low indices.
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .cmp(&other.distance)
            .then_with(|| self.index.cmp(&other.index))
    }
}

/// Nearest code in `centroids` to `query`; ties go to the lowest index.
///
/// `centroids` must be non-empty and share the query's code size.
#[inline]
pub(crate) fn nearest_centroid(query: &[u8], centroids: &BitVectorSet<'_>) -> (usize, u32) {
    let mut best_idx = 0;
    let mut best_dist = u32::MAX;
    for (i, c) in centroids.iter().enumerate() {
        let dist = hamming(query, c);
        if dist < best_dist {
            best_dist = dist;
            best_idx = i;
        }
    }
    (best_idx, best_dist)
}

/// Exact top-k search of `query` over `base`, sorted by (distance, index).
///
/// `query` must be one packed code of `base.dim()` bits.
pub fn knn_hamming(
    query: &[u8],
    base: &BitVectorSet<'_>,
    k: usize,
) -> ClusterResult<Vec<Neighbor>> {
    if query.len() != base.code_size() {
        return Err(ClusterError::DimensionMismatch {
            expected: base.dim(),
            got: query.len() * 8,
        });
    }
    Ok(top_k(query, base, k))
}

fn top_k(query: &[u8], base: &BitVectorSet<'_>, k: usize) -> Vec<Neighbor> {
    if k == 0 || base.is_empty() {
        return Vec::new();
    }

    let mut heap: BinaryHeap<Neighbor> = BinaryHeap::with_capacity(k + 1);
    for (i, v) in base.iter().enumerate() {
        let candidate = Neighbor::new(i, hamming(query, v));
        if heap.len() < k {
            heap.push(candidate);
        } else if let Some(worst) = heap.peek() {
            if candidate < *worst {
                heap.pop();
                heap.push(candidate);
            }
        }
    }

    heap.into_sorted_vec()
}

/// Top-k search for every row of `queries` (parallel over queries).
pub fn batch_knn_hamming(
    queries: &BitVectorSet<'_>,
    base: &BitVectorSet<'_>,
    k: usize,
) -> ClusterResult<Vec<Vec<Neighbor>>> {
    check_dims(queries, base)?;
    Ok(queries
        .par_iter()
        .map(|q| top_k(q, base, k))
        .collect())
}

fn check_dims(vectors: &BitVectorSet<'_>, centroids: &BitVectorSet<'_>) -> ClusterResult<()> {
    if vectors.dim() != centroids.dim() {
        return Err(ClusterError::DimensionMismatch {
            expected: centroids.dim(),
            got: vectors.dim(),
        });
    }
    Ok(())
}

/// Nearest-partition label for every training vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    labels: Vec<usize>,
    distances: Vec<u32>,
    num_partitions: usize,
}

impl Assignment {
    /// Partition id per vector, each in `0..num_partitions()`.
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Hamming distance of each vector to its partition centroid.
    pub fn distances(&self) -> &[u32] {
        &self.distances
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    /// Number of vectors in each partition. Sums to `len()`.
    pub fn partition_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0usize; self.num_partitions];
        for &label in &self.labels {
            sizes[label] += 1;
        }
        sizes
    }

    /// Vector indices of each partition, ascending.
    pub fn partition_members(&self) -> Vec<Vec<usize>> {
        let mut members: Vec<Vec<usize>> = self
            .partition_sizes()
            .into_iter()
            .map(Vec::with_capacity)
            .collect();
        for (i, &label) in self.labels.iter().enumerate() {
            members[label].push(i);
        }
        members
    }

    /// Sum of distances to the assigned centroids.
    pub fn total_distance(&self) -> u64 {
        self.distances.iter().map(|&d| d as u64).sum()
    }
}

/// Assign every vector to its nearest centroid under Hamming distance.
///
/// Exact brute force, parallel over vectors. Ties go to the lowest centroid
/// index.
pub fn assign(
    vectors: &BitVectorSet<'_>,
    centroids: &BitVectorSet<'_>,
) -> ClusterResult<Assignment> {
    check_dims(vectors, centroids)?;
    if centroids.is_empty() {
        return Err(ClusterError::InvalidClusterCount {
            k: 0,
            n: vectors.len(),
        });
    }

    let (labels, distances): (Vec<usize>, Vec<u32>) = vectors
        .par_iter()
        .map(|v| nearest_centroid(v, centroids))
        .unzip();

    Ok(Assignment {
        labels,
        distances,
        num_partitions: centroids.len(),
    })
}
