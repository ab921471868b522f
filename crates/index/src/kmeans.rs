//! Binary k-means: bits are clustered as 0/1 real coordinates, then the
//! real-valued centroids are thresholded back to packed codes.

use crate::reporter::{IterationStats, NoopReporter, Reporter};
use bivf_core::codec::{accumulate_bits, decode_bits, encode_bits, majority_bits};
use bivf_core::distance::{hamming, l2_distance_squared};
use bivf_core::{BitVectorSet, ClusterError, ClusterResult, KMeansParams};
use rand::prelude::*;
use rand::seq::index::sample;
use rayon::prelude::*;

/// Relative perturbation applied when splitting a cluster to refill an empty one.
const SPLIT_EPS: f32 = 1.0 / 1024.0;

/// Result of a binary k-means run.
#[derive(Debug, Clone)]
pub struct KMeansResult {
    /// Binary centroids; index = cluster id.
    pub centroids: BitVectorSet<'static>,
    /// Number of assignment passes performed.
    pub iterations: usize,
    /// Whether assignments stopped changing before the iteration limit.
    pub converged: bool,
    /// Points assigned to each centroid in the last assignment pass over the
    /// training sample. Clusters refilled by a later split still count 0.
    pub centroid_frequency: Vec<usize>,
    /// Number of points actually used for training after subsampling.
    pub training_points: usize,
}

impl KMeansResult {
    /// Imbalance of the final assignment. 1.0 means perfectly balanced.
    pub fn imbalance_factor(&self) -> f64 {
        imbalance_factor(&self.centroid_frequency)
    }
}

/// `k * sum(h^2) / sum(h)^2` over a cluster-size histogram.
pub fn imbalance_factor(hist: &[usize]) -> f64 {
    let (mut tot, mut uf) = (0.0f64, 0.0f64);
    for &h in hist {
        let h = h as f64;
        tot += h;
        uf += h * h;
    }
    if tot == 0.0 {
        return 0.0;
    }
    uf * hist.len() as f64 / (tot * tot)
}

/// Clusters packed binary vectors into binary centroids.
#[derive(Debug, Clone, Default)]
pub struct BinaryKMeans {
    params: KMeansParams,
}

impl BinaryKMeans {
    pub fn new(params: KMeansParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &KMeansParams {
        &self.params
    }

    /// Cluster `vectors` into exactly `k` binary centroids.
    pub fn cluster(&self, vectors: &BitVectorSet<'_>, k: usize) -> ClusterResult<KMeansResult> {
        self.cluster_with_reporter(vectors, k, &NoopReporter)
    }

    /// Like [`cluster`](Self::cluster), reporting per-iteration statistics.
    pub fn cluster_with_reporter(
        &self,
        vectors: &BitVectorSet<'_>,
        k: usize,
        reporter: &dyn Reporter,
    ) -> ClusterResult<KMeansResult> {
        self.params.validate().map_err(ClusterError::InvalidParams)?;

        let n = vectors.len();
        if k == 0 || k > n {
            return Err(ClusterError::InvalidClusterCount { k, n });
        }

        if k == n {
            return Ok(KMeansResult {
                centroids: vectors.to_owned_set(),
                iterations: 0,
                converged: true,
                centroid_frequency: vec![1; n],
                training_points: n,
            });
        }

        if k == 1 {
            return majority_centroid(vectors);
        }

        self.lloyd(vectors, k, reporter)
    }

    fn lloyd(
        &self,
        vectors: &BitVectorSet<'_>,
        k: usize,
        reporter: &dyn Reporter,
    ) -> ClusterResult<KMeansResult> {
        let dim = vectors.dim();
        let n = vectors.len();
        let mut rng = StdRng::seed_from_u64(self.params.seed);

        // Subsample once; every iteration trains on the same points
        let max_points = self.params.max_points_per_centroid.saturating_mul(k);
        let sampled;
        let training: &BitVectorSet<'_> = if n > max_points {
            let mut indices = sample(&mut rng, n, max_points).into_vec();
            indices.sort_unstable();
            tracing::debug!("Sampling {} of {} points for {} clusters", max_points, n, k);
            sampled = vectors.subset(&indices)?;
            &sampled
        } else {
            vectors
        };
        let m = training.len();

        let mut centroids = vec![0.0f32; k * dim];
        for (ci, pi) in kmeans_plusplus_init(training, k, &mut rng).into_iter().enumerate() {
            decode_bits(training.get(pi), &mut centroids[ci * dim..(ci + 1) * dim]);
        }

        let mut assignments = vec![usize::MAX; m];
        let mut sizes = vec![0usize; k];
        let mut iterations = 0;
        let mut converged = false;

        for iter in 0..self.params.iterations {
            iterations = iter + 1;

            // Assign points to nearest centroid (parallel)
            let nearest: Vec<(usize, f32)> = training
                .par_iter()
                .map_init(
                    || vec![0.0f32; dim],
                    |buf, code| {
                        decode_bits(code, buf);
                        nearest_real_centroid(buf, &centroids, dim)
                    },
                )
                .collect();

            let changes = assignments
                .iter()
                .zip(nearest.iter())
                .filter(|(a, (b, _))| **a != *b)
                .count();
            let objective: f64 = nearest.iter().map(|&(_, d)| d as f64).sum();

            for (a, &(c, _)) in assignments.iter_mut().zip(nearest.iter()) {
                *a = c;
            }
            sizes.iter_mut().for_each(|s| *s = 0);
            for &a in &assignments {
                sizes[a] += 1;
            }

            let stats = IterationStats {
                iteration: iterations,
                changed: changes,
                objective,
                imbalance: imbalance_factor(&sizes),
            };
            tracing::debug!(
                "K-means iteration {}: {} changes ({:.2}%), objective {:.1}",
                stats.iteration,
                changes,
                changes as f64 * 100.0 / m as f64,
                objective
            );
            reporter.kmeans_iteration(&stats);

            if iter > 0 && changes == 0 {
                converged = true;
                break;
            }

            centroids = update_centroids(training, &assignments, k, dim);
            // Split bookkeeping stays local; `sizes` keeps the real counts
            let mut split_sizes = sizes.clone();
            split_empty_clusters(&mut centroids, &mut split_sizes, dim);
        }

        let mut codes = vec![0u8; k * vectors.code_size()];
        for (real, code) in centroids
            .chunks_exact(dim)
            .zip(codes.chunks_exact_mut(vectors.code_size()))
        {
            encode_bits(real, code);
        }

        Ok(KMeansResult {
            centroids: BitVectorSet::new(codes, dim)?,
            iterations,
            converged,
            centroid_frequency: sizes,
            training_points: m,
        })
    }
}

/// Nearest real centroid to a point; ties go to the lowest index.
#[inline]
fn nearest_real_centroid(point: &[f32], centroids: &[f32], dim: usize) -> (usize, f32) {
    let mut best_idx = 0;
    let mut best_dist = f32::MAX;
    for (i, c) in centroids.chunks_exact(dim).enumerate() {
        let dist = l2_distance_squared(point, c);
        if dist < best_dist {
            best_dist = dist;
            best_idx = i;
        }
    }
    (best_idx, best_dist)
}

/// K-means++ seeding over Hamming distance, which equals squared L2 on 0/1
/// coordinates. Returns the indices of the chosen training points.
fn kmeans_plusplus_init<R: Rng>(training: &BitVectorSet<'_>, k: usize, rng: &mut R) -> Vec<usize> {
    let n = training.len();
    let mut chosen = Vec::with_capacity(k);

    // Pick first centroid uniformly at random
    let first_idx = rng.gen_range(0..n);
    chosen.push(first_idx);

    let first = training.get(first_idx);
    let mut min_distances: Vec<u32> = training.par_iter().map(|v| hamming(v, first)).collect();

    for _ in 1..k {
        let total_dist: u64 = min_distances.iter().map(|&d| d as u64).sum();

        let chosen_idx = if total_dist == 0 {
            // All remaining points duplicate a chosen centroid
            rng.gen_range(0..n)
        } else {
            // Sample proportional to distance
            let threshold = rng.gen_range(0..total_dist);
            let mut cumsum = 0u64;
            let mut idx = n - 1;
            for (i, &dist) in min_distances.iter().enumerate() {
                cumsum += dist as u64;
                if cumsum > threshold {
                    idx = i;
                    break;
                }
            }
            idx
        };
        chosen.push(chosen_idx);

        let centroid = training.get(chosen_idx);
        min_distances
            .par_iter_mut()
            .zip(training.par_iter())
            .for_each(|(d, v)| *d = (*d).min(hamming(v, centroid)));
    }

    chosen
}

/// Recompute centroids as per-cluster means.
///
/// Bits are summed as exact integers per cluster, so the result does not
/// depend on how the work is split across threads.
fn update_centroids(
    training: &BitVectorSet<'_>,
    assignments: &[usize],
    k: usize,
    dim: usize,
) -> Vec<f32> {
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); k];
    for (i, &a) in assignments.iter().enumerate() {
        members[a].push(i);
    }

    let mut centroids = vec![0.0f32; k * dim];
    centroids
        .par_chunks_exact_mut(dim)
        .zip(members.par_iter())
        .for_each(|(centroid, members)| {
            if members.is_empty() {
                return;
            }
            let mut counts = vec![0u32; dim];
            for &i in members {
                accumulate_bits(&mut counts, training.get(i));
            }
            let inv = 1.0 / members.len() as f64;
            for (c, &count) in centroid.iter_mut().zip(counts.iter()) {
                *c = (count as f64 * inv) as f32;
            }
        });
    centroids
}

/// Refill each empty cluster by splitting the current largest one.
fn split_empty_clusters(centroids: &mut [f32], sizes: &mut [usize], dim: usize) {
    let k = sizes.len();
    for ci in 0..k {
        if sizes[ci] != 0 {
            continue;
        }
        let Some(cj) = largest_cluster(sizes) else {
            return;
        };
        if sizes[cj] < 2 {
            return;
        }

        let (src, dst) = (cj * dim, ci * dim);
        centroids.copy_within(src..src + dim, dst);
        for j in 0..dim {
            let (up, down) = if j % 2 == 0 {
                (dst + j, src + j)
            } else {
                (src + j, dst + j)
            };
            centroids[up] *= 1.0 + SPLIT_EPS;
            centroids[down] *= 1.0 - SPLIT_EPS;
        }

        sizes[ci] = sizes[cj] / 2;
        sizes[cj] -= sizes[ci];
        tracing::debug!("Split cluster {} to refill empty cluster {}", cj, ci);
    }
}

fn largest_cluster(sizes: &[usize]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, &s) in sizes.iter().enumerate() {
        match best {
            Some(b) if sizes[b] >= s => {}
            _ => best = Some(i),
        }
    }
    best
}

/// The 1-means optimum: the per-bit majority over every input vector.
fn majority_centroid(vectors: &BitVectorSet<'_>) -> ClusterResult<KMeansResult> {
    let dim = vectors.dim();
    let counts = vectors
        .par_iter()
        .fold(
            || vec![0u32; dim],
            |mut acc, code| {
                accumulate_bits(&mut acc, code);
                acc
            },
        )
        .reduce(
            || vec![0u32; dim],
            |mut a, b| {
                a.iter_mut().zip(b.iter()).for_each(|(x, y)| *x += y);
                a
            },
        );

    let mut code = vec![0u8; vectors.code_size()];
    majority_bits(&counts, vectors.len(), &mut code);

    Ok(KMeansResult {
        centroids: BitVectorSet::new(code, dim)?,
        iterations: 1,
        converged: true,
        centroid_frequency: vec![vectors.len()],
        training_points: vectors.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::nearest_centroid;

    /// `per_cluster` noisy copies of each center, flipping `noise_bits` random bits.
    fn make_clustered_codes(
        centers: &[Vec<u8>],
        per_cluster: usize,
        noise_bits: usize,
        seed: u64,
    ) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(seed);
        let dim = centers[0].len() * 8;
        let mut data = Vec::new();
        for center in centers {
            for _ in 0..per_cluster {
                let mut v = center.clone();
                for _ in 0..noise_bits {
                    let bit = rng.gen_range(0..dim);
                    v[bit / 8] ^= 1 << (bit % 8);
                }
                data.extend_from_slice(&v);
            }
        }
        data
    }

    #[test]
    fn test_two_obvious_clusters() {
        // First half 0x0000FFFF, second half 0xFFFF0000
        let mut x = vec![0u8; 16 * 4];
        for i in 0..8 {
            x[i * 4 + 2] = 0xFF;
            x[i * 4 + 3] = 0xFF;
        }
        for i in 8..16 {
            x[i * 4] = 0xFF;
            x[i * 4 + 1] = 0xFF;
        }
        let set = BitVectorSet::new(x, 32).unwrap();

        let result = BinaryKMeans::new(KMeansParams::new(50)).cluster(&set, 2).unwrap();
        let mut centroids: Vec<&[u8]> = result.centroids.iter().collect();
        centroids.sort();
        assert_eq!(centroids, vec![&[0, 0, 0xFF, 0xFF][..], &[0xFF, 0xFF, 0, 0][..]]);
        assert!(result.converged);
        assert_eq!(result.centroid_frequency, vec![8, 8]);
        assert!((result.imbalance_factor() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_returns_k_centroids_for_all_k() {
        let mut rng = StdRng::seed_from_u64(7);
        let data: Vec<u8> = (0..40 * 8).map(|_| rng.gen()).collect();
        let set = BitVectorSet::new(data, 64).unwrap();
        let kmeans = BinaryKMeans::new(KMeansParams::new(10).with_max_points_per_centroid(4));

        for k in 1..=set.len() {
            let result = kmeans.cluster(&set, k).unwrap();
            assert_eq!(result.centroids.len(), k, "k = {}", k);
            assert_eq!(result.centroids.dim(), 64);
            assert_eq!(result.centroid_frequency.len(), k);
        }
    }

    #[test]
    fn test_invalid_cluster_count() {
        let set = BitVectorSet::new(vec![0u8; 8 * 4], 32).unwrap();
        let kmeans = BinaryKMeans::default();
        assert_eq!(
            kmeans.cluster(&set, 0).unwrap_err(),
            ClusterError::InvalidClusterCount { k: 0, n: 8 }
        );
        assert_eq!(
            kmeans.cluster(&set, 9).unwrap_err(),
            ClusterError::InvalidClusterCount { k: 9, n: 8 }
        );
    }

    #[test]
    fn test_k_equals_n_reproduces_inputs() {
        // Mutually distant vectors: each byte pattern differs in many bits
        let patterns = [0x00u8, 0xFF, 0x0F, 0xF0, 0x33, 0xCC];
        let data: Vec<u8> = patterns.iter().flat_map(|&p| [p; 4]).collect();
        let set = BitVectorSet::new(data, 32).unwrap();

        let result = BinaryKMeans::default().cluster(&set, set.len()).unwrap();
        for v in set.iter() {
            assert!(result.centroids.iter().any(|c| c == v));
        }
    }

    #[test]
    fn test_single_cluster_is_majority_vector() {
        let set = BitVectorSet::new(vec![66u8; 8 * 4], 32).unwrap();
        let result = BinaryKMeans::default().cluster(&set, 1).unwrap();
        assert_eq!(result.centroids.as_bytes(), &[66u8; 4]);

        // Bit 0 set in 2 of 3 rows, bit 1 in 1 of 3
        let set = BitVectorSet::new(vec![0b01u8, 0b11, 0b00], 8).unwrap();
        let result = BinaryKMeans::default().cluster(&set, 1).unwrap();
        assert_eq!(result.centroids.as_bytes(), &[0b01]);

        // A 50/50 vote leaves the bit unset
        let set = BitVectorSet::new(vec![0b01u8, 0b00], 8).unwrap();
        let result = BinaryKMeans::default().cluster(&set, 1).unwrap();
        assert_eq!(result.centroids.as_bytes(), &[0b00]);
    }

    #[test]
    fn test_recovers_separated_centers() {
        let mut rng = StdRng::seed_from_u64(3);
        let centers: Vec<Vec<u8>> = (0..4)
            .map(|_| (0..8).map(|_| rng.gen()).collect())
            .collect();
        let data = make_clustered_codes(&centers, 50, 3, 11);
        let set = BitVectorSet::new(data, 64).unwrap();

        // Twice as many clusters as centers so every center gets at least one
        let result = BinaryKMeans::new(KMeansParams::new(25).with_seed(5))
            .cluster(&set, 8)
            .unwrap();
        for center in &centers {
            let (_, dist) = nearest_centroid(center, &result.centroids);
            assert!(dist <= 4, "center recovered with distance {}", dist);
        }
    }

    #[test]
    fn test_deterministic_with_seed() {
        let mut rng = StdRng::seed_from_u64(99);
        let data: Vec<u8> = (0..500 * 4).map(|_| rng.gen()).collect();
        let set = BitVectorSet::new(data, 32).unwrap();
        let kmeans = BinaryKMeans::new(KMeansParams::new(10).with_seed(42));

        let a = kmeans.cluster(&set, 16).unwrap();
        let b = kmeans.cluster(&set, 16).unwrap();
        assert_eq!(a.centroids, b.centroids);
        assert_eq!(a.centroid_frequency, b.centroid_frequency);
    }

    #[test]
    fn test_subsampling_caps_training_points() {
        let mut rng = StdRng::seed_from_u64(1);
        let data: Vec<u8> = (0..1000 * 4).map(|_| rng.gen()).collect();
        let set = BitVectorSet::new(data, 32).unwrap();

        let result = BinaryKMeans::new(KMeansParams::new(5).with_max_points_per_centroid(20))
            .cluster(&set, 10)
            .unwrap();
        assert_eq!(result.training_points, 200);
        assert_eq!(result.centroid_frequency.iter().sum::<usize>(), 200);
    }

    #[test]
    fn test_duplicate_heavy_input_still_returns_k() {
        // Only two distinct vectors but five clusters requested
        let mut data = vec![0u8; 20 * 2];
        for i in 0..10 {
            data[i * 2] = 0xFF;
        }
        let set = BitVectorSet::new(data, 16).unwrap();
        let result = BinaryKMeans::default().cluster(&set, 5).unwrap();
        assert_eq!(result.centroids.len(), 5);
        for c in result.centroids.iter() {
            let d = hamming(c, &[0xFF, 0]).min(hamming(c, &[0, 0]));
            assert_eq!(d, 0);
        }
    }

    #[test]
    fn test_frequency_counts_last_assignment() {
        // Two distinct vectors, five clusters: the last pass leaves three empty
        let mut data = vec![0u8; 20 * 2];
        for i in 0..10 {
            data[i * 2] = 0xFF;
        }
        let set = BitVectorSet::new(data, 16).unwrap();
        let result = BinaryKMeans::new(KMeansParams::new(1)).cluster(&set, 5).unwrap();

        assert_eq!(result.iterations, 1);
        assert_eq!(result.centroid_frequency, vec![10, 10, 0, 0, 0]);
        assert!((result.imbalance_factor() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_imbalance_factor() {
        assert!((imbalance_factor(&[5, 5, 5, 5]) - 1.0).abs() < 1e-9);
        assert!((imbalance_factor(&[20, 0, 0, 0]) - 4.0).abs() < 1e-9);
        assert_eq!(imbalance_factor(&[]), 0.0);
    }

    #[test]
    fn test_split_empty_clusters() {
        let mut centroids = vec![1.0f32, 1.0, 0.0, 0.0];
        let mut sizes = vec![6, 0];
        split_empty_clusters(&mut centroids, &mut sizes, 2);
        assert_eq!(sizes, vec![3, 3]);
        assert!(centroids[2] > 0.99 && centroids[3] > 0.99);
        assert_ne!(centroids[..2], centroids[2..]);
    }
}
