//! Two-level codebook training.
//!
//! The training set is first split into `nc1` coarse partitions. The codebook
//! budget is then divided across partitions in proportion to their size, each
//! partition is clustered independently, and the fine centroids are
//! concatenated in partition order into one flat codebook.
//!
//! ```text
//! Init -> CoarseClustered -> Assigned -> BudgetAllocated
//!      -> PerPartitionTrained -> Assembled -> Done
//! ```
//!
//! Any error aborts the run; a partial codebook is never returned.

use crate::budget::{allocate_budget, verify_budget};
use crate::kmeans::{imbalance_factor, BinaryKMeans, KMeansResult};
use crate::quantizer::Quantizer;
use crate::reporter::{PartitionProgress, RatioWarning, Reporter, Stage};
use crate::search::assign;
use bivf_core::{
    BitVectorSet, ClusterError, ClusterResult, Codebook, HierarchicalConfig, MAX_TRAINING_VECTORS,
};
use rayon::prelude::*;
use serde::Serialize;
use std::time::Instant;

/// Statistics of a finished training run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingSummary {
    pub training_vectors: usize,
    pub nlist: usize,
    pub coarse_clusters: usize,
    /// Training vectors per coarse partition.
    pub partition_sizes: Vec<usize>,
    /// Fine centroids per coarse partition.
    pub budgets: Vec<usize>,
    pub coarse_imbalance: f64,
    /// Imbalance over all fine clusters, measured on their training samples.
    pub fine_imbalance: f64,
    pub elapsed_secs: f64,
}

/// The trained codebook plus run statistics.
#[derive(Debug, Clone)]
pub struct HierarchicalOutput {
    pub codebook: Codebook,
    pub summary: TrainingSummary,
}

/// Trains a binary codebook with two-level k-means.
#[derive(Debug, Clone, Default)]
pub struct HierarchicalClusterer {
    config: HierarchicalConfig,
}

impl HierarchicalClusterer {
    pub fn new(config: HierarchicalConfig) -> ClusterResult<Self> {
        config.validate().map_err(ClusterError::InvalidParams)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &HierarchicalConfig {
        &self.config
    }

    /// Warning when `n` is outside the recommended multiple of `nlist`.
    pub fn check_training_ratio(&self, n: usize, nlist: usize) -> Option<RatioWarning> {
        let min_vectors = self.config.min_training_ratio.saturating_mul(nlist);
        let max_vectors = self.config.max_training_ratio.saturating_mul(nlist);
        if n < min_vectors || n > max_vectors {
            Some(RatioWarning {
                training_vectors: n,
                nlist,
                min_vectors,
                max_vectors,
            })
        } else {
            None
        }
    }

    /// Train a codebook of exactly `nlist` centroids.
    pub fn train(
        &self,
        vectors: &BitVectorSet<'_>,
        nlist: usize,
        reporter: &dyn Reporter,
    ) -> ClusterResult<HierarchicalOutput> {
        let output = self.build(vectors, nlist, reporter)?;
        reporter.stage(Stage::Done, "codebook ready");
        Ok(output)
    }

    /// Train a codebook of `nlist` centroids and install it into `quantizer`.
    ///
    /// The quantizer is checked before any clustering work starts.
    pub fn train_into<Q: Quantizer + ?Sized>(
        &self,
        vectors: &BitVectorSet<'_>,
        nlist: usize,
        quantizer: &mut Q,
        reporter: &dyn Reporter,
    ) -> ClusterResult<HierarchicalOutput> {
        if quantizer.is_trained() {
            return Err(ClusterError::InvalidParams(
                "quantizer has already been trained".into(),
            ));
        }
        if quantizer.dim() != vectors.dim() {
            return Err(ClusterError::DimensionMismatch {
                expected: quantizer.dim(),
                got: vectors.dim(),
            });
        }
        let output = self.build(vectors, nlist, reporter)?;
        quantizer.train(&output.codebook)?;
        reporter.stage(
            Stage::Done,
            &format!("quantizer trained with {} centroids", quantizer.nlist()),
        );
        Ok(output)
    }

    fn build(
        &self,
        vectors: &BitVectorSet<'_>,
        nlist: usize,
        reporter: &dyn Reporter,
    ) -> ClusterResult<HierarchicalOutput> {
        let start = Instant::now();
        let n = vectors.len();
        let dim = vectors.dim();

        if n > MAX_TRAINING_VECTORS {
            return Err(ClusterError::TrainingSetTooLarge {
                n,
                max: MAX_TRAINING_VECTORS,
            });
        }
        if nlist == 0 || nlist > n {
            return Err(ClusterError::InvalidClusterCount { k: nlist, n });
        }
        if let Some(warning) = self.check_training_ratio(n, nlist) {
            reporter.ratio_warning(&warning);
        }

        let nc1 = self.config.coarse_count(nlist);
        reporter.stage(
            Stage::Init,
            &format!(
                "two-level clustering of {} vectors ({} bits): {} coarse partitions, {} centroids",
                n, dim, nc1, nlist
            ),
        );

        // Coarse level
        let coarse = BinaryKMeans::new(self.config.coarse.clone())
            .cluster_with_reporter(vectors, nc1, reporter)?;
        reporter.stage(
            Stage::CoarseClustered,
            &format!(
                "{} coarse centroids after {} iterations, imbalance {:.2}",
                nc1,
                coarse.iterations,
                coarse.imbalance_factor()
            ),
        );

        let assignment = assign(vectors, &coarse.centroids)?;
        let sizes = assignment.partition_sizes();
        let coarse_imbalance = imbalance_factor(&sizes);
        reporter.stage(
            Stage::Assigned,
            &format!(
                "partition sizes {} - {}",
                sizes.iter().min().copied().unwrap_or(0),
                sizes.iter().max().copied().unwrap_or(0)
            ),
        );

        let budgets = allocate_budget(&sizes, nlist, self.config.allocation)?;
        verify_budget(&budgets, nlist)?;
        reporter.stage(
            Stage::BudgetAllocated,
            &format!(
                "fine centroids per partition {} - {}",
                budgets.iter().min().copied().unwrap_or(0),
                budgets.iter().max().copied().unwrap_or(0)
            ),
        );

        // Fine level
        let members = assignment.partition_members();
        let fine: Vec<Option<KMeansResult>> = if self.config.parallel_partitions {
            (0..nc1)
                .into_par_iter()
                .map(|c1| {
                    self.train_partition(vectors, (c1, nc1), &members[c1], budgets[c1], reporter)
                })
                .collect::<ClusterResult<_>>()?
        } else {
            (0..nc1)
                .map(|c1| {
                    self.train_partition(vectors, (c1, nc1), &members[c1], budgets[c1], reporter)
                })
                .collect::<ClusterResult<_>>()?
        };
        let trained = fine.iter().filter(|r| r.is_some()).count();
        reporter.stage(
            Stage::PerPartitionTrained,
            &format!("{} of {} partitions trained", trained, nc1),
        );

        // Assembly
        let results: Vec<&KMeansResult> = fine.iter().flatten().collect();
        let centroids = BitVectorSet::concat(dim, results.iter().map(|r| &r.centroids))?;
        if centroids.len() != nlist {
            return Err(ClusterError::AssemblyLengthMismatch {
                expected: nlist,
                got: centroids.len(),
            });
        }
        let frequency: Vec<usize> = results
            .iter()
            .flat_map(|r| r.centroid_frequency.iter().copied())
            .collect();
        let fine_imbalance = imbalance_factor(&frequency);
        reporter.stage(
            Stage::Assembled,
            &format!("{} centroids, fine imbalance {:.2}", nlist, fine_imbalance),
        );

        Ok(HierarchicalOutput {
            codebook: Codebook::from_set(centroids),
            summary: TrainingSummary {
                training_vectors: n,
                nlist,
                coarse_clusters: nc1,
                partition_sizes: sizes,
                budgets,
                coarse_imbalance,
                fine_imbalance,
                elapsed_secs: start.elapsed().as_secs_f64(),
            },
        })
    }

    /// Cluster one coarse partition into its share of fine centroids.
    ///
    /// Returns `None` for partitions that contribute nothing.
    fn train_partition(
        &self,
        vectors: &BitVectorSet<'_>,
        (c1, nc1): (usize, usize),
        members: &[usize],
        budget: usize,
        reporter: &dyn Reporter,
    ) -> ClusterResult<Option<KMeansResult>> {
        if budget == 0 || members.is_empty() {
            return Ok(None);
        }

        let subset = vectors.subset(members)?;
        let params = self
            .config
            .fine
            .clone()
            .with_seed(self.config.fine.seed.wrapping_add(c1 as u64));
        let result = BinaryKMeans::new(params).cluster(&subset, budget)?;

        reporter.partition_trained(&PartitionProgress {
            partition: c1,
            num_partitions: nc1,
            size: members.len(),
            budget,
            imbalance: result.imbalance_factor(),
        });
        Ok(Some(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantizer::FlatQuantizer;
    use crate::reporter::NoopReporter;
    use bivf_core::AllocationStrategy;
    use rand::prelude::*;
    use std::sync::Mutex;

    /// `n` points scattered around `centers` random codes, flipping each bit
    /// with probability `noise`.
    fn clustered(
        n: usize,
        dim: usize,
        centers: usize,
        noise: f64,
        seed: u64,
    ) -> BitVectorSet<'static> {
        let mut rng = StdRng::seed_from_u64(seed);
        let bytes = dim / 8;
        let protos: Vec<Vec<u8>> = (0..centers)
            .map(|_| (0..bytes).map(|_| rng.gen()).collect())
            .collect();
        let mut data = Vec::with_capacity(n * bytes);
        for i in 0..n {
            let proto = &protos[i % centers];
            for &b in proto {
                let mut flip = 0u8;
                for bit in 0..8 {
                    if rng.gen_bool(noise) {
                        flip |= 1 << bit;
                    }
                }
                data.push(b ^ flip);
            }
        }
        BitVectorSet::new(data, dim).unwrap()
    }

    #[derive(Default)]
    struct Recorder {
        stages: Mutex<Vec<Stage>>,
        warnings: Mutex<Vec<RatioWarning>>,
        partitions: Mutex<Vec<PartitionProgress>>,
    }

    impl Reporter for Recorder {
        fn stage(&self, stage: Stage, _detail: &str) {
            self.stages.lock().unwrap().push(stage);
        }

        fn ratio_warning(&self, warning: &RatioWarning) {
            self.warnings.lock().unwrap().push(warning.clone());
        }

        fn partition_trained(&self, progress: &PartitionProgress) {
            self.partitions.lock().unwrap().push(progress.clone());
        }
    }

    #[test]
    fn test_codebook_has_exact_size() {
        let vectors = clustered(2000, 64, 8, 0.05, 1);
        let clusterer = HierarchicalClusterer::default();
        for nlist in [1, 7, 16, 50] {
            let out = clusterer.train(&vectors, nlist, &NoopReporter).unwrap();
            assert_eq!(out.codebook.len(), nlist);
            assert_eq!(out.codebook.dim, 64);
            assert_eq!(out.summary.budgets.iter().sum::<usize>(), nlist);
            assert_eq!(out.summary.partition_sizes.iter().sum::<usize>(), 2000);
            assert_eq!(out.summary.coarse_clusters, clusterer.config().coarse_count(nlist));
        }
    }

    #[test]
    fn test_summary_serializes() {
        let vectors = clustered(300, 16, 3, 0.05, 13);
        let out = HierarchicalClusterer::default()
            .train(&vectors, 9, &NoopReporter)
            .unwrap();
        let json = serde_json::to_value(&out.summary).unwrap();
        assert_eq!(json["nlist"], 9);
        assert_eq!(json["coarse_clusters"], 3);
        assert_eq!(json["budgets"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_single_centroid_is_majority() {
        // 3 of 4 vectors have bit 0 set, 1 of 4 has bit 1 set
        let vectors = BitVectorSet::new(vec![0b01u8, 0b01, 0b11, 0b00], 8).unwrap();
        let out = HierarchicalClusterer::default()
            .train(&vectors, 1, &NoopReporter)
            .unwrap();
        assert_eq!(out.codebook.centroids, vec![0b01]);
        assert_eq!(out.summary.coarse_clusters, 1);
        assert_eq!(out.summary.budgets, vec![1]);

        // Bit 0 set in exactly half the vectors
        let vectors = BitVectorSet::new(vec![0b01u8, 0b00, 0b11, 0b10], 8).unwrap();
        let out = HierarchicalClusterer::default()
            .train(&vectors, 1, &NoopReporter)
            .unwrap();
        assert_eq!(out.codebook.centroids, vec![0b00]);
    }

    #[test]
    fn test_nlist_equal_to_n_returns_inputs() {
        let vectors = clustered(9, 16, 9, 0.0, 2);
        let out = HierarchicalClusterer::default()
            .train(&vectors, 9, &NoopReporter)
            .unwrap();
        let mut got: Vec<&[u8]> = (0..9).map(|i| out.codebook.get(i)).collect();
        let mut want: Vec<&[u8]> = vectors.iter().collect();
        got.sort();
        want.sort();
        assert_eq!(got, want);
    }

    #[test]
    fn test_invalid_nlist() {
        let vectors = clustered(10, 8, 2, 0.1, 3);
        let clusterer = HierarchicalClusterer::default();
        assert_eq!(
            clusterer.train(&vectors, 0, &NoopReporter).unwrap_err(),
            ClusterError::InvalidClusterCount { k: 0, n: 10 }
        );
        assert_eq!(
            clusterer.train(&vectors, 11, &NoopReporter).unwrap_err(),
            ClusterError::InvalidClusterCount { k: 11, n: 10 }
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = HierarchicalConfig::default();
        config.fine.iterations = 0;
        assert!(matches!(
            HierarchicalClusterer::new(config),
            Err(ClusterError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_ratio_warning() {
        let clusterer = HierarchicalClusterer::default();
        assert!(clusterer.check_training_ratio(30 * 64, 64).is_none());
        assert!(clusterer.check_training_ratio(256 * 64, 64).is_none());
        let low = clusterer.check_training_ratio(100, 64).unwrap();
        assert_eq!(low.min_vectors, 1920);
        assert_eq!(low.max_vectors, 16384);
        assert!(clusterer.check_training_ratio(256 * 64 + 1, 64).is_some());

        let vectors = clustered(200, 32, 4, 0.05, 4);
        let recorder = Recorder::default();
        clusterer.train(&vectors, 16, &recorder).unwrap();
        let warnings = recorder.warnings.lock().unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].training_vectors, 200);
    }

    #[test]
    fn test_stages_reported_in_order() {
        let vectors = clustered(1000, 32, 4, 0.05, 5);
        let recorder = Recorder::default();
        HierarchicalClusterer::default()
            .train(&vectors, 16, &recorder)
            .unwrap();
        assert_eq!(
            *recorder.stages.lock().unwrap(),
            vec![
                Stage::Init,
                Stage::CoarseClustered,
                Stage::Assigned,
                Stage::BudgetAllocated,
                Stage::PerPartitionTrained,
                Stage::Assembled,
                Stage::Done,
            ]
        );
    }

    #[test]
    fn test_zero_budget_partitions_are_skipped() {
        let vectors = clustered(40, 32, 4, 0.02, 6);
        let clusterer = HierarchicalClusterer::default();
        let recorder = Recorder::default();
        let members: Vec<usize> = (0..10).collect();

        let skipped = clusterer
            .train_partition(&vectors, (0, 4), &members, 0, &recorder)
            .unwrap();
        assert!(skipped.is_none());
        let empty = clusterer
            .train_partition(&vectors, (1, 4), &[], 3, &recorder)
            .unwrap();
        assert!(empty.is_none());
        assert!(recorder.partitions.lock().unwrap().is_empty());

        let trained = clusterer
            .train_partition(&vectors, (2, 4), &members, 3, &recorder)
            .unwrap()
            .unwrap();
        assert_eq!(trained.centroids.len(), 3);
        let progress = recorder.partitions.lock().unwrap();
        assert_eq!(progress.len(), 1);
        assert_eq!(progress[0].partition, 2);
        assert_eq!(progress[0].num_partitions, 4);
        assert_eq!(progress[0].size, 10);
    }

    #[test]
    fn test_budget_larger_than_partition_fails() {
        let vectors = clustered(40, 32, 4, 0.02, 7);
        let err = HierarchicalClusterer::default()
            .train_partition(&vectors, (0, 1), &[0, 1], 3, &NoopReporter)
            .unwrap_err();
        assert_eq!(err, ClusterError::InvalidClusterCount { k: 3, n: 2 });
    }

    #[test]
    fn test_explicit_coarse_count_is_clamped() {
        let vectors = clustered(400, 32, 4, 0.02, 12);
        let config = HierarchicalConfig::default().with_coarse_clusters(8);
        let out = HierarchicalClusterer::new(config)
            .unwrap()
            .train(&vectors, 3, &NoopReporter)
            .unwrap();
        assert_eq!(out.summary.coarse_clusters, 3);
        assert_eq!(out.codebook.len(), 3);
    }

    #[test]
    fn test_sequential_matches_parallel() {
        let vectors = clustered(1500, 64, 6, 0.05, 8);
        let parallel = HierarchicalClusterer::default()
            .train(&vectors, 25, &NoopReporter)
            .unwrap();
        let sequential = HierarchicalClusterer::new(HierarchicalConfig::default().sequential())
            .unwrap()
            .train(&vectors, 25, &NoopReporter)
            .unwrap();
        assert_eq!(parallel.codebook, sequential.codebook);
        assert_eq!(parallel.summary.budgets, sequential.summary.budgets);
    }

    #[test]
    fn test_deterministic_for_seed() {
        let vectors = clustered(1500, 64, 6, 0.05, 9);
        let config = HierarchicalConfig::default().with_seed(42);
        let a = HierarchicalClusterer::new(config.clone())
            .unwrap()
            .train(&vectors, 30, &NoopReporter)
            .unwrap();
        let b = HierarchicalClusterer::new(config)
            .unwrap()
            .train(&vectors, 30, &NoopReporter)
            .unwrap();
        assert_eq!(a.codebook, b.codebook);
    }

    #[test]
    fn test_cumulative_allocation() {
        let vectors = clustered(1200, 32, 4, 0.05, 10);
        let config = HierarchicalConfig::default().with_allocation(AllocationStrategy::Cumulative);
        let out = HierarchicalClusterer::new(config)
            .unwrap()
            .train(&vectors, 20, &NoopReporter)
            .unwrap();
        assert_eq!(out.codebook.len(), 20);
    }

    #[test]
    fn test_train_into_quantizer() {
        let vectors = clustered(800, 32, 4, 0.05, 11);
        let clusterer = HierarchicalClusterer::default();
        let mut quantizer = FlatQuantizer::new(32);
        let out = clusterer
            .train_into(&vectors, 16, &mut quantizer, &NoopReporter)
            .unwrap();
        assert!(quantizer.is_trained());
        assert_eq!(quantizer.nlist(), 16);
        assert_eq!(quantizer.codebook(), Some(&out.codebook));

        // A trained quantizer is not retrained
        assert!(matches!(
            clusterer.train_into(&vectors, 16, &mut quantizer, &NoopReporter),
            Err(ClusterError::InvalidParams(_))
        ));

        let mut wrong_dim = FlatQuantizer::new(64);
        assert_eq!(
            clusterer
                .train_into(&vectors, 16, &mut wrong_dim, &NoopReporter)
                .unwrap_err(),
            ClusterError::DimensionMismatch {
                expected: 64,
                got: 32
            }
        );
    }
}
