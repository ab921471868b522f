//! Progress reporting for codebook training.
//!
//! The trainer never prints on its own; it calls an injected [`Reporter`].
//! [`TracingReporter`] forwards everything to `tracing` with elapsed time,
//! [`NoopReporter`] discards it.

use serde::Serialize;
use std::fmt;
use std::time::Instant;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    CoarseClustered,
    Assigned,
    BudgetAllocated,
    PerPartitionTrained,
    Assembled,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Init => "init",
            Stage::CoarseClustered => "coarse clustered",
            Stage::Assigned => "assigned",
            Stage::BudgetAllocated => "budget allocated",
            Stage::PerPartitionTrained => "partitions trained",
            Stage::Assembled => "assembled",
            Stage::Done => "done",
        };
        write!(f, "{}", s)
    }
}

/// The training set is outside the recommended multiple of the codebook size.
///
/// Not an error: training proceeds, but quality or speed may suffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RatioWarning {
    pub training_vectors: usize,
    pub nlist: usize,
    pub min_vectors: usize,
    pub max_vectors: usize,
}

impl fmt::Display for RatioWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "training set of {} vectors is outside the recommended range {} - {} for {} centroids",
            self.training_vectors, self.min_vectors, self.max_vectors, self.nlist
        )
    }
}

/// Statistics for one k-means iteration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationStats {
    pub iteration: usize,
    /// Points whose assignment changed in this pass.
    pub changed: usize,
    /// Sum of squared distances to the assigned real centroid.
    pub objective: f64,
    pub imbalance: f64,
}

/// A fine partition finished training.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionProgress {
    pub partition: usize,
    pub num_partitions: usize,
    pub size: usize,
    pub budget: usize,
    pub imbalance: f64,
}

/// Observer for training progress. All methods default to no-ops.
///
/// Implementations must be `Sync`: fine partitions may report from worker
/// threads.
pub trait Reporter: Send + Sync {
    fn stage(&self, _stage: Stage, _detail: &str) {}

    fn ratio_warning(&self, _warning: &RatioWarning) {}

    fn kmeans_iteration(&self, _stats: &IterationStats) {}

    fn partition_trained(&self, _progress: &PartitionProgress) {}
}

/// Discards all progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl Reporter for NoopReporter {}

/// Logs progress through `tracing`, stamped with seconds since creation.
#[derive(Debug, Clone)]
pub struct TracingReporter {
    start: Instant,
}

impl TracingReporter {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    fn elapsed(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for TracingReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for TracingReporter {
    fn stage(&self, stage: Stage, detail: &str) {
        tracing::info!("[{:.2} s] {}: {}", self.elapsed(), stage, detail);
    }

    fn ratio_warning(&self, warning: &RatioWarning) {
        tracing::warn!("[{:.2} s] {}", self.elapsed(), warning);
    }

    fn kmeans_iteration(&self, stats: &IterationStats) {
        tracing::info!(
            "[{:.2} s] iteration {} - imbalance {:.2} | changed {} | objective {:.1}",
            self.elapsed(),
            stats.iteration,
            stats.imbalance,
            stats.changed,
            stats.objective
        );
    }

    fn partition_trained(&self, progress: &PartitionProgress) {
        tracing::debug!(
            "[{:.2} s] partition {}/{}: {} vectors -> {} centroids, imbalance {:.2}",
            self.elapsed(),
            progress.partition + 1,
            progress.num_partitions,
            progress.size,
            progress.budget,
            progress.imbalance
        );
    }
}
