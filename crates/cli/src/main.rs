//! bivf codebook trainer.
//!
//! Trains a binary IVF codebook from a memory-mapped training set and writes
//! it as a `.npy` array.

use anyhow::{bail, Context, Result};
use bivf_core::{AllocationStrategy, HierarchicalConfig, IndexDescription, QuantizerKind};
use bivf_index::{FlatQuantizer, HierarchicalClusterer, Quantizer, TracingReporter};
use bivf_storage::{write_codebook_npy, MmapVectors};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "bivf-train")]
#[command(about = "Train a binary IVF codebook with two-level k-means")]
struct Args {
    /// Training vectors: a (n, dim/8) uint8 .npy file, or raw packed codes with --dim
    training_file: PathBuf,

    /// Output path for the (nlist, dim/8) uint8 codebook
    #[arg(long, short)]
    output: PathBuf,

    /// Index description, e.g. BIVF65536 or BIVF65536_HNSW32
    #[arg(long, conflicts_with = "nlist")]
    index: Option<String>,

    /// Number of centroids
    #[arg(long, required_unless_present = "index")]
    nlist: Option<usize>,

    /// Bits per vector; treats the training file as raw packed codes
    #[arg(long)]
    dim: Option<usize>,

    /// JSON file with a full training configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Random seed for both levels
    #[arg(long)]
    seed: Option<u64>,

    /// Number of coarse partitions (default: round(sqrt(nlist)))
    #[arg(long)]
    coarse_clusters: Option<usize>,

    /// Budget allocation strategy
    #[arg(long, value_enum)]
    allocation: Option<Allocation>,

    /// Train fine partitions one at a time
    #[arg(long)]
    sequential: bool,

    /// Write the training summary as JSON
    #[arg(long)]
    summary: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Allocation {
    LargestRemainder,
    Cumulative,
}

impl From<Allocation> for AllocationStrategy {
    fn from(a: Allocation) -> Self {
        match a {
            Allocation::LargestRemainder => AllocationStrategy::LargestRemainder,
            Allocation::Cumulative => AllocationStrategy::Cumulative,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bivf_train=info,bivf_index=info,bivf_storage=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let description = match (&args.index, args.nlist) {
        (Some(desc), _) => IndexDescription::parse(desc)
            .with_context(|| format!("Invalid index description: {}", desc))?,
        (None, Some(nlist)) => IndexDescription {
            nlist,
            quantizer: QuantizerKind::Flat,
        },
        (None, None) => bail!("either --index or --nlist is required"),
    };
    if let QuantizerKind::Hnsw { m } = description.quantizer {
        tracing::warn!(
            "HNSW{} quantizer is not built by this tool; training a flat codebook",
            m
        );
    }

    let config = build_config(&args)?;
    let clusterer = HierarchicalClusterer::new(config).context("Invalid training configuration")?;

    let mapped = match args.dim {
        Some(dim) => MmapVectors::open_raw(&args.training_file, dim),
        None => MmapVectors::open_npy(&args.training_file),
    }
    .with_context(|| format!("Failed to open training file: {:?}", args.training_file))?;
    let vectors = mapped.vectors()?;
    tracing::info!(
        "Loaded {} vectors of {} bits from {:?}",
        vectors.len(),
        vectors.dim(),
        args.training_file
    );

    let reporter = TracingReporter::new();
    let mut quantizer = FlatQuantizer::new(vectors.dim());
    let output = clusterer
        .train_into(&vectors, description.nlist, &mut quantizer, &reporter)
        .with_context(|| format!("Failed to train {}", description))?;

    let codebook = quantizer
        .codebook()
        .context("Quantizer holds no codebook after training")?;
    write_codebook_npy(&args.output, codebook)
        .with_context(|| format!("Failed to write codebook: {:?}", args.output))?;

    if let Some(path) = &args.summary {
        let json = serde_json::to_string_pretty(&output.summary)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write summary: {:?}", path))?;
    }

    tracing::info!(
        "Trained {} centroids in {:.2} s (coarse imbalance {:.2}, fine imbalance {:.2})",
        quantizer.nlist(),
        output.summary.elapsed_secs,
        output.summary.coarse_imbalance,
        output.summary.fine_imbalance
    );

    Ok(())
}

/// Configuration file first, then command-line overrides.
fn build_config(args: &Args) -> Result<HierarchicalConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {:?}", path))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse config: {:?}", path))?
        }
        None => HierarchicalConfig::default(),
    };

    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }
    if let Some(nc1) = args.coarse_clusters {
        config = config.with_coarse_clusters(nc1);
    }
    if let Some(allocation) = args.allocation {
        config = config.with_allocation(allocation.into());
    }
    if args.sequential {
        config = config.sequential();
    }
    Ok(config)
}
