#![recursion_limit = "256"]
use anyhow::{Context, Result};
use burn::config::Config;
use burn::tensor::backend::AutodiffBackend;
use clap::Parser;
use stargan_burn::device::{launch, BackendTask, ComputeDevice};
use stargan_burn::inference::{evaluate, RankingReport};
use stargan_burn::training::{OutputDirs, TrainingConfig};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(about = "Translate the test split and rank results by reconstruction error")]
struct Args {
    #[arg(long, default_value = "config.json")]
    config: PathBuf,
    #[arg(long)]
    experiment_dir: Option<PathBuf>,
    #[arg(long)]
    data_dir: Option<String>,
    #[arg(long)]
    attr_file: Option<String>,
    #[arg(long, value_enum, default_value_t = ComputeDevice::Cpu)]
    device: ComputeDevice,
    /// Checkpoint iteration to evaluate.
    #[arg(long)]
    test_iters: Option<usize>,
    #[arg(long)]
    top_k: Option<usize>,
}

struct InferTask {
    config: TrainingConfig,
}

impl BackendTask for InferTask {
    type Output = RankingReport;

    fn run<B: AutodiffBackend>(self, device: B::Device) -> Result<RankingReport> {
        evaluate::<B::InnerBackend>(&self.config, &device)
    }
}

fn main() -> Result<()> {
    stargan_burn::init_logging();
    let args = Args::parse();
    let mut config = TrainingConfig::load(&args.config)
        .with_context(|| format!("failed to load config from {}", args.config.display()))?;

    if let Some(dir) = &args.experiment_dir {
        config.dirs = OutputDirs::under(dir);
    }
    if let Some(data_dir) = args.data_dir {
        config.data.image_dir = data_dir;
    }
    if let Some(attr_file) = args.attr_file {
        config.data.attr_path = attr_file;
    }
    if let Some(test_iters) = args.test_iters {
        config.test_iters = test_iters;
    }
    if let Some(top_k) = args.top_k {
        config.top_k = top_k;
    }

    let report = launch(args.device, InferTask { config })?;
    info!(
        "scored {} images; best {:?}; worst {:?}",
        report.scored.len(),
        report.best.iter().map(|s| s.index + 1).collect::<Vec<_>>(),
        report.worst.iter().map(|s| s.index + 1).collect::<Vec<_>>()
    );
    Ok(())
}
