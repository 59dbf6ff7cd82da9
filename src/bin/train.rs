#![recursion_limit = "256"]
use anyhow::{Context, Result};
use burn::config::Config;
use burn::tensor::backend::AutodiffBackend;
use clap::Parser;
use stargan_burn::data::{AttributeFolderSource, Split};
use stargan_burn::device::{launch, BackendTask, ComputeDevice};
use stargan_burn::training::{OutputDirs, Solver, TrainingConfig, TrainingSummary};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(about = "Train a single-attribute StarGAN with Burn")]
struct Args {
    #[arg(long, default_value = "config.json")]
    config: PathBuf,
    /// Put logs, samples, models and results under this directory.
    #[arg(long)]
    experiment_dir: Option<PathBuf>,
    #[arg(long)]
    data_dir: Option<String>,
    #[arg(long)]
    attr_file: Option<String>,
    #[arg(long, value_enum, default_value_t = ComputeDevice::Cpu)]
    device: ComputeDevice,
    #[arg(long, conflicts_with = "resume_latest")]
    resume_iters: Option<usize>,
    /// Resume from the newest complete checkpoint pair, if any.
    #[arg(long, default_value_t = false)]
    resume_latest: bool,
}

struct TrainTask {
    config: TrainingConfig,
}

impl BackendTask for TrainTask {
    type Output = TrainingSummary;

    fn run<B: AutodiffBackend>(self, device: B::Device) -> Result<TrainingSummary> {
        let mut source = AttributeFolderSource::<B>::open(
            &self.config.data,
            Split::Train,
            self.config.model.image_size,
            self.config.batch_size,
            self.config.seed,
            &device,
        )?;
        info!("train images -> {}", source.len());

        let mut solver = Solver::<B>::new(self.config, device)?;
        let stop = solver.stop_handle();
        if let Err(err) = ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst)) {
            warn!("failed to install interrupt handler: {err}");
        }
        solver.train(&mut source)
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
    if args.resume_latest {
        config.resume_iters = config.checkpointer().latest_iteration();
        match config.resume_iters {
            Some(iteration) => info!("resuming from latest checkpoint {iteration}"),
            None => info!("no checkpoint found, starting from scratch"),
        }
    } else if args.resume_iters.is_some() {
        config.resume_iters = args.resume_iters;
    }

    let summary = launch(args.device, TrainTask { config })?;
    info!(
        "finished at iteration {} (started at {}), checkpoints: {:?}, g_lr: {}, d_lr: {}",
        summary.final_iteration, summary.start_iters, summary.checkpoints, summary.g_lr, summary.d_lr
    );
    if summary.interrupted {
        warn!("training was interrupted before num_iters");
    }
    Ok(())
}
