use crate::checkpoint::Checkpointer;
use crate::data::{Batch, DataConfig, DataSource};
use crate::error::{SolverError, SolverResult};
use crate::labels::AttributeLabeler;
use crate::losses::{discriminator_losses, generator_losses, LossRecord, LossWeights, StepInputs};
use crate::model::{Discriminator, Generator, ImageTranslator, ModelConfig};
use crate::optim::{adam_config, GanOptimizer};
use crate::schedule::{
    format_elapsed, LearningRates, MetricsBuffer, ScheduleConfig, Scheduler, LOSS_HISTORY_FILE,
};
use crate::utils::save_translation_grid;
use anyhow::{Context, Result};
use burn::config::Config;
use burn::module::AutodiffModule;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Directories for logs, sample grids, checkpoints and evaluation results.
#[derive(Config, Debug)]
pub struct OutputDirs {
    pub log_dir: String,
    pub sample_dir: String,
    pub model_save_dir: String,
    pub result_dir: String,
}

impl OutputDirs {
    /// The standard layout below one experiment directory.
    pub fn under(root: &Path) -> Self {
        let dir = |name: &str| root.join(name).display().to_string();
        Self::new(dir("logs"), dir("samples"), dir("models"), dir("results"))
    }

    pub fn create_all(&self) -> SolverResult<()> {
        for dir in [
            &self.log_dir,
            &self.sample_dir,
            &self.model_save_dir,
            &self.result_dir,
        ] {
            std::fs::create_dir_all(dir).map_err(|source| SolverError::Io {
                path: PathBuf::from(dir),
                source,
            })?;
        }
        Ok(())
    }
}

/// Training configuration loaded from `config.json`.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    pub model: ModelConfig,
    pub loss: LossWeights,
    pub data: DataConfig,
    pub dirs: OutputDirs,
    #[config(default = 16)]
    pub batch_size: usize,
    #[config(default = 1)]
    pub test_batch_size: usize,
    #[config(default = 200000)]
    pub num_iters: usize,
    #[config(default = 100000)]
    pub num_iters_decay: usize,
    #[config(default = 0.0001)]
    pub g_lr: f64,
    #[config(default = 0.0001)]
    pub d_lr: f64,
    #[config(default = 5)]
    pub n_critic: usize,
    #[config(default = 0.5)]
    pub beta1: f32,
    #[config(default = 0.999)]
    pub beta2: f32,
    pub resume_iters: Option<usize>,
    #[config(default = 10)]
    pub log_step: usize,
    #[config(default = 1000)]
    pub sample_step: usize,
    #[config(default = 10000)]
    pub model_save_step: usize,
    #[config(default = 1000)]
    pub lr_update_step: usize,
    #[config(default = 200000)]
    pub test_iters: usize,
    #[config(default = 5)]
    pub top_k: usize,
    #[config(default = 1234)]
    pub seed: u64,
}

impl TrainingConfig {
    pub fn validate(&self) -> SolverResult<()> {
        self.model.validate()?;
        self.loss.validate()?;
        let invalid = |msg: String| Err(SolverError::InvalidConfig(msg));
        if self.batch_size == 0 || self.test_batch_size == 0 {
            return invalid("batch sizes must be positive".into());
        }
        if self.n_critic == 0 {
            return invalid("n_critic must be positive".into());
        }
        if self.num_iters_decay > self.num_iters {
            return invalid(format!(
                "num_iters_decay {} exceeds num_iters {}",
                self.num_iters_decay, self.num_iters
            ));
        }
        if let Some(resume) = self.resume_iters {
            if resume >= self.num_iters {
                return invalid(format!(
                    "resume_iters {resume} must be below num_iters {}",
                    self.num_iters
                ));
            }
        }
        if !(self.g_lr >= 0.0 && self.d_lr >= 0.0) {
            return invalid("learning rates must be non-negative".into());
        }
        Ok(())
    }

    pub fn schedule(&self) -> ScheduleConfig {
        ScheduleConfig {
            num_iters: self.num_iters,
            num_iters_decay: self.num_iters_decay,
            log_step: self.log_step,
            sample_step: self.sample_step,
            model_save_step: self.model_save_step,
            lr_update_step: self.lr_update_step,
        }
    }

    pub fn checkpointer(&self) -> Checkpointer {
        Checkpointer::new(&self.dirs.model_save_dir)
    }
}

/// Outcome of a call to [`Solver::train`].
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingSummary {
    pub start_iters: usize,
    /// Number of iterations completed, counting those before a resume.
    pub final_iteration: usize,
    pub checkpoints: Vec<usize>,
    pub g_lr: f64,
    pub d_lr: f64,
    pub interrupted: bool,
}

/// Owns both networks and their optimizers for the training loop.
pub struct Solver<B: AutodiffBackend> {
    config: TrainingConfig,
    generator: Generator<B>,
    discriminator: Discriminator<B>,
    optimizer: GanOptimizer<B>,
    labeler: AttributeLabeler,
    checkpointer: Checkpointer,
    stop: Arc<AtomicBool>,
    device: B::Device,
}

impl<B: AutodiffBackend> Solver<B> {
    pub fn new(config: TrainingConfig, device: B::Device) -> SolverResult<Self> {
        config.validate()?;
        B::seed(&device, config.seed);

        let generator = config.model.init_generator::<B>(&device);
        let discriminator = config.model.init_discriminator::<B>(&device);
        info!("generator parameters: {}", generator.num_params());
        info!("discriminator parameters: {}", discriminator.num_params());

        let optimizer = GanOptimizer::new(&adam_config(config.beta1, config.beta2), config.n_critic);
        Ok(Self {
            labeler: AttributeLabeler::new(config.model.c_dim),
            checkpointer: config.checkpointer(),
            optimizer,
            generator,
            discriminator,
            stop: Arc::new(AtomicBool::new(false)),
            device,
            config,
        })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn generator(&self) -> &Generator<B> {
        &self.generator
    }

    pub fn discriminator(&self) -> &Discriminator<B> {
        &self.discriminator
    }

    /// Flag checked between iterations; setting it ends [`Solver::train`] early.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Replace both networks with the pair saved at `iteration`.
    pub fn restore(&mut self, iteration: usize) -> SolverResult<()> {
        info!("Loading the trained models from step {iteration}...");
        let (generator, discriminator) = self.checkpointer.restore(
            iteration,
            self.generator.clone(),
            self.discriminator.clone(),
            &self.device,
        )?;
        self.generator = generator;
        self.discriminator = discriminator;
        Ok(())
    }

    /// One training iteration at 0-based `iteration`: the discriminator is
    /// always updated, the generator only every `n_critic` iterations.
    pub fn train_step(
        &mut self,
        iteration: usize,
        batch: Batch<B>,
        lrs: &LearningRates,
    ) -> SolverResult<LossRecord> {
        let label_org = self
            .labeler
            .to_categorical::<B>(&batch.attr_labels, &self.device)?;
        let label_trg = self
            .labeler
            .to_categorical::<B>(&self.labeler.flip(&batch.attr_labels)?, &self.device)?;
        let inputs = StepInputs {
            x_real: batch.images,
            label_org,
            label_trg,
        };

        let d_losses =
            discriminator_losses(&self.generator, &self.discriminator, &inputs, &self.config.loss);
        let discriminator_record = d_losses.checked_record(iteration + 1)?;
        self.discriminator =
            self.optimizer
                .step_discriminator(lrs.d_lr, d_losses.total, self.discriminator.clone());

        let generator_record = if self.optimizer.generator_due(iteration) {
            let g_losses =
                generator_losses(&self.generator, &self.discriminator, &inputs, &self.config.loss);
            let record = g_losses.checked_record(iteration + 1)?;
            self.generator =
                self.optimizer
                    .step_generator(lrs.g_lr, g_losses.total, self.generator.clone());
            Some(record)
        } else {
            None
        };

        Ok(LossRecord {
            discriminator: discriminator_record,
            generator: generator_record,
        })
    }

    /// Run the main loop from `resume_iters` (or 0) to `num_iters`.
    pub fn train<S: DataSource<B>>(&mut self, source: &mut S) -> Result<TrainingSummary> {
        self.config.dirs.create_all()?;
        self.config
            .save(Path::new(&self.config.dirs.model_save_dir).join("config.json"))
            .context("failed to save config.json")?;

        // Fixed inputs for the sample grids, taken before any resume.
        let fixed = source
            .next_wrapping()
            .context("failed to fetch the fixed sample batch")?;
        let c_fixed_list = self
            .labeler
            .create_labels::<B::InnerBackend>(&fixed.attr_labels, &self.device)?;
        let x_fixed = fixed.images.inner();

        let scheduler = Scheduler::new(self.config.schedule());
        let start_iters = match self.config.resume_iters {
            Some(iteration) if iteration > 0 => {
                self.restore(iteration)
                    .with_context(|| format!("failed to resume from iteration {iteration}"))?;
                iteration
            }
            _ => 0,
        };
        let mut lrs = LearningRates::new(
            self.config.g_lr,
            self.config.d_lr,
            self.config.num_iters_decay,
        );
        lrs.fast_forward(scheduler.decays_through(start_iters));

        let history_path = Path::new(&self.config.dirs.log_dir).join(LOSS_HISTORY_FILE);
        let mut history = MetricsBuffer::default();
        let mut summary = TrainingSummary {
            start_iters,
            final_iteration: start_iters,
            checkpoints: Vec::new(),
            g_lr: lrs.g_lr,
            d_lr: lrs.d_lr,
            interrupted: false,
        };

        info!("Start training...");
        let start_time = Instant::now();
        for iteration in scheduler.iterations(start_iters) {
            if self.stop.load(Ordering::SeqCst) {
                summary.interrupted = true;
                warn!(
                    "Stopping after iteration {}; latest checkpoint: {:?}",
                    summary.final_iteration,
                    self.checkpointer.latest_iteration()
                );
                break;
            }

            let step = iteration + 1;
            let batch = source
                .next_wrapping()
                .with_context(|| format!("no training batch for iteration {step}"))?;
            let record = self
                .train_step(iteration, batch, &lrs)
                .with_context(|| format!("training failed at iteration {step}"))?;
            summary.final_iteration = step;

            let triggers = scheduler.triggers(iteration);
            if triggers.log {
                info!(
                    "Elapsed [{}], Iteration [{step}/{}], {}",
                    format_elapsed(start_time.elapsed()),
                    self.config.num_iters,
                    record.summary()
                );
                history.record(step, &record);
            }

            if triggers.sample {
                match self.save_sample(step, x_fixed.clone(), &c_fixed_list) {
                    Ok(path) => info!("Saved real and fake images into {}...", path.display()),
                    Err(err) => warn!("failed to save samples at iteration {step}: {err:#}"),
                }
            }

            if triggers.checkpoint {
                self.checkpointer
                    .save(step, &self.generator, &self.discriminator)
                    .with_context(|| format!("failed to save checkpoint at iteration {step}"))?;
                info!(
                    "Saved model checkpoints into {}...",
                    self.checkpointer.dir().display()
                );
                summary.checkpoints.push(step);
                match history.flush_and_clear(&history_path) {
                    Ok(rows) => debug!("appended {rows} rows to {}", history_path.display()),
                    Err(err) => warn!("failed to append loss history: {err:#}"),
                }
            }

            if triggers.decay_lr {
                lrs.decay();
                info!("Decayed learning rates, g_lr: {}, d_lr: {}.", lrs.g_lr, lrs.d_lr);
            }
        }

        summary.g_lr = lrs.g_lr;
        summary.d_lr = lrs.d_lr;
        Ok(summary)
    }

    /// Write `[real | translated]` for the fixed batch.
    fn save_sample(
        &self,
        step: usize,
        x_fixed: Tensor<B::InnerBackend, 4>,
        c_fixed_list: &[Tensor<B::InnerBackend, 2>],
    ) -> Result<PathBuf> {
        let generator = self.generator.valid();
        let mut columns = Vec::with_capacity(c_fixed_list.len() + 1);
        columns.push(x_fixed.clone());
        for c_fixed in c_fixed_list {
            columns.push(generator.translate(x_fixed.clone(), c_fixed.clone()));
        }
        let path = Path::new(&self.config.dirs.sample_dir).join(format!("{step}-images.jpg"));
        save_translation_grid(columns, &path)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(root: &Path) -> TrainingConfig {
        TrainingConfig::new(
            ModelConfig::new().with_image_size(8),
            LossWeights::new(),
            DataConfig::new("images".into(), "list_attr.txt".into(), "Male".into()),
            OutputDirs::under(root),
        )
    }

    #[test]
    fn defaults_match_the_reference_setup() {
        let config = config(Path::new("run"));
        assert_eq!(config.num_iters, 200000);
        assert_eq!(config.num_iters_decay, 100000);
        assert_eq!(config.n_critic, 5);
        assert_eq!(config.log_step, 10);
        assert_eq!(config.model_save_step, 10000);
        assert_eq!(config.loss.lambda_rec, 10.0);
        assert_eq!(config.resume_iters, None);
        config.validate().unwrap();
    }

    #[test]
    fn inconsistent_configs_are_rejected() {
        let base = || config(Path::new("run"));
        assert!(base().with_n_critic(0).validate().is_err());
        assert!(base().with_batch_size(0).validate().is_err());
        assert!(base().with_num_iters(10).with_num_iters_decay(20).validate().is_err());
        assert!(base()
            .with_num_iters(100)
            .with_num_iters_decay(10)
            .with_resume_iters(Some(100))
            .validate()
            .is_err());
        assert!(base().with_g_lr(-1.0).validate().is_err());
        let mut unbounded = base();
        unbounded.loss = LossWeights::new().with_lambda_gp(f64::INFINITY);
        assert!(unbounded.validate().is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let original = config(dir.path()).with_n_critic(3).with_resume_iters(Some(7));
        original.save(&path).unwrap();

        let loaded = TrainingConfig::load(&path).unwrap();
        assert_eq!(loaded.n_critic, 3);
        assert_eq!(loaded.resume_iters, Some(7));
        assert_eq!(loaded.dirs.model_save_dir, original.dirs.model_save_dir);
    }
}
