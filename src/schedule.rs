use crate::losses::LossRecord;
use crate::utils::round4;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::OpenOptions;
use std::ops::Range;
use std::path::Path;
use std::time::Duration;

/// File under the log directory that loss history is appended to.
pub const LOSS_HISTORY_FILE: &str = "loss_history.csv";

/// Iteration counts and trigger intervals. An interval of 0 disables its trigger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub num_iters: usize,
    pub num_iters_decay: usize,
    pub log_step: usize,
    pub sample_step: usize,
    pub model_save_step: usize,
    pub lr_update_step: usize,
}

/// Periodic actions due after an iteration, in the order they run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Triggers {
    pub log: bool,
    pub sample: bool,
    pub checkpoint: bool,
    pub decay_lr: bool,
}

#[derive(Clone, Debug)]
pub struct Scheduler {
    config: ScheduleConfig,
}

impl Scheduler {
    pub fn new(config: ScheduleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    /// 0-based iterations left to run when starting from `start_iters`.
    pub fn iterations(&self, start_iters: usize) -> Range<usize> {
        start_iters.min(self.config.num_iters)..self.config.num_iters
    }

    /// Triggers for 0-based `iteration`; intervals are checked against `iteration + 1`.
    pub fn triggers(&self, iteration: usize) -> Triggers {
        let step = iteration + 1;
        Triggers {
            log: every(step, self.config.log_step),
            sample: every(step, self.config.sample_step),
            checkpoint: every(step, self.config.model_save_step),
            decay_lr: self.decays_at(step),
        }
    }

    fn decay_start(&self) -> usize {
        self.config
            .num_iters
            .saturating_sub(self.config.num_iters_decay)
    }

    fn decays_at(&self, step: usize) -> bool {
        every(step, self.config.lr_update_step) && step > self.decay_start()
    }

    /// How many decays have fired in steps `1..=step`.
    pub fn decays_through(&self, step: usize) -> usize {
        let interval = self.config.lr_update_step;
        let start = self.decay_start();
        if interval == 0 || step <= start {
            return 0;
        }
        step / interval - start / interval
    }
}

fn every(step: usize, interval: usize) -> bool {
    interval > 0 && step % interval == 0
}

/// Current learning rates with linear decay toward zero.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LearningRates {
    pub g_lr: f64,
    pub d_lr: f64,
    g_decrement: f64,
    d_decrement: f64,
}

impl LearningRates {
    pub fn new(g_lr: f64, d_lr: f64, num_iters_decay: usize) -> Self {
        let (g_decrement, d_decrement) = if num_iters_decay == 0 {
            (0.0, 0.0)
        } else {
            (g_lr / num_iters_decay as f64, d_lr / num_iters_decay as f64)
        };
        Self {
            g_lr,
            d_lr,
            g_decrement,
            d_decrement,
        }
    }

    /// Subtract one decrement from each rate, never going below zero.
    pub fn decay(&mut self) {
        self.g_lr = (self.g_lr - self.g_decrement).max(0.0);
        self.d_lr = (self.d_lr - self.d_decrement).max(0.0);
    }

    /// Replay the decays a resumed run already went through.
    pub fn fast_forward(&mut self, decays: usize) {
        for _ in 0..decays {
            self.decay();
        }
    }
}

/// One row of `loss_history.csv`. Generator columns are empty on
/// iterations that skipped the generator update.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HistoryRow {
    pub step: usize,
    #[serde(rename = "D1")]
    pub d_loss_real: f64,
    #[serde(rename = "D2")]
    pub d_loss_fake: f64,
    #[serde(rename = "D3")]
    pub d_loss_cls: f64,
    #[serde(rename = "D4")]
    pub d_loss_gp: f64,
    #[serde(rename = "G1")]
    pub g_loss_fake: Option<f64>,
    #[serde(rename = "G2")]
    pub g_loss_rec: Option<f64>,
    #[serde(rename = "G3")]
    pub g_loss_cls: Option<f64>,
}

impl HistoryRow {
    pub fn from_record(step: usize, record: &LossRecord) -> Self {
        let d = &record.discriminator;
        let g = record.generator.as_ref();
        Self {
            step,
            d_loss_real: round4(d.loss_real),
            d_loss_fake: round4(d.loss_fake),
            d_loss_cls: round4(d.loss_cls),
            d_loss_gp: round4(d.loss_gp),
            g_loss_fake: g.map(|g| round4(g.loss_fake)),
            g_loss_rec: g.map(|g| round4(g.loss_rec)),
            g_loss_cls: g.map(|g| round4(g.loss_cls)),
        }
    }
}

/// Loss rows collected at log triggers since the last flush.
#[derive(Debug, Default)]
pub struct MetricsBuffer {
    rows: Vec<HistoryRow>,
}

impl MetricsBuffer {
    pub fn record(&mut self, step: usize, record: &LossRecord) {
        self.rows.push(HistoryRow::from_record(step, record));
    }

    pub fn rows(&self) -> &[HistoryRow] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append buffered rows to `path`, writing the header only when the
    /// file is new. The buffer is emptied even if the write fails.
    pub fn flush_and_clear(&mut self, path: &Path) -> Result<usize> {
        let rows = std::mem::take(&mut self.rows);
        if rows.is_empty() {
            return Ok(0);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let has_content = std::fs::metadata(path)
            .map(|meta| meta.len() > 0)
            .unwrap_or(false);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(!has_content)
            .from_writer(file);
        for row in &rows {
            writer
                .serialize(row)
                .with_context(|| format!("failed to append to {}", path.display()))?;
        }
        writer.flush()?;
        Ok(rows.len())
    }
}

/// `H:MM:SS`, hours unbounded.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}
