use crate::data::{AttributeFolderSource, DataSource, Split};
use crate::error::SolverResult;
use crate::labels::AttributeLabeler;
use crate::model::{DomainCritic, ImageTranslator};
use crate::training::TrainingConfig;
use crate::utils::{round4, save_translation_grid, tensor_values};
use anyhow::{Context, Result};
use burn::prelude::*;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Reconstruction error of one evaluated sample, by position in the pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RankedSample {
    pub index: usize,
    pub error: f64,
}

/// All scores from the evaluation pass plus the selected extremes.
#[derive(Clone, Debug, PartialEq)]
pub struct RankingReport {
    pub scored: Vec<RankedSample>,
    pub best: Vec<RankedSample>,
    pub worst: Vec<RankedSample>,
}

/// The `k` lowest errors, ascending; ties keep pass order.
pub fn select_best(scored: &[RankedSample], k: usize) -> Vec<RankedSample> {
    let mut sorted = scored.to_vec();
    sorted.sort_by(|a, b| a.error.total_cmp(&b.error));
    sorted.truncate(k);
    sorted
}

/// The `k` highest errors, descending; ties keep pass order.
pub fn select_worst(scored: &[RankedSample], k: usize) -> Vec<RankedSample> {
    let mut sorted = scored.to_vec();
    sorted.sort_by(|a, b| b.error.total_cmp(&a.error));
    sorted.truncate(k);
    sorted
}

/// Per-sample `mean(|real - fake|)`.
pub fn reconstruction_errors<B: Backend>(real: Tensor<B, 4>, fake: Tensor<B, 4>) -> SolverResult<Vec<f64>> {
    let [n, c, h, w] = real.dims();
    let per_sample = real.sub(fake).abs().reshape([n, c * h * w]).mean_dim(1);
    Ok(tensor_values(per_sample)?.into_iter().map(f64::from).collect())
}

/// Samples that can still rank among the `k` lowest (or highest) errors,
/// with their real images kept for rendering.
struct Shortlist<B: Backend> {
    k: usize,
    lowest: bool,
    entries: Vec<(RankedSample, Tensor<B, 4>)>,
}

impl<B: Backend> Shortlist<B> {
    fn new(k: usize, lowest: bool) -> Self {
        Self {
            k,
            lowest,
            entries: Vec::with_capacity(k + 1),
        }
    }

    /// Samples arrive in pass order, so a stable sort keeps earlier ties first.
    fn offer(&mut self, sample: RankedSample, image: Tensor<B, 4>) {
        if self.k == 0 {
            return;
        }
        self.entries.push((sample, image));
        let lowest = self.lowest;
        self.entries.sort_by(|(a, _), (b, _)| {
            if lowest {
                a.error.total_cmp(&b.error)
            } else {
                b.error.total_cmp(&a.error)
            }
        });
        self.entries.truncate(self.k);
    }

    fn image(&self, index: usize) -> Option<Tensor<B, 4>> {
        self.entries
            .iter()
            .find(|(sample, _)| sample.index == index)
            .map(|(_, image)| image.clone())
    }
}

/// Scores and the shortlisted images from one pass over the source.
pub struct ScoredPass<B: Backend> {
    pub scored: Vec<RankedSample>,
    best: Shortlist<B>,
    worst: Shortlist<B>,
}

/// Translates every evaluation sample to the opposite of the attribute the
/// critic detects, scores it, and renders the best and worst `top_k`.
pub struct InferenceRanker<'a, B: Backend, G, D> {
    generator: &'a G,
    critic: &'a D,
    labeler: AttributeLabeler,
    result_dir: PathBuf,
    top_k: usize,
    _backend: PhantomData<B>,
}

impl<'a, B, G, D> InferenceRanker<'a, B, G, D>
where
    B: Backend,
    G: ImageTranslator<B>,
    D: DomainCritic<B>,
{
    pub fn new(
        generator: &'a G,
        critic: &'a D,
        labeler: AttributeLabeler,
        result_dir: impl Into<PathBuf>,
        top_k: usize,
    ) -> Self {
        Self {
            generator,
            critic,
            labeler,
            result_dir: result_dir.into(),
            top_k,
            _backend: PhantomData,
        }
    }

    /// Score every sample once and save one composite per batch.
    pub fn score<S: DataSource<B>>(&self, source: &mut S) -> SolverResult<ScoredPass<B>> {
        let mut pass = ScoredPass {
            scored: Vec::new(),
            best: Shortlist::new(self.top_k, true),
            worst: Shortlist::new(self.top_k, false),
        };

        source.reset();
        let mut batch_no = 0;
        while let Some(batch) = source.try_next() {
            batch_no += 1;
            let c_trg = self.labeler.test_labels(self.critic, batch.images.clone())?;
            let fake = self.generator.translate(batch.images.clone(), c_trg);
            let errors = reconstruction_errors(batch.images.clone(), fake.clone())?;
            for (row, error) in errors.into_iter().enumerate() {
                let sample = RankedSample {
                    index: pass.scored.len(),
                    error: round4(error),
                };
                let image = batch.images.clone().slice_dim(0, row..row + 1);
                pass.best.offer(sample, image.clone());
                pass.worst.offer(sample, image);
                pass.scored.push(sample);
            }

            let path = self.result_dir.join(format!("{batch_no}-images.jpg"));
            match save_translation_grid(vec![batch.images, fake], &path) {
                Ok(()) => info!("Saved real and fake images into {}...", path.display()),
                Err(err) => warn!("failed to save {}: {err:#}", path.display()),
            }
        }
        Ok(pass)
    }

    /// Re-translate each selected sample and save it into `out_dir` as
    /// `{index + 1}-images.jpg`.
    fn render(
        &self,
        picked: &[RankedSample],
        shortlist: &Shortlist<B>,
        out_dir: &Path,
    ) -> SolverResult<Vec<PathBuf>> {
        let mut saved = Vec::with_capacity(picked.len());
        for sample in picked {
            let Some(image) = shortlist.image(sample.index) else {
                warn!("sample #{} was not kept for rendering", sample.index + 1);
                continue;
            };
            let c_trg = self.labeler.test_labels(self.critic, image.clone())?;
            let fake = self.generator.translate(image.clone(), c_trg);

            let path = out_dir.join(format!("{}-images.jpg", sample.index + 1));
            match save_translation_grid(vec![image, fake], &path) {
                Ok(()) => saved.push(path),
                Err(err) => warn!("failed to save {}: {err:#}", path.display()),
            }
        }
        Ok(saved)
    }

    /// Score, select and render.
    pub fn run<S: DataSource<B>>(&self, source: &mut S) -> SolverResult<RankingReport> {
        let pass = self.score(source)?;
        let best = select_best(&pass.scored, self.top_k);
        let worst = select_worst(&pass.scored, self.top_k);

        self.render(&best, &pass.best, &self.result_dir.join("best"))?;
        self.render(&worst, &pass.worst, &self.result_dir.join("worst"))?;

        for (label, picked) in [("best", &best), ("worst", &worst)] {
            let errors: Vec<String> = picked
                .iter()
                .map(|s| format!("#{}={:.4}", s.index + 1, s.error))
                .collect();
            info!("{label} {}: {}", picked.len(), errors.join(", "));
        }

        Ok(RankingReport {
            scored: pass.scored,
            best,
            worst,
        })
    }
}

/// Restore the networks saved at `test_iters` and rank the test split.
pub fn evaluate<B: Backend>(config: &TrainingConfig, device: &B::Device) -> Result<RankingReport> {
    config.validate()?;
    let generator = config.model.init_generator::<B>(device);
    let discriminator = config.model.init_discriminator::<B>(device);
    info!("Loading the trained models from step {}...", config.test_iters);
    let (generator, discriminator) = config
        .checkpointer()
        .restore(config.test_iters, generator, discriminator, device)
        .with_context(|| format!("failed to load checkpoint {}", config.test_iters))?;

    let mut source = AttributeFolderSource::<B>::open(
        &config.data,
        Split::Test,
        config.model.image_size,
        config.test_batch_size,
        config.seed,
        device,
    )?;
    info!("evaluating {} test images", source.len());

    let ranker = InferenceRanker::new(
        &generator,
        &discriminator,
        AttributeLabeler::new(config.model.c_dim),
        &config.dirs.result_dir,
        config.top_k,
    );
    Ok(ranker.run(&mut source)?)
}
