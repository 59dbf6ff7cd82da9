use crate::error::{SolverError, SolverResult};
use crate::model::{DomainCritic, ImageTranslator};
use crate::utils::{round4, scalar_value};
use burn::prelude::*;
use burn::tensor::activation::log_sigmoid;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Distribution;

/// Step size of the directional finite difference used by the gradient penalty.
pub const PENALTY_STEP: f64 = 1e-2;

/// Weighting for each loss term used during training.
#[derive(Config, Debug)]
pub struct LossWeights {
    #[config(default = 1.0)]
    pub lambda_cls: f64,
    #[config(default = 10.0)]
    pub lambda_rec: f64,
    #[config(default = 10.0)]
    pub lambda_gp: f64,
}

/// Real images with their original and target one-hot domain labels.
#[derive(Clone, Debug)]
pub struct StepInputs<B: Backend> {
    pub x_real: Tensor<B, 4>,
    pub label_org: Tensor<B, 2>,
    pub label_trg: Tensor<B, 2>,
}

/// Discriminator loss terms; `total` carries the graph for the update.
#[derive(Debug)]
pub struct DiscriminatorLosses<B: Backend> {
    pub real: Tensor<B, 1>,
    pub fake: Tensor<B, 1>,
    pub cls: Tensor<B, 1>,
    pub gp: Tensor<B, 1>,
    pub total: Tensor<B, 1>,
}

/// Generator loss terms; `total` carries the graph for the update.
#[derive(Debug)]
pub struct GeneratorLosses<B: Backend> {
    pub fake: Tensor<B, 1>,
    pub rec: Tensor<B, 1>,
    pub cls: Tensor<B, 1>,
    pub total: Tensor<B, 1>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DiscriminatorRecord {
    pub loss_real: f64,
    pub loss_fake: f64,
    pub loss_cls: f64,
    pub loss_gp: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeneratorRecord {
    pub loss_fake: f64,
    pub loss_rec: f64,
    pub loss_cls: f64,
}

/// Scalar loss values of one iteration. The generator part is only present
/// on iterations that updated the generator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LossRecord {
    pub discriminator: DiscriminatorRecord,
    pub generator: Option<GeneratorRecord>,
}

impl LossRecord {
    /// `(tag, value)` pairs in logging order.
    pub fn entries(&self) -> Vec<(&'static str, f64)> {
        let d = &self.discriminator;
        let mut entries = vec![
            ("D/loss_real", d.loss_real),
            ("D/loss_fake", d.loss_fake),
            ("D/loss_cls", d.loss_cls),
            ("D/loss_gp", d.loss_gp),
        ];
        if let Some(g) = &self.generator {
            entries.extend([
                ("G/loss_fake", g.loss_fake),
                ("G/loss_rec", g.loss_rec),
                ("G/loss_cls", g.loss_cls),
            ]);
        }
        entries
    }

    /// Log line fragment: `D/loss_real: 0.1234, ...`.
    pub fn summary(&self) -> String {
        self.entries()
            .iter()
            .map(|(tag, value)| format!("{tag}: {:.4}", round4(*value)))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl<B: Backend> DiscriminatorLosses<B> {
    pub fn record(&self) -> SolverResult<DiscriminatorRecord> {
        Ok(DiscriminatorRecord {
            loss_real: scalar_value(self.real.clone())?,
            loss_fake: scalar_value(self.fake.clone())?,
            loss_cls: scalar_value(self.cls.clone())?,
            loss_gp: scalar_value(self.gp.clone())?,
        })
    }

    /// Scalar terms for 1-based `iteration`, failing if a term or the
    /// weighted total is not finite.
    pub fn checked_record(&self, iteration: usize) -> SolverResult<DiscriminatorRecord> {
        let record = self.record()?;
        record.ensure_finite(iteration)?;
        ensure_finite(iteration, &[("D/loss", scalar_value(self.total.clone())?)])?;
        Ok(record)
    }
}

impl<B: Backend> GeneratorLosses<B> {
    pub fn record(&self) -> SolverResult<GeneratorRecord> {
        Ok(GeneratorRecord {
            loss_fake: scalar_value(self.fake.clone())?,
            loss_rec: scalar_value(self.rec.clone())?,
            loss_cls: scalar_value(self.cls.clone())?,
        })
    }

    pub fn checked_record(&self, iteration: usize) -> SolverResult<GeneratorRecord> {
        let record = self.record()?;
        record.ensure_finite(iteration)?;
        ensure_finite(iteration, &[("G/loss", scalar_value(self.total.clone())?)])?;
        Ok(record)
    }
}

impl LossWeights {
    pub fn validate(&self) -> SolverResult<()> {
        for (name, weight) in [
            ("lambda_cls", self.lambda_cls),
            ("lambda_rec", self.lambda_rec),
            ("lambda_gp", self.lambda_gp),
        ] {
            if !(weight.is_finite() && weight >= 0.0) {
                return Err(SolverError::InvalidConfig(format!(
                    "{name} must be finite and non-negative, got {weight}"
                )));
            }
        }
        Ok(())
    }
}

impl DiscriminatorRecord {
    pub fn ensure_finite(&self, iteration: usize) -> SolverResult<()> {
        ensure_finite(
            iteration,
            &[
                ("D/loss_real", self.loss_real),
                ("D/loss_fake", self.loss_fake),
                ("D/loss_cls", self.loss_cls),
                ("D/loss_gp", self.loss_gp),
            ],
        )
    }
}

impl GeneratorRecord {
    pub fn ensure_finite(&self, iteration: usize) -> SolverResult<()> {
        ensure_finite(
            iteration,
            &[
                ("G/loss_fake", self.loss_fake),
                ("G/loss_rec", self.loss_rec),
                ("G/loss_cls", self.loss_cls),
            ],
        )
    }
}

fn ensure_finite(iteration: usize, terms: &[(&'static str, f64)]) -> SolverResult<()> {
    match terms.iter().find(|(_, value)| !value.is_finite()) {
        Some(&(term, value)) => Err(SolverError::NumericalInstability {
            iteration,
            term,
            value,
        }),
        None => Ok(()),
    }
}

/// Binary cross-entropy with logits, summed over classes and divided by the
/// batch size.
pub fn classification_loss<B: Backend>(logits: Tensor<B, 2>, target: Tensor<B, 2>) -> Tensor<B, 1> {
    let batch = logits.dims()[0].max(1);
    let negative = target.ones_like().sub(target);
    negative
        .mul(logits.clone())
        .sub(log_sigmoid(logits))
        .sum()
        .div_scalar(batch as f64)
}

/// Per-sample L2 norm of a `[N, C, H, W]` gradient.
pub fn gradient_norms<B: Backend>(grad: Tensor<B, 4>) -> Tensor<B, 1> {
    let [n, c, h, w] = grad.dims();
    grad.reshape([n, c * h * w])
        .square()
        .sum_dim(1)
        .sqrt()
        .reshape([n])
}

/// One-centered penalty `mean((norm - 1)^2)`.
pub fn penalty_from_norms<B: Backend>(norms: Tensor<B, 1>) -> Tensor<B, 1> {
    norms.sub_scalar(1.0).square().mean()
}

/// `alpha * x_real + (1 - alpha) * x_fake` with `alpha` shaped `[N, 1, 1, 1]`.
pub fn interpolate<B: Backend>(
    x_real: Tensor<B, 4>,
    x_fake: Tensor<B, 4>,
    alpha: Tensor<B, 4>,
) -> Tensor<B, 4> {
    let complement = alpha.ones_like().sub(alpha.clone());
    x_real.mul(alpha).add(x_fake.mul(complement))
}

/// Sum of the source map per sample, `[N]`.
fn source_scores<B: Backend, D: DomainCritic<B>>(critic: &D, images: Tensor<B, 4>) -> Tensor<B, 1> {
    let (out_src, _) = critic.critique(images);
    let [n, c, h, w] = out_src.dims();
    out_src.reshape([n, c * h * w]).sum_dim(1).reshape([n])
}

/// Unit direction of `d(sum src)/d x_hat` per sample, as a constant.
///
/// Runs its own forward/backward pass; it must complete before the step's
/// loss graph is built.
pub fn penalty_direction<B, D>(critic: &D, x_hat: Tensor<B, 4>) -> Tensor<B, 4>
where
    B: AutodiffBackend,
    D: DomainCritic<B>,
{
    let device = x_hat.device();
    let dims = x_hat.dims();
    let probe = x_hat.detach().require_grad();
    let (out_src, _) = critic.critique(probe.clone());
    let grads = out_src.sum().backward();
    let grad = probe
        .grad(&grads)
        .unwrap_or_else(|| Tensor::<B::InnerBackend, 4>::zeros(dims, &device));

    let norms = gradient_norms(grad.clone()).reshape([dims[0], 1, 1, 1]);
    let direction = grad.div(norms.add_scalar(1e-12));
    Tensor::from_inner(direction)
}

/// Gradient penalty on interpolated samples.
///
/// The input-gradient norm is estimated by a central difference of the
/// critic along `direction`, so the penalty stays differentiable with
/// respect to the critic parameters under first-order autodiff.
pub fn gradient_penalty<B: Backend, D: DomainCritic<B>>(
    critic: &D,
    x_hat: Tensor<B, 4>,
    direction: Tensor<B, 4>,
) -> Tensor<B, 1> {
    let offset = direction.mul_scalar(PENALTY_STEP);
    let ahead = source_scores(critic, x_hat.clone().add(offset.clone()));
    let behind = source_scores(critic, x_hat.sub(offset));
    let norms = ahead.sub(behind).div_scalar(2.0 * PENALTY_STEP);
    penalty_from_norms(norms)
}

/// Discriminator losses for one step.
pub fn discriminator_losses<B, G, D>(
    generator: &G,
    critic: &D,
    inputs: &StepInputs<B>,
    weights: &LossWeights,
) -> DiscriminatorLosses<B>
where
    B: AutodiffBackend,
    G: ImageTranslator<B>,
    D: DomainCritic<B>,
{
    let device = inputs.x_real.device();
    let batch = inputs.x_real.dims()[0];
    let x_real = inputs.x_real.clone().detach();
    let x_fake = generator
        .translate(x_real.clone(), inputs.label_trg.clone())
        .detach();

    let alpha = Tensor::<B, 4>::random([batch, 1, 1, 1], Distribution::Uniform(0.0, 1.0), &device);
    let x_hat = interpolate(x_real.clone(), x_fake.clone(), alpha);
    let direction = penalty_direction(critic, x_hat.clone());

    let (out_src, out_cls) = critic.critique(x_real);
    let real = out_src.mean().neg();
    let cls = classification_loss(out_cls, inputs.label_org.clone());

    let (out_src, _) = critic.critique(x_fake);
    let fake = out_src.mean();

    let gp = gradient_penalty(critic, x_hat, direction);

    let total = real
        .clone()
        .add(fake.clone())
        .add(cls.clone().mul_scalar(weights.lambda_cls))
        .add(gp.clone().mul_scalar(weights.lambda_gp));

    DiscriminatorLosses {
        real,
        fake,
        cls,
        gp,
        total,
    }
}

/// Generator losses for one step: adversarial, target-domain classification
/// and cycle reconstruction back to the original domain.
pub fn generator_losses<B, G, D>(
    generator: &G,
    critic: &D,
    inputs: &StepInputs<B>,
    weights: &LossWeights,
) -> GeneratorLosses<B>
where
    B: Backend,
    G: ImageTranslator<B>,
    D: DomainCritic<B>,
{
    let x_fake = generator.translate(inputs.x_real.clone(), inputs.label_trg.clone());
    let (out_src, out_cls) = critic.critique(x_fake.clone());
    let fake = out_src.mean().neg();
    let cls = classification_loss(out_cls, inputs.label_trg.clone());

    let x_reconst = generator.translate(x_fake, inputs.label_org.clone());
    let rec = inputs.x_real.clone().sub(x_reconst).abs().mean();

    let total = fake
        .clone()
        .add(rec.clone().mul_scalar(weights.lambda_rec))
        .add(cls.clone().mul_scalar(weights.lambda_cls));

    GeneratorLosses {
        fake,
        rec,
        cls,
        total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::tensor_values;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::TensorData;

    type B = NdArray<f32>;
    type AB = Autodiff<NdArray<f32>>;

    fn scalar(tensor: Tensor<B, 1>) -> f64 {
        scalar_value(tensor).unwrap()
    }

    #[test]
    fn classification_loss_is_non_negative_and_shrinks_with_confidence() {
        let device = Default::default();
        let target = Tensor::<B, 2>::from_data(
            TensorData::new(vec![1.0f32, 0.0, 0.0, 1.0], [2, 2]),
            &device,
        );
        let mut previous = f64::INFINITY;
        for confidence in [-4.0f32, -1.0, 0.0, 1.0, 4.0, 12.0] {
            let logits = Tensor::<B, 2>::from_data(
                TensorData::new(
                    vec![confidence, -confidence, -confidence, confidence],
                    [2, 2],
                ),
                &device,
            );
            let loss = scalar(classification_loss(logits, target.clone()));
            assert!(loss >= 0.0);
            assert!(loss < previous);
            previous = loss;
        }
        assert!(previous < 1e-4);
    }

    #[test]
    fn classification_loss_sums_classes_per_sample() {
        let device = Default::default();
        let logits = Tensor::<B, 2>::zeros([4, 2], &device);
        let target = Tensor::<B, 2>::zeros([4, 2], &device);
        // Each element contributes ln 2; two classes per sample.
        let loss = scalar(classification_loss(logits, target));
        assert!((loss - 2.0 * std::f64::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn penalty_is_zero_only_for_unit_norms() {
        let device = Default::default();
        let unit = Tensor::<B, 4>::from_data(
            TensorData::new(vec![0.6f32, 0.8, 0.0, 1.0], [2, 2, 1, 1]),
            &device,
        );
        let norms = gradient_norms(unit);
        let values = tensor_values(norms.clone()).unwrap();
        assert!(values.iter().all(|v| (v - 1.0).abs() < 1e-6));
        assert!(scalar(penalty_from_norms(norms)).abs() < 1e-10);

        let skewed = Tensor::<B, 1>::from_data(TensorData::new(vec![1.0f32, 3.0, 0.5], [3]), &device);
        let reordered = Tensor::<B, 1>::from_data(TensorData::new(vec![0.5f32, 1.0, 3.0], [3]), &device);
        let penalty = scalar(penalty_from_norms(skewed));
        assert!(penalty > 0.0);
        assert!((penalty - (4.0 + 0.25) / 3.0).abs() < 1e-6);
        assert!((penalty - scalar(penalty_from_norms(reordered))).abs() < 1e-9);
    }

    #[test]
    fn interpolation_hits_both_endpoints() {
        let device = Default::default();
        let real = Tensor::<B, 4>::ones([2, 1, 2, 2], &device);
        let fake = Tensor::<B, 4>::zeros([2, 1, 2, 2], &device);
        let alpha = Tensor::<B, 4>::from_data(TensorData::new(vec![1.0f32, 0.25], [2, 1, 1, 1]), &device);
        let mixed = tensor_values(interpolate(real, fake, alpha)).unwrap();
        assert_eq!(&mixed[..4], &[1.0; 4]);
        assert_eq!(&mixed[4..], &[0.25; 4]);
    }

    fn scalar_tensor(value: f32) -> Tensor<B, 1> {
        Tensor::from_data(TensorData::new(vec![value], [1]), &Default::default())
    }

    #[test]
    fn non_finite_terms_name_the_term_and_iteration() {
        let record = DiscriminatorRecord {
            loss_real: -0.5,
            loss_fake: 0.25,
            loss_cls: f64::NAN,
            loss_gp: f64::INFINITY,
        };
        let err = record.ensure_finite(12).unwrap_err();
        assert!(matches!(
            err,
            SolverError::NumericalInstability { iteration: 12, term: "D/loss_cls", .. }
        ));
        assert!(err.to_string().contains("iteration 12"));

        let record = GeneratorRecord {
            loss_fake: 0.1,
            loss_rec: f64::NEG_INFINITY,
            loss_cls: 0.3,
        };
        assert!(matches!(
            record.ensure_finite(3),
            Err(SolverError::NumericalInstability { iteration: 3, term: "G/loss_rec", .. })
        ));

        let finite = GeneratorRecord {
            loss_fake: 0.1,
            loss_rec: 0.2,
            loss_cls: 0.3,
        };
        finite.ensure_finite(3).unwrap();
    }

    #[test]
    fn overflowing_total_is_caught_with_finite_terms() {
        let losses = DiscriminatorLosses {
            real: scalar_tensor(1.0),
            fake: scalar_tensor(1.0),
            cls: scalar_tensor(1.0),
            gp: scalar_tensor(1.0),
            total: scalar_tensor(f32::INFINITY),
        };
        assert!(matches!(
            losses.checked_record(4),
            Err(SolverError::NumericalInstability { iteration: 4, term: "D/loss", .. })
        ));

        let losses = GeneratorLosses {
            fake: scalar_tensor(1.0),
            rec: scalar_tensor(1.0),
            cls: scalar_tensor(1.0),
            total: scalar_tensor(3.0),
        };
        assert_eq!(losses.checked_record(4).unwrap().loss_rec, 1.0);
    }

    #[test]
    fn loss_weights_must_be_finite_and_non_negative() {
        LossWeights::new().validate().unwrap();
        assert!(LossWeights::new().with_lambda_gp(f64::INFINITY).validate().is_err());
        assert!(LossWeights::new().with_lambda_rec(f64::NAN).validate().is_err());
        assert!(LossWeights::new().with_lambda_cls(-1.0).validate().is_err());
    }

    /// Critic whose source score is `scale * sum(x)`, so its input gradient
    /// norm is `scale * sqrt(C * H * W)`.
    struct ScaledSum {
        scale: f64,
    }

    impl<BK: Backend> DomainCritic<BK> for ScaledSum {
        fn critique(&self, images: Tensor<BK, 4>) -> (Tensor<BK, 4>, Tensor<BK, 2>) {
            let [n, c, h, w] = images.dims();
            let device = images.device();
            let src = images
                .reshape([n, c * h * w])
                .sum_dim(1)
                .mul_scalar(self.scale)
                .reshape([n, 1, 1, 1]);
            (src, Tensor::zeros([n, 2], &device))
        }
    }

    #[test]
    fn penalty_estimate_matches_exact_gradient_norm() {
        let device = Default::default();
        let x_hat = Tensor::<AB, 4>::random([3, 1, 2, 2], Distribution::Uniform(-1.0, 1.0), &device);

        for (scale, expected) in [(0.5, 0.0), (1.0, 1.0), (0.25, 0.25)] {
            let critic = ScaledSum { scale };
            let direction = penalty_direction(&critic, x_hat.clone());
            let penalty = gradient_penalty(&critic, x_hat.clone(), direction);
            let value = scalar_value(penalty).unwrap();
            assert!((value - expected).abs() < 5e-3, "scale {scale}: {value}");
        }
    }
}
