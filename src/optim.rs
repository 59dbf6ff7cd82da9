use crate::model::{Discriminator, Generator};
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

/// Build the Adam configuration shared by both networks.
pub fn adam_config(beta1: f32, beta2: f32) -> AdamConfig {
    AdamConfig::new()
        .with_beta_1(beta1)
        .with_beta_2(beta2)
        .with_epsilon(1e-8)
}

/// Two Adam optimizers, one per network.
///
/// Each step turns its own backward pass into `GradientsParams` and hands
/// them to the optimizer by value, so no gradients survive into the next
/// step and there is nothing to reset between passes.
pub struct GanOptimizer<B: AutodiffBackend> {
    optim_gen: OptimizerAdaptor<Adam, Generator<B>, B>,
    optim_disc: OptimizerAdaptor<Adam, Discriminator<B>, B>,
    n_critic: usize,
}

impl<B: AutodiffBackend> GanOptimizer<B> {
    pub fn new(config: &AdamConfig, n_critic: usize) -> Self {
        Self {
            optim_gen: config.init::<B, Generator<B>>(),
            optim_disc: config.init::<B, Discriminator<B>>(),
            n_critic: n_critic.max(1),
        }
    }

    /// True when the generator is updated at 0-based `iteration`.
    pub fn generator_due(&self, iteration: usize) -> bool {
        (iteration + 1) % self.n_critic == 0
    }

    /// Backpropagate `loss` and update only the discriminator.
    pub fn step_discriminator(
        &mut self,
        lr: f64,
        loss: Tensor<B, 1>,
        discriminator: Discriminator<B>,
    ) -> Discriminator<B> {
        let grads = GradientsParams::from_grads(loss.backward(), &discriminator);
        self.optim_disc.step(lr, discriminator, grads)
    }

    /// Backpropagate `loss` and update only the generator. Gradients that
    /// reach the discriminator through the adversarial term are discarded.
    pub fn step_generator(
        &mut self,
        lr: f64,
        loss: Tensor<B, 1>,
        generator: Generator<B>,
    ) -> Generator<B> {
        let grads = GradientsParams::from_grads(loss.backward(), &generator);
        self.optim_gen.step(lr, generator, grads)
    }
}
