pub mod discriminator;
pub mod generator;
pub mod layers;

use crate::error::{SolverError, SolverResult};
use burn::prelude::*;

pub use discriminator::{Discriminator, DiscriminatorConfig};
pub use generator::{Generator, GeneratorConfig};

/// Image-to-image translator conditioned on a one-hot target domain.
pub trait ImageTranslator<B: Backend> {
    /// `images` is `[N, C, H, W]`, `labels` is `[N, c_dim]`; output matches `images`.
    fn translate(&self, images: Tensor<B, 4>, labels: Tensor<B, 2>) -> Tensor<B, 4>;
}

/// Critic scoring realism and classifying the domain of an image batch.
pub trait DomainCritic<B: Backend> {
    /// Returns `(source_map [N, 1, h, w], class_logits [N, c_dim])`.
    fn critique(&self, images: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 2>);
}

/// Lengths of the repeated layer stacks in a network. A record whose stacks
/// differ from the network's cannot be loaded into it.
pub trait StackLayout<B: Backend>: Module<B> {
    fn stack_lengths(&self) -> Vec<usize>;

    fn record_stack_lengths(record: &<Self as Module<B>>::Record) -> Vec<usize>;
}

/// Hyperparameters for the generator and discriminator.
#[derive(Config, Debug)]
pub struct ModelConfig {
    #[config(default = 2)]
    pub c_dim: usize,
    #[config(default = 128)]
    pub image_size: usize,
    #[config(default = 64)]
    pub g_conv_dim: usize,
    #[config(default = 64)]
    pub d_conv_dim: usize,
    #[config(default = 6)]
    pub g_repeat_num: usize,
    #[config(default = 6)]
    pub d_repeat_num: usize,
    #[config(default = 3)]
    pub channels: usize,
}

impl ModelConfig {
    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig::new(self.g_conv_dim, self.c_dim, self.g_repeat_num)
            .with_channels(self.channels)
    }

    pub fn discriminator_config(&self) -> DiscriminatorConfig {
        DiscriminatorConfig::new(
            self.image_size,
            self.d_conv_dim,
            self.c_dim,
            self.d_repeat_num,
        )
        .with_channels(self.channels)
    }

    pub fn init_generator<B: Backend>(&self, device: &B::Device) -> Generator<B> {
        self.generator_config().init(device)
    }

    pub fn init_discriminator<B: Backend>(&self, device: &B::Device) -> Discriminator<B> {
        self.discriminator_config().init(device)
    }

    /// Reject shapes the networks cannot be built for.
    pub fn validate(&self) -> SolverResult<()> {
        if self.c_dim < 2 {
            return Err(SolverError::InvalidConfig(format!(
                "c_dim must be at least 2 for a binary attribute, got {}",
                self.c_dim
            )));
        }
        if self.d_repeat_num == 0 || self.d_repeat_num >= usize::BITS as usize {
            return Err(SolverError::InvalidConfig(format!(
                "d_repeat_num must be positive, got {}",
                self.d_repeat_num
            )));
        }
        let critic_stride = 1usize << self.d_repeat_num;
        if self.image_size == 0
            || self.image_size % critic_stride != 0
            || self.image_size % 4 != 0
        {
            return Err(SolverError::InvalidConfig(format!(
                "image_size {} must be divisible by 4 and by 2^d_repeat_num = {critic_stride}",
                self.image_size
            )));
        }
        if self.g_conv_dim == 0 || self.d_conv_dim == 0 || self.channels == 0 {
            return Err(SolverError::InvalidConfig(
                "conv widths and channel count must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
