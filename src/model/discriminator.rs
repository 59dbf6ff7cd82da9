use crate::model::{DomainCritic, StackLayout};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::PaddingConfig2d;
use burn::prelude::*;
use burn::tensor::activation::leaky_relu;

/// Configuration for the PatchGAN-style critic with a domain classifier head.
#[derive(Config, Debug)]
pub struct DiscriminatorConfig {
    pub image_size: usize,
    pub conv_dim: usize,
    pub c_dim: usize,
    pub repeat_num: usize,
    #[config(default = 3)]
    pub channels: usize,
}

/// Critic with a source (real/fake) map and domain class logits.
#[derive(Module, Debug)]
pub struct Discriminator<B: Backend> {
    convs: Vec<Conv2d<B>>,
    conv_src: Conv2d<B>,
    conv_cls: Conv2d<B>,
    #[module(ignore)]
    c_dim: usize,
}

impl DiscriminatorConfig {
    /// Initialize the critic layers on the given device.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Discriminator<B> {
        let mut convs = Vec::with_capacity(self.repeat_num);
        convs.push(conv(self.channels, self.conv_dim, device));
        let mut curr = self.conv_dim;
        for _ in 1..self.repeat_num {
            convs.push(conv(curr, curr * 2, device));
            curr *= 2;
        }

        let kernel = self.image_size >> self.repeat_num;
        let conv_src = Conv2dConfig::new([curr, 1], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);
        let conv_cls = Conv2dConfig::new([curr, self.c_dim], [kernel, kernel])
            .with_bias(false)
            .init(device);

        Discriminator {
            convs,
            conv_src,
            conv_cls,
            c_dim: self.c_dim,
        }
    }
}

impl<B: Backend> Discriminator<B> {
    /// Forward pass returning (source_map [N, 1, h, w], class_logits [N, c_dim]).
    pub fn forward(&self, images: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 2>) {
        let mut x = images;
        for conv in &self.convs {
            x = leaky_relu(conv.forward(x), 0.01);
        }
        let batch = x.dims()[0];
        let out_src = self.conv_src.forward(x.clone());
        let out_cls = self.conv_cls.forward(x).reshape([batch, self.c_dim]);
        (out_src, out_cls)
    }
}

impl<B: Backend> StackLayout<B> for Discriminator<B> {
    fn stack_lengths(&self) -> Vec<usize> {
        vec![self.convs.len()]
    }

    fn record_stack_lengths(record: &<Self as Module<B>>::Record) -> Vec<usize> {
        vec![record.convs.len()]
    }
}

impl<B: Backend> DomainCritic<B> for Discriminator<B> {
    fn critique(&self, images: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 2>) {
        self.forward(images)
    }
}

fn conv<B: Backend>(in_channels: usize, out_channels: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([in_channels, out_channels], [4, 4])
        .with_stride([2, 2])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .init(device)
}
