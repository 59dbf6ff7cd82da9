use crate::model::layers::{same_conv, InstanceNorm2d, ResidualBlock};
use crate::model::{ImageTranslator, StackLayout};
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::PaddingConfig2d;
use burn::prelude::*;
use burn::tensor::activation::relu;

/// Configuration for the label-conditioned encoder/residual/decoder generator.
#[derive(Config, Debug)]
pub struct GeneratorConfig {
    pub conv_dim: usize,
    pub c_dim: usize,
    pub repeat_num: usize,
    #[config(default = 3)]
    pub channels: usize,
}

/// Generator that translates an image towards a target domain label.
#[derive(Module, Debug)]
pub struct Generator<B: Backend> {
    stem: Conv2d<B>,
    stem_norm: InstanceNorm2d<B>,
    down_convs: Vec<Conv2d<B>>,
    down_norms: Vec<InstanceNorm2d<B>>,
    blocks: Vec<ResidualBlock<B>>,
    up_convs: Vec<ConvTranspose2d<B>>,
    up_norms: Vec<InstanceNorm2d<B>>,
    head: Conv2d<B>,
    #[module(ignore)]
    c_dim: usize,
}

impl GeneratorConfig {
    /// Initialize generator layers on the given device.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Generator<B> {
        let stem = same_conv(self.channels + self.c_dim, self.conv_dim, 7, device);
        let stem_norm = InstanceNorm2d::new(self.conv_dim, 1e-5, device);

        let mut curr = self.conv_dim;
        let mut down_convs = Vec::with_capacity(2);
        let mut down_norms = Vec::with_capacity(2);
        for _ in 0..2 {
            down_convs.push(down_conv(curr, curr * 2, device));
            down_norms.push(InstanceNorm2d::new(curr * 2, 1e-5, device));
            curr *= 2;
        }

        let blocks = (0..self.repeat_num)
            .map(|_| ResidualBlock::new(curr, device))
            .collect();

        let mut up_convs = Vec::with_capacity(2);
        let mut up_norms = Vec::with_capacity(2);
        for _ in 0..2 {
            up_convs.push(up_conv(curr, curr / 2, device));
            up_norms.push(InstanceNorm2d::new(curr / 2, 1e-5, device));
            curr /= 2;
        }

        let head = same_conv(curr, self.channels, 7, device);

        Generator {
            stem,
            stem_norm,
            down_convs,
            down_norms,
            blocks,
            up_convs,
            up_norms,
            head,
            c_dim: self.c_dim,
        }
    }
}

impl<B: Backend> Generator<B> {
    /// Translate `images` ([N, C, H, W] in [-1, 1]) towards `labels` ([N, c_dim]).
    pub fn forward(&self, images: Tensor<B, 4>, labels: Tensor<B, 2>) -> Tensor<B, 4> {
        let [batch, _, height, width] = images.dims();
        let label_map = labels
            .reshape([batch, self.c_dim, 1, 1])
            .repeat(&[1, 1, height, width]);
        let x = Tensor::cat(vec![images, label_map], 1);

        let mut x = relu(self.stem_norm.forward(self.stem.forward(x)));
        for (conv, norm) in self.down_convs.iter().zip(&self.down_norms) {
            x = relu(norm.forward(conv.forward(x)));
        }
        for block in &self.blocks {
            x = block.forward(x);
        }
        for (conv, norm) in self.up_convs.iter().zip(&self.up_norms) {
            x = relu(norm.forward(conv.forward(x)));
        }
        self.head.forward(x).tanh()
    }
}

impl<B: Backend> StackLayout<B> for Generator<B> {
    fn stack_lengths(&self) -> Vec<usize> {
        vec![
            self.down_convs.len(),
            self.down_norms.len(),
            self.blocks.len(),
            self.up_convs.len(),
            self.up_norms.len(),
        ]
    }

    fn record_stack_lengths(record: &<Self as Module<B>>::Record) -> Vec<usize> {
        vec![
            record.down_convs.len(),
            record.down_norms.len(),
            record.blocks.len(),
            record.up_convs.len(),
            record.up_norms.len(),
        ]
    }
}

impl<B: Backend> ImageTranslator<B> for Generator<B> {
    fn translate(&self, images: Tensor<B, 4>, labels: Tensor<B, 2>) -> Tensor<B, 4> {
        self.forward(images, labels)
    }
}

fn down_conv<B: Backend>(in_channels: usize, out_channels: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([in_channels, out_channels], [4, 4])
        .with_stride([2, 2])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_bias(false)
        .init(device)
}

fn up_conv<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    device: &B::Device,
) -> ConvTranspose2d<B> {
    ConvTranspose2dConfig::new([in_channels, out_channels], [4, 4])
        .with_stride([2, 2])
        .with_padding([1, 1])
        .with_bias(false)
        .init(device)
}
