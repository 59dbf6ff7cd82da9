use burn::module::Param;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::PaddingConfig2d;
use burn::prelude::*;
use burn::tensor::activation::relu;

/// Instance normalization with a learned per-channel scale and shift.
#[derive(Module, Debug)]
pub struct InstanceNorm2d<B: Backend> {
    scale: Param<Tensor<B, 1>>,
    shift: Param<Tensor<B, 1>>,
    #[module(ignore)]
    epsilon: f64,
}

impl<B: Backend> InstanceNorm2d<B> {
    pub fn new(num_channels: usize, epsilon: f64, device: &B::Device) -> Self {
        Self {
            scale: Param::from_tensor(Tensor::ones([num_channels], device)),
            shift: Param::from_tensor(Tensor::zeros([num_channels], device)),
            epsilon,
        }
    }

    /// Normalize each (sample, channel) plane, then apply scale and shift.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let channels = x.dims()[1];
        let mean = x.clone().mean_dim(3).mean_dim(2);
        let var = x.clone().sub(mean.clone()).square().mean_dim(3).mean_dim(2);
        let norm = (x - mean).div(var.add_scalar(self.epsilon).sqrt());

        let scale = self.scale.val().reshape([1, channels, 1, 1]);
        let shift = self.shift.val().reshape([1, channels, 1, 1]);
        norm.mul(scale).add(shift)
    }
}

/// Residual block: conv-norm-relu-conv-norm plus identity.
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    conv1: Conv2d<B>,
    norm1: InstanceNorm2d<B>,
    conv2: Conv2d<B>,
    norm2: InstanceNorm2d<B>,
}

impl<B: Backend> ResidualBlock<B> {
    pub fn new(channels: usize, device: &B::Device) -> Self {
        Self {
            conv1: same_conv(channels, channels, 3, device),
            norm1: InstanceNorm2d::new(channels, 1e-5, device),
            conv2: same_conv(channels, channels, 3, device),
            norm2: InstanceNorm2d::new(channels, 1e-5, device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let h = relu(self.norm1.forward(self.conv1.forward(x.clone())));
        let h = self.norm2.forward(self.conv2.forward(h));
        x.add(h)
    }
}

/// Stride-1 convolution that preserves spatial size for odd kernels.
pub fn same_conv<B: Backend>(
    in_channels: usize,
    out_channels: usize,
    kernel: usize,
    device: &B::Device,
) -> Conv2d<B> {
    let pad = kernel / 2;
    Conv2dConfig::new([in_channels, out_channels], [kernel, kernel])
        .with_padding(PaddingConfig2d::Explicit(pad, pad))
        .with_bias(false)
        .init(device)
}
