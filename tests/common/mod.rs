#![allow(dead_code)]
use burn::backend::{Autodiff, NdArray};
use burn::prelude::*;
use burn::tensor::Distribution;
use stargan_burn::data::{DataConfig, TensorSource};
use stargan_burn::losses::LossWeights;
use stargan_burn::model::ModelConfig;
use stargan_burn::training::{OutputDirs, TrainingConfig};
use stargan_burn::utils::tensor_values;
use std::path::Path;

pub type Inner = NdArray<f32>;
pub type TestBackend = Autodiff<Inner>;

pub const IMAGE_SIZE: usize = 8;

pub fn tiny_model() -> ModelConfig {
    ModelConfig::new()
        .with_image_size(IMAGE_SIZE)
        .with_g_conv_dim(4)
        .with_d_conv_dim(4)
        .with_g_repeat_num(1)
        .with_d_repeat_num(2)
}

pub fn tiny_config(root: &Path) -> TrainingConfig {
    TrainingConfig::new(
        tiny_model(),
        LossWeights::new(),
        DataConfig::new(
            root.join("images").display().to_string(),
            root.join("list_attr.txt").display().to_string(),
            "Male".to_string(),
        ),
        OutputDirs::under(root),
    )
    .with_batch_size(4)
    .with_seed(7)
}

/// `count` random images with alternating attribute labels.
pub fn synthetic_source<B: Backend>(count: usize, batch_size: usize, device: &B::Device) -> TensorSource<B> {
    let images = Tensor::<B, 4>::random(
        [count, 3, IMAGE_SIZE, IMAGE_SIZE],
        Distribution::Uniform(-1.0, 1.0),
        device,
    );
    let labels = (0..count).map(|i| (i % 2) as i64).collect();
    TensorSource::new(images, labels, batch_size).unwrap()
}

pub fn probe_images<B: Backend>(device: &B::Device) -> Tensor<B, 4> {
    Tensor::<B, 4>::ones([2, 3, IMAGE_SIZE, IMAGE_SIZE], device).mul_scalar(0.3)
}

pub fn values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f32> {
    tensor_values(tensor).unwrap()
}

pub fn max_abs_diff(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f32::max)
}
