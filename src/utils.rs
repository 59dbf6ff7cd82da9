use crate::error::{SolverError, SolverResult};
use anyhow::{Context, Result};
use burn::prelude::*;
use image::{GenericImage, Rgb, RgbImage};
use std::path::Path;

/// Map [-1, 1] normalized values back to [0, 1].
pub fn denorm(value: f32) -> f32 {
    ((value + 1.0) * 0.5).clamp(0.0, 1.0)
}

/// Round to four decimal places, the precision losses and scores are reported at.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Copy a tensor to the host as `f32` values in row-major order.
pub fn tensor_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> SolverResult<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| SolverError::TensorData(format!("{err:?}")))
}

/// Read a single-element tensor as `f64`.
pub fn scalar_value<B: Backend>(tensor: Tensor<B, 1>) -> SolverResult<f64> {
    tensor_values(tensor)?
        .first()
        .map(|&value| f64::from(value))
        .ok_or_else(|| SolverError::TensorData("expected a scalar, got an empty tensor".into()))
}

/// Convert a BCHW tensor in [-1, 1] to a vector of RGB images.
pub fn tensor_to_images<B: Backend>(tensor: Tensor<B, 4>) -> Result<Vec<RgbImage>> {
    let [batch, channels, height, width] = tensor.dims();
    if channels != 3 {
        return Err(anyhow::anyhow!(
            "expected 3 channels for images, got {channels}"
        ));
    }

    let values = tensor_values(tensor).context("failed to read image tensor")?;
    let hw = height * width;
    let mut images = Vec::with_capacity(batch);

    for b in 0..batch {
        let base = b * channels * hw;
        let mut img = RgbImage::new(width as u32, height as u32);
        for y in 0..height {
            for x in 0..width {
                let idx = y * width + x;
                let r = denorm(values[base + idx]) * 255.0;
                let g = denorm(values[base + hw + idx]) * 255.0;
                let b = denorm(values[base + 2 * hw + idx]) * 255.0;
                img.put_pixel(x as u32, y as u32, Rgb([r as u8, g as u8, b as u8]));
            }
        }
        images.push(img);
    }

    Ok(images)
}

/// Stack images vertically, one per row.
pub fn stack_rows(images: &[RgbImage]) -> Result<RgbImage> {
    if images.is_empty() {
        return Err(anyhow::anyhow!("no images to stack"));
    }
    let width = images[0].width();
    let total_height: u32 = images.iter().map(|img| img.height()).sum();
    let mut out = RgbImage::new(width, total_height);

    let mut offset_y = 0;
    for img in images {
        out.copy_from(img, 0, offset_y)
            .context("failed to copy image into column")?;
        offset_y += img.height();
    }

    Ok(out)
}

/// Save `[real | translated...]` as one composite: the tensors are joined
/// along the width axis and each sample becomes one row.
pub fn save_translation_grid<B: Backend>(columns: Vec<Tensor<B, 4>>, path: &Path) -> Result<()> {
    if columns.is_empty() {
        return Err(anyhow::anyhow!("no images to save into {}", path.display()));
    }
    let concat = Tensor::cat(columns, 3);
    let rows = tensor_to_images(concat)?;
    let output = stack_rows(&rows)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    output
        .save(path)
        .with_context(|| format!("failed to save {}", path.display()))?;
    Ok(())
}
