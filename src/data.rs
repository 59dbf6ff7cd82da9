use crate::error::{SolverError, SolverResult};
use burn::prelude::*;
use burn::tensor::TensorData;
use image::RgbImage;
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A minibatch of images in [-1, 1] with one binary attribute label per sample.
#[derive(Clone, Debug)]
pub struct Batch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub attr_labels: Vec<i64>,
}

impl<B: Backend> Batch<B> {
    pub fn len(&self) -> usize {
        self.attr_labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attr_labels.is_empty()
    }
}

/// Restartable sequence of batches.
pub trait DataSource<B: Backend> {
    /// Next batch of the current pass, or `None` once the pass is exhausted.
    fn try_next(&mut self) -> Option<Batch<B>>;

    /// Start a new pass from the beginning.
    fn reset(&mut self);

    /// Next batch, starting a new pass when the current one is exhausted.
    fn next_wrapping(&mut self) -> SolverResult<Batch<B>> {
        if let Some(batch) = self.try_next() {
            return Ok(batch);
        }
        self.reset();
        self.try_next().ok_or(SolverError::EmptyDataSource)
    }
}

/// In-memory source over a fixed image tensor, in order.
#[derive(Clone, Debug)]
pub struct TensorSource<B: Backend> {
    images: Tensor<B, 4>,
    labels: Vec<i64>,
    batch_size: usize,
    cursor: usize,
}

impl<B: Backend> TensorSource<B> {
    pub fn new(images: Tensor<B, 4>, labels: Vec<i64>, batch_size: usize) -> SolverResult<Self> {
        let count = images.dims()[0];
        if count != labels.len() {
            return Err(SolverError::InvalidConfig(format!(
                "{count} images but {} labels",
                labels.len()
            )));
        }
        if batch_size == 0 {
            return Err(SolverError::InvalidConfig("batch_size must be positive".into()));
        }
        Ok(Self {
            images,
            labels,
            batch_size,
            cursor: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl<B: Backend> DataSource<B> for TensorSource<B> {
    fn try_next(&mut self) -> Option<Batch<B>> {
        if self.cursor >= self.labels.len() {
            return None;
        }
        let start = self.cursor;
        let end = (start + self.batch_size).min(self.labels.len());
        self.cursor = end;
        Some(Batch {
            images: self.images.clone().slice_dim(0, start..end),
            attr_labels: self.labels[start..end].to_vec(),
        })
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }
}

/// Where images and the attribute list live, and how images are prepared.
#[derive(Config, Debug)]
pub struct DataConfig {
    pub image_dir: String,
    pub attr_path: String,
    pub selected_attr: String,
    #[config(default = 178)]
    pub crop_size: usize,
    #[config(default = 2000)]
    pub num_test: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

/// Parse a CelebA-style attribute list and keep one attribute as a 0/1 label.
///
/// Line 1 holds the image count, line 2 the attribute names, and every
/// following line `file v1 v2 ...` with values of `1` or `-1`.
pub fn parse_attr_list(contents: &str, selected_attr: &str) -> SolverResult<Vec<(String, i64)>> {
    let mut lines = contents.lines();
    lines.next();
    let names: Vec<&str> = lines
        .next()
        .ok_or_else(|| SolverError::InvalidConfig("attribute list has no header".into()))?
        .split_whitespace()
        .collect();
    let column = names
        .iter()
        .position(|name| *name == selected_attr)
        .ok_or_else(|| {
            SolverError::InvalidConfig(format!("attribute {selected_attr} not in attribute list"))
        })?;

    let mut entries = Vec::new();
    for (line_no, line) in lines.enumerate() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        let value = fields.get(column + 1).ok_or_else(|| {
            SolverError::InvalidConfig(format!(
                "attribute list row {} has {} values, expected {}",
                line_no + 3,
                fields.len() - 1,
                names.len()
            ))
        })?;
        entries.push((fields[0].to_string(), i64::from(*value == "1")));
    }
    Ok(entries)
}

/// Face images plus a CelebA-style attribute list, split into train/test.
pub struct AttributeFolderSource<B: Backend> {
    entries: Vec<(PathBuf, i64)>,
    order: Vec<usize>,
    cursor: usize,
    batch_size: usize,
    crop_size: u32,
    image_size: u32,
    split: Split,
    rng: StdRng,
    device: B::Device,
}

impl<B: Backend> AttributeFolderSource<B> {
    pub fn open(
        config: &DataConfig,
        split: Split,
        image_size: usize,
        batch_size: usize,
        seed: u64,
        device: &B::Device,
    ) -> SolverResult<Self> {
        let attr_path = Path::new(&config.attr_path);
        let contents = std::fs::read_to_string(attr_path).map_err(|source| SolverError::Io {
            path: attr_path.to_path_buf(),
            source,
        })?;
        let all = parse_attr_list(&contents, &config.selected_attr)?;
        let image_dir = Path::new(&config.image_dir);
        let num_test = config.num_test.min(all.len());
        let entries: Vec<(PathBuf, i64)> = match split {
            Split::Test => all.into_iter().take(num_test).collect::<Vec<_>>(),
            Split::Train => all.into_iter().skip(num_test).collect::<Vec<_>>(),
        }
        .into_iter()
        .map(|(file, label)| (image_dir.join(file), label))
        .collect();

        debug!(
            "{:?} split of {} -> {} images",
            split,
            attr_path.display(),
            entries.len()
        );

        let mut source = Self {
            order: (0..entries.len()).collect(),
            entries,
            cursor: 0,
            batch_size: batch_size.max(1),
            crop_size: config.crop_size as u32,
            image_size: image_size as u32,
            split,
            rng: StdRng::seed_from_u64(seed),
            device: device.clone(),
        };
        source.reset();
        Ok(source)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn load(&mut self, index: usize) -> SolverResult<Vec<f32>> {
        let path = &self.entries[index].0;
        let img = image::open(path)
            .map_err(|source| SolverError::Image {
                path: path.clone(),
                source,
            })?
            .to_rgb8();
        let img = center_crop(&img, self.crop_size);
        let mut img = resize_image(&img, self.image_size, self.image_size);
        if self.split == Split::Train && self.rng.gen_bool(0.5) {
            img = image::imageops::flip_horizontal(&img);
        }
        Ok(image_to_chw(&img))
    }
}

impl<B: Backend> DataSource<B> for AttributeFolderSource<B> {
    fn try_next(&mut self) -> Option<Batch<B>> {
        while self.cursor < self.order.len() {
            let start = self.cursor;
            let end = (start + self.batch_size).min(self.order.len());
            self.cursor = end;

            let mut pixels = Vec::new();
            let mut labels = Vec::with_capacity(end - start);
            for pos in start..end {
                let index = self.order[pos];
                match self.load(index) {
                    Ok(mut chw) => {
                        pixels.append(&mut chw);
                        labels.push(self.entries[index].1);
                    }
                    Err(err) => warn!("skipping unreadable sample: {err}"),
                }
            }
            if labels.is_empty() {
                continue;
            }

            let size = self.image_size as usize;
            let images = Tensor::<B, 4>::from_data(
                TensorData::new(pixels, [labels.len(), 3, size, size]),
                &self.device,
            );
            return Some(Batch {
                images,
                attr_labels: labels,
            });
        }
        None
    }

    fn reset(&mut self) {
        self.cursor = 0;
        if self.split == Split::Train {
            self.order.shuffle(&mut self.rng);
        }
    }
}

/// Crop the central `size x size` square (clamped to the image).
fn center_crop(img: &RgbImage, size: u32) -> RgbImage {
    let (width, height) = img.dimensions();
    let side = size.min(width).min(height);
    let x = (width - side) / 2;
    let y = (height - side) / 2;
    image::imageops::crop_imm(img, x, y, side, side).to_image()
}

fn resize_image(img: &RgbImage, width: u32, height: u32) -> RgbImage {
    if img.width() == width && img.height() == height {
        return img.clone();
    }
    image::imageops::resize(img, width, height, image::imageops::FilterType::CatmullRom)
}

/// Convert RGB image data to CHW floats normalized to [-1, 1].
fn image_to_chw(img: &RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let hw = (width * height) as usize;
    let mut out = vec![0.0f32; hw * 3];

    for y in 0..height {
        for x in 0..width {
            let pixel = img.get_pixel(x, y).0;
            let idx = (y * width + x) as usize;
            out[idx] = (pixel[0] as f32 / 127.5) - 1.0;
            out[hw + idx] = (pixel[1] as f32 / 127.5) - 1.0;
            out[2 * hw + idx] = (pixel[2] as f32 / 127.5) - 1.0;
        }
    }

    out
}
