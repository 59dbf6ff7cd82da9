use crate::data::DataSource;
use crate::error::{SolverError, SolverResult};
use crate::model::DomainCritic;
use crate::utils::tensor_values;
use burn::prelude::*;
use burn::tensor::TensorData;

/// Class-logit column that scores the presence of the translated attribute.
pub const ATTRIBUTE_CLASS: usize = 1;

/// Turns scalar attribute labels into one-hot domain labels.
#[derive(Debug, Clone, Copy)]
pub struct AttributeLabeler {
    c_dim: usize,
}

impl AttributeLabeler {
    pub fn new(c_dim: usize) -> Self {
        Self { c_dim }
    }

    pub fn c_dim(&self) -> usize {
        self.c_dim
    }

    /// One-hot encode category indices into a `[N, c_dim]` tensor.
    pub fn to_categorical<B: Backend>(
        &self,
        labels: &[i64],
        device: &B::Device,
    ) -> SolverResult<Tensor<B, 2>> {
        let mut values = vec![0.0f32; labels.len() * self.c_dim];
        for (row, &label) in labels.iter().enumerate() {
            let col = self.category(label)?;
            values[row * self.c_dim + col] = 1.0;
        }
        Ok(Tensor::from_data(
            TensorData::new(values, [labels.len(), self.c_dim]),
            device,
        ))
    }

    /// Toggle the binary attribute (`0 -> 1`, anything else `-> 0`).
    pub fn flip(&self, labels: &[i64]) -> SolverResult<Vec<i64>> {
        labels
            .iter()
            .map(|&label| {
                self.category(label)?;
                Ok(i64::from(label == 0))
            })
            .collect()
    }

    /// Target labels for training and sampling: a single batch with the
    /// attribute flipped.
    pub fn create_labels<B: Backend>(
        &self,
        labels: &[i64],
        device: &B::Device,
    ) -> SolverResult<Vec<Tensor<B, 2>>> {
        let flipped = self.flip(labels)?;
        Ok(vec![self.to_categorical(&flipped, device)?])
    }

    /// Target labels for one evaluation batch, derived only from the critic's
    /// view of that batch. Samples the critic sees with the attribute are
    /// sent to 0, the others to 1.
    pub fn test_labels<B, D>(&self, critic: &D, images: Tensor<B, 4>) -> SolverResult<Tensor<B, 2>>
    where
        B: Backend,
        D: DomainCritic<B>,
    {
        let device = images.device();
        let (_, class_logits) = critic.critique(images);
        let detected = self.detect(class_logits)?;
        self.to_categorical(&self.flip(&detected)?, &device)
    }

    /// [`AttributeLabeler::test_labels`] for every batch of one pass over `source`.
    pub fn create_test_labels<B, D, S>(
        &self,
        critic: &D,
        source: &mut S,
    ) -> SolverResult<Vec<Tensor<B, 2>>>
    where
        B: Backend,
        D: DomainCritic<B>,
        S: DataSource<B>,
    {
        source.reset();
        let mut targets = Vec::new();
        while let Some(batch) = source.try_next() {
            targets.push(self.test_labels(critic, batch.images)?);
        }
        Ok(targets)
    }

    /// Attribute value the critic assigns to each sample: 1 when the
    /// attribute logit is positive, else 0.
    pub fn detect<B: Backend>(&self, class_logits: Tensor<B, 2>) -> SolverResult<Vec<i64>> {
        let [batch, width] = class_logits.dims();
        if width != self.c_dim || width <= ATTRIBUTE_CLASS {
            return Err(SolverError::InvalidConfig(format!(
                "critic produced {width} class logits, expected c_dim = {}",
                self.c_dim
            )));
        }
        let logits = tensor_values(class_logits)?;
        Ok((0..batch)
            .map(|row| i64::from(logits[row * width + ATTRIBUTE_CLASS] > 0.0))
            .collect())
    }

    fn category(&self, label: i64) -> SolverResult<usize> {
        if label < 0 || label as usize >= self.c_dim {
            return Err(SolverError::InvalidCategoryIndex {
                index: label,
                c_dim: self.c_dim,
            });
        }
        Ok(label as usize)
    }
}
