use std::path::PathBuf;
use thiserror::Error;

/// Failures raised by the solver components.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("label {index} is not a valid category in [0, {c_dim})")]
    InvalidCategoryIndex { index: i64, c_dim: usize },

    #[error("checkpoint not found: {}", path.display())]
    CheckpointNotFound { path: PathBuf },

    #[error("checkpoint {} is corrupt: {reason}", path.display())]
    CheckpointCorrupt { path: PathBuf, reason: String },

    #[error("failed to write checkpoint {}: {reason}", path.display())]
    CheckpointWrite { path: PathBuf, reason: String },

    #[error("non-finite {term} ({value}) at iteration {iteration}")]
    NumericalInstability {
        iteration: usize,
        term: &'static str,
        value: f64,
    },

    #[error("failed to read tensor data: {0}")]
    TensorData(String),

    #[error("data source yielded no batches")]
    EmptyDataSource,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("compute device {0} is not compiled into this build")]
    UnsupportedDevice(String),

    #[error("image error at {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type SolverResult<T> = Result<T, SolverError>;
