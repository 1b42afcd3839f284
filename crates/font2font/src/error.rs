use std::path::PathBuf;

/// Errors raised by model construction, training, checkpointing and evaluation.
#[derive(Debug, thiserror::Error)]
pub enum Font2FontError {
    /// Spatial width cannot survive 8 halvings and 8 doublings.
    #[error("width {0} must be a positive multiple of 128")]
    InvalidWidth(usize),

    /// Any other hyperparameter that fails validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No checkpoint (or exported generator) could be found where one was required.
    #[error("no checkpoint found in {}", .0.display())]
    CheckpointNotFound(PathBuf),

    /// A data provider handed over something that does not fit the model.
    #[error("data error: {0}")]
    Data(String),

    /// Module or optimizer record could not be written or read.
    #[error("record error: {0}")]
    Record(#[from] burn::record::RecorderError),

    /// PNG encode/decode failure.
    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Font2FontError>;
