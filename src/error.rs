//! Error taxonomy for graph construction, training and inference

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the detection engine.
#[derive(Error, Debug)]
pub enum DetectionError {
    /// A transfer record is missing its source/destination or carries an invalid amount.
    #[error("Malformed transfer at index {index}: {reason}")]
    MalformedInput { index: usize, reason: String },

    /// A ground-truth label outside {0, 1}.
    #[error("Invalid label {value} for account {account}: expected 0 or 1")]
    InvalidLabel { account: String, value: u8 },

    /// Prediction requested before a checkpoint has been loaded.
    #[error("Model not trained: no checkpoint loaded from {}", path.display())]
    ModelNotTrained { path: PathBuf },

    /// Checkpoint architecture does not fit the feature width produced by the graph builder.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Training loss became NaN or infinite.
    #[error("Training diverged at epoch {epoch}: loss = {loss}")]
    TrainingDivergence { epoch: usize, loss: f64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A train/val/test partition has no nodes.
    #[error("Empty {0} partition")]
    EmptyPartition(&'static str),

    #[error("I/O failed for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DetectionError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DetectionError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(index: usize, reason: impl Into<String>) -> Self {
        DetectionError::MalformedInput {
            index,
            reason: reason.into(),
        }
    }

    /// True for the recoverable "train first" condition.
    pub fn is_model_not_trained(&self) -> bool {
        matches!(self, DetectionError::ModelNotTrained { .. })
    }
}

pub type Result<T> = std::result::Result<T, DetectionError>;
