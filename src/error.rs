//! Error types for mixsweep

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for sweep operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Architecture name not present in the model registry
    #[error("Unknown architecture '{name}'. Registered: {available}")]
    UnknownArchitecture { name: String, available: String },

    /// Dataset root holds no dataset directories
    #[error("No datasets found under {}", root.display())]
    NoDatasets { root: PathBuf },

    /// Dataset layout or content error
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// No checkpoint for the requested experiment
    #[error("No checkpoint found at {}", path.display())]
    CheckpointNotFound { path: PathBuf },

    /// Checkpoint content does not match the model it is restored into
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Tensor operation error
    #[error("Tensor operation error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// CSV log error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Checkpoint serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

/// Result type alias for sweep operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a dataset error
    pub fn dataset(msg: impl Into<String>) -> Self {
        Self::Dataset(msg.into())
    }

    /// Create a checkpoint error
    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }
}
