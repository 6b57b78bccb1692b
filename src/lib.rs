//! mixsweep - mixup image-classification experiment sweeps
//!
//! For every dataset under a root directory the sweep trains an image
//! classifier for several iterations and trials, optionally with mixup,
//! checkpoints the best model of each run, logs per-epoch metrics to CSV and
//! appends a classification report of the best model to a summary file.

#![warn(rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod sweep;
pub mod training;

// Re-exports
pub use config::{DeviceType, SweepArgs, SweepConfig};
pub use error::{Error, Result};
pub use models::{ImageClassifier, ModelRegistry};
pub use sweep::{ExperimentKey, ExperimentState, ExperimentSummary, SweepController};
pub use training::{EpochRunner, PolicyKind};
