//! Training infrastructure for image classification sweeps
//!
//! # Main Components
//!
//! - **Data**: folder-per-class datasets, transforms and batching loaders
//! - **Mixup**: pairwise blending of inputs and labels
//! - **Loss / Policy**: how a batch becomes a loss and an accuracy credit
//! - **Optimizers**: SGD with momentum and the multi-step schedule
//! - **Trainer**: the epoch runner driving Train and Evaluate passes
//! - **Checkpoints**: best-model snapshots keyed by experiment

pub mod checkpoints;
pub mod data;
pub mod loss;
pub mod metrics;
pub mod mixup;
pub mod optimizers;
pub mod policy;
pub mod progress;
pub mod trainer;

// Tests module
#[cfg(test)]
pub mod tests;

pub use checkpoints::{CheckpointManager, CheckpointRecord, RngState, TensorRecord};
pub use data::{Batch, DataLoader, DataLoaderConfig, ImageFolder, Transform};
pub use metrics::{EvalOutcome, LossAveraging, RunningTotals, TrainOutcome};
pub use mixup::{mixup_data, MixedBatch};
pub use optimizers::{MultiStepScheduler, Optimizer, Scheduler, SgdOptimizer};
pub use policy::{create_policy, PolicyKind, PolicyStep, TrainingPolicy};
pub use progress::ProgressReporter;
pub use trainer::EpochRunner;
