//! Data loading infrastructure for image classification sweeps
//!
//! This module provides the folder-per-class dataset, the per-sample image
//! transform and a batching loader whose random choices are drawn from the
//! experiment RNG.

use candle_core::Tensor;

pub mod datasets;
pub mod loaders;
pub mod transforms;

// Re-exports
pub use datasets::{ImageFolder, ImageSample};
pub use loaders::{DataLoader, DataLoaderConfig, PlannedBatch};
pub use transforms::{Augmentation, CropFlip, Transform};

/// One batch ready for the forward pass
#[derive(Debug, Clone)]
pub struct Batch {
    /// Images, `(batch, 3, size, size)` f32
    pub inputs: Tensor,
    /// Class indices, `(batch,)` u32
    pub targets: Tensor,
}

impl Batch {
    /// Number of samples in the batch
    pub fn len(&self) -> usize {
        self.targets.dims().first().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
