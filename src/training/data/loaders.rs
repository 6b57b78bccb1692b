//! Batching data loader with parallel image decoding

use std::sync::Arc;

use candle_core::{Device, Tensor};
use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Batch, CropFlip, ImageFolder, Transform};
use crate::error::{Error, Result};

/// Configuration for DataLoader
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataLoaderConfig {
    /// Batch size
    pub batch_size: usize,
    /// Whether to shuffle data each epoch
    pub shuffle: bool,
    /// Number of decoding threads; 0 decodes on the calling thread
    pub num_workers: usize,
    /// Whether to drop the last incomplete batch
    pub drop_last: bool,
}

impl Default for DataLoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            shuffle: true,
            num_workers: 2,
            drop_last: false,
        }
    }
}

/// Sample indices and augmentation choices of one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedBatch {
    pub items: Vec<(usize, Option<CropFlip>)>,
}

/// Data loader over an [`ImageFolder`]
///
/// Every random decision of an epoch (order and augmentation) is drawn up
/// front from the caller's RNG by [`DataLoader::plan_epoch`]; decoding then
/// runs in parallel without touching the RNG, so the batches are a pure
/// function of the RNG state.
pub struct DataLoader {
    dataset: Arc<ImageFolder>,
    transform: Transform,
    config: DataLoaderConfig,
    device: Device,
    pool: Option<ThreadPool>,
}

impl DataLoader {
    pub fn new(
        dataset: Arc<ImageFolder>,
        transform: Transform,
        config: DataLoaderConfig,
        device: Device,
    ) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(Error::config("batch size must be greater than 0"));
        }
        let pool = if config.num_workers > 0 {
            let pool = ThreadPoolBuilder::new()
                .num_threads(config.num_workers)
                .build()
                .map_err(|e| Error::config(format!("failed to start loader workers: {}", e)))?;
            Some(pool)
        } else {
            None
        };

        debug!(
            "Creating DataLoader for {} with batch_size={}, num_workers={}, shuffle={}",
            dataset.root().display(),
            config.batch_size,
            config.num_workers,
            config.shuffle
        );

        Ok(Self {
            dataset,
            transform,
            config,
            device,
            pool,
        })
    }

    pub fn dataset(&self) -> &ImageFolder {
        &self.dataset
    }

    /// Get the number of batches per epoch
    pub fn num_batches(&self) -> usize {
        let dataset_size = self.dataset.len();
        if self.config.drop_last {
            dataset_size / self.config.batch_size
        } else {
            dataset_size.div_ceil(self.config.batch_size)
        }
    }

    /// Get dataset size
    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// Decide sample order and augmentation for one epoch
    pub fn plan_epoch<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<PlannedBatch> {
        let mut indices: Vec<usize> = (0..self.dataset.len()).collect();
        if self.config.shuffle {
            indices.shuffle(rng);
        }

        let mut batches = Vec::with_capacity(self.num_batches());
        for chunk in indices.chunks(self.config.batch_size) {
            if self.config.drop_last && chunk.len() < self.config.batch_size {
                break;
            }
            let items = chunk
                .iter()
                .map(|&index| {
                    let choice = self.transform.augmentation().map(|aug| aug.draw(&mut *rng));
                    (index, choice)
                })
                .collect();
            batches.push(PlannedBatch { items });
        }
        batches
    }

    /// Batches in dataset order without augmentation, for evaluation and reports
    pub fn plan_in_order(&self) -> Vec<PlannedBatch> {
        let indices: Vec<usize> = (0..self.dataset.len()).collect();
        indices
            .chunks(self.config.batch_size)
            .filter(|chunk| !self.config.drop_last || chunk.len() == self.config.batch_size)
            .map(|chunk| PlannedBatch {
                items: chunk.iter().map(|&index| (index, None)).collect(),
            })
            .collect()
    }

    /// Decode and stack one planned batch onto the loader's device
    pub fn load(&self, planned: &PlannedBatch) -> Result<Batch> {
        let decode = || -> Result<Vec<Vec<f32>>> {
            planned
                .items
                .par_iter()
                .map(|&(index, choice)| {
                    let sample = self.dataset.get(index)?;
                    self.transform.load(&sample.path, choice)
                })
                .collect()
        };
        let images = match &self.pool {
            Some(pool) => pool.install(decode)?,
            None => planned
                .items
                .iter()
                .map(|&(index, choice)| {
                    let sample = self.dataset.get(index)?;
                    self.transform.load(&sample.path, choice)
                })
                .collect::<Result<Vec<_>>>()?,
        };

        let labels = planned
            .items
            .iter()
            .map(|&(index, _)| self.dataset.get(index).map(|s| s.label))
            .collect::<Result<Vec<u32>>>()?;

        let size = self.transform.image_size() as usize;
        let batch_size = images.len();
        let flat: Vec<f32> = images.into_iter().flatten().collect();
        let inputs = Tensor::from_vec(flat, (batch_size, 3, size, size), &self.device)?;
        let targets = Tensor::from_vec(labels, batch_size, &self.device)?;

        Ok(Batch { inputs, targets })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::data::Augmentation;
    use crate::training::tests::fixtures::write_image_folder;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use tempfile::TempDir;

    fn loader(dir: &TempDir, batch_size: usize, shuffle: bool, workers: usize) -> DataLoader {
        write_image_folder(dir.path(), &["cat", "dog"], 5, 8);
        let folder = Arc::new(ImageFolder::open(dir.path()).unwrap());
        let config = DataLoaderConfig {
            batch_size,
            shuffle,
            num_workers: workers,
            drop_last: false,
        };
        DataLoader::new(folder, Transform::train(8, Augmentation::default()), config, Device::Cpu)
            .unwrap()
    }

    #[test]
    fn test_num_batches() {
        let dir = TempDir::new().unwrap();
        let loader = loader(&dir, 4, false, 0);
        assert_eq!(loader.len(), 10);
        assert_eq!(loader.num_batches(), 3);
    }

    #[test]
    fn test_plan_without_shuffle_keeps_order() {
        let dir = TempDir::new().unwrap();
        let loader = loader(&dir, 4, false, 0);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let plan = loader.plan_epoch(&mut rng);
        let order: Vec<usize> = plan.iter().flat_map(|b| b.items.iter().map(|i| i.0)).collect();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
        assert_eq!(plan.last().unwrap().items.len(), 2);
    }

    #[test]
    fn test_plan_is_reproducible() {
        let dir = TempDir::new().unwrap();
        let loader = loader(&dir, 3, true, 0);
        let a = loader.plan_epoch(&mut ChaCha8Rng::seed_from_u64(11));
        let b = loader.plan_epoch(&mut ChaCha8Rng::seed_from_u64(11));
        assert_eq!(a, b);
    }

    #[test]
    fn test_plan_in_order_ignores_randomness() {
        let dir = TempDir::new().unwrap();
        let loader = loader(&dir, 4, true, 0);
        let plan = loader.plan_in_order();
        assert_eq!(plan.len(), 3);
        assert!(plan.iter().flat_map(|b| b.items.iter()).all(|item| item.1.is_none()));
        assert_eq!(plan[0].items[0].0, 0);
    }

    #[test]
    fn test_load_shapes_with_workers() {
        let dir = TempDir::new().unwrap();
        let loader = loader(&dir, 4, true, 2);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let plan = loader.plan_epoch(&mut rng);
        let batch = loader.load(&plan[0]).unwrap();
        assert_eq!(batch.inputs.dims(), &[4, 3, 8, 8]);
        assert_eq!(batch.targets.dims(), &[4]);
        assert_eq!(batch.len(), 4);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let dir = TempDir::new().unwrap();
        write_image_folder(dir.path(), &["a"], 1, 8);
        let folder = Arc::new(ImageFolder::open(dir.path()).unwrap());
        let config = DataLoaderConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(DataLoader::new(folder, Transform::eval(8), config, Device::Cpu).is_err());
    }
}
