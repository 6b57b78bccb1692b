//! Best-model checkpoints keyed by experiment
//!
//! One file per experiment key holds the model weights, the accuracy that
//! triggered the save, the epoch and the experiment RNG position. Saving
//! overwrites the previous file; there is no history.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use candle_core::{DType, Tensor};
use candle_nn::VarMap;
use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::sweep::ExperimentKey;

/// Exact position of a [`ChaCha8Rng`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RngState {
    pub seed: [u8; 32],
    pub stream: u64,
    pub word_pos: u128,
}

impl RngState {
    pub fn capture(rng: &ChaCha8Rng) -> Self {
        Self {
            seed: rng.get_seed(),
            stream: rng.get_stream(),
            word_pos: rng.get_word_pos(),
        }
    }

    /// Rebuild a generator that continues exactly where the captured one was
    pub fn restore(&self) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::from_seed(self.seed);
        rng.set_stream(self.stream);
        rng.set_word_pos(self.word_pos);
        rng
    }
}

/// One named variable of the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorRecord {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// Everything persisted for the best model of one experiment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub architecture: String,
    pub num_classes: usize,
    pub accuracy: f64,
    pub epoch: usize,
    pub rng_state: RngState,
    pub tensors: Vec<TensorRecord>,
    pub saved_at: DateTime<Utc>,
}

impl CheckpointRecord {
    /// Snapshot every variable of `var_map` (batch-norm running statistics
    /// included) together with the run position
    pub fn capture(
        var_map: &VarMap,
        architecture: &str,
        num_classes: usize,
        accuracy: f64,
        epoch: usize,
        rng: &ChaCha8Rng,
    ) -> Result<Self> {
        let data = var_map
            .data()
            .lock()
            .map_err(|_| Error::checkpoint("variable map lock poisoned"))?;

        let mut tensors = data
            .iter()
            .map(|(name, var)| {
                let tensor = var.as_tensor();
                Ok(TensorRecord {
                    name: name.clone(),
                    shape: tensor.dims().to_vec(),
                    data: tensor.flatten_all()?.to_dtype(DType::F32)?.to_vec1::<f32>()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        tensors.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(Self {
            architecture: architecture.to_string(),
            num_classes,
            accuracy,
            epoch,
            rng_state: RngState::capture(rng),
            tensors,
            saved_at: Utc::now(),
        })
    }

    /// Copy the stored weights into the matching variables of `var_map`
    pub fn restore_weights(&self, var_map: &VarMap) -> Result<()> {
        let data = var_map
            .data()
            .lock()
            .map_err(|_| Error::checkpoint("variable map lock poisoned"))?;

        if data.len() != self.tensors.len() {
            return Err(Error::checkpoint(format!(
                "checkpoint holds {} tensors but the model has {}",
                self.tensors.len(),
                data.len()
            )));
        }

        for record in &self.tensors {
            let var = data.get(&record.name).ok_or_else(|| {
                Error::checkpoint(format!("model has no variable named {}", record.name))
            })?;
            if var.dims() != record.shape.as_slice() {
                return Err(Error::checkpoint(format!(
                    "shape mismatch for {}: checkpoint {:?}, model {:?}",
                    record.name,
                    record.shape,
                    var.dims()
                )));
            }
            let value = Tensor::from_vec(record.data.clone(), record.shape.as_slice(), var.device())?
                .to_dtype(var.dtype())?;
            var.set(&value)?;
        }
        Ok(())
    }
}

/// Reads and writes checkpoint files under one directory
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/ckpt_ite_<i>_trial_<t>_dataset_<d>_<name>_<seed>.bin`
    pub fn path_for(&self, key: &ExperimentKey) -> PathBuf {
        self.dir
            .join(format!("ckpt{}{}_{}.bin", key.suffix(), key.run_name, key.seed))
    }

    pub fn exists(&self, key: &ExperimentKey) -> bool {
        self.path_for(key).is_file()
    }

    /// Write `record` for `key`, replacing any previous checkpoint
    pub fn save(&self, key: &ExperimentKey, record: &CheckpointRecord) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let writer = BufWriter::new(File::create(&path)?);
        bincode::serialize_into(writer, record)?;
        info!(
            "Saved checkpoint for {} (acc {:.3}%, epoch {}) to {}",
            key,
            record.accuracy,
            record.epoch,
            path.display()
        );
        Ok(path)
    }

    /// Read the checkpoint of `key` without touching any RNG
    pub fn read(&self, key: &ExperimentKey) -> Result<CheckpointRecord> {
        if !self.dir.is_dir() {
            return Err(Error::CheckpointNotFound {
                path: self.dir.clone(),
            });
        }
        let path = self.path_for(key);
        if !path.is_file() {
            return Err(Error::CheckpointNotFound { path });
        }
        let reader = BufReader::new(File::open(&path)?);
        let record: CheckpointRecord = bincode::deserialize_from(reader)?;
        debug!("Read checkpoint {} saved at {}", path.display(), record.saved_at);
        Ok(record)
    }

    /// Read the checkpoint of `key` and rewind `rng` to the saved position
    pub fn load(&self, key: &ExperimentKey, rng: &mut ChaCha8Rng) -> Result<CheckpointRecord> {
        let record = self.read(key)?;
        *rng = record.rng_state.restore();
        info!(
            "Loaded checkpoint for {} (acc {:.3}%, epoch {})",
            key, record.accuracy, record.epoch
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::Init;
    use rand::RngCore;
    use tempfile::TempDir;

    fn key() -> ExperimentKey {
        ExperimentKey::new("flowers", 0, 1, "run", 7)
    }

    fn var_map_with(value: f64) -> VarMap {
        let var_map = VarMap::new();
        var_map
            .get((2, 3), "layer.weight", Init::Const(value), DType::F32, &Device::Cpu)
            .unwrap();
        var_map
            .get(3, "layer.bias", Init::Const(-value), DType::F32, &Device::Cpu)
            .unwrap();
        var_map
    }

    #[test]
    fn test_path_embeds_key() {
        let manager = CheckpointManager::new("checkpoint");
        assert_eq!(
            manager.path_for(&key()),
            PathBuf::from("checkpoint/ckpt_ite_0_trial_1_dataset_flowers_run_7.bin")
        );
    }

    #[test]
    fn test_round_trip_restores_fields_and_rng() {
        let dir = TempDir::new().unwrap();
        let manager = CheckpointManager::new(dir.path().join("nested").join("ckpt"));

        let mut rng = ChaCha8Rng::seed_from_u64(42);
        rng.set_stream(9);
        for _ in 0..13 {
            rng.next_u32();
        }
        let record = CheckpointRecord::capture(&var_map_with(0.5), "LeNet", 3, 61.25, 4, &rng).unwrap();
        manager.save(&key(), &record).unwrap();
        assert!(manager.exists(&key()));

        let expected: Vec<u64> = (0..8).map(|_| rng.next_u64()).collect();

        let mut other = ChaCha8Rng::seed_from_u64(1);
        let loaded = manager.load(&key(), &mut other).unwrap();
        assert_eq!(loaded.accuracy, 61.25);
        assert_eq!(loaded.epoch, 4);
        assert_eq!(loaded.architecture, "LeNet");
        assert_eq!(loaded.num_classes, 3);
        let resumed: Vec<u64> = (0..8).map(|_| other.next_u64()).collect();
        assert_eq!(resumed, expected);
    }

    #[test]
    fn test_read_leaves_rng_alone() {
        let dir = TempDir::new().unwrap();
        let manager = CheckpointManager::new(dir.path());
        let rng = ChaCha8Rng::seed_from_u64(3);
        let record = CheckpointRecord::capture(&var_map_with(1.0), "LeNet", 2, 50.0, 0, &rng).unwrap();
        manager.save(&key(), &record).unwrap();

        let read = manager.read(&key()).unwrap();
        assert_eq!(read.rng_state, RngState::capture(&rng));
    }

    #[test]
    fn test_restore_weights() {
        let dir = TempDir::new().unwrap();
        let manager = CheckpointManager::new(dir.path());
        let rng = ChaCha8Rng::seed_from_u64(0);
        let record = CheckpointRecord::capture(&var_map_with(2.0), "LeNet", 2, 10.0, 1, &rng).unwrap();
        manager.save(&key(), &record).unwrap();

        let target = var_map_with(0.0);
        manager.read(&key()).unwrap().restore_weights(&target).unwrap();
        let data = target.data().lock().unwrap();
        assert_eq!(data["layer.weight"].flatten_all().unwrap().to_vec1::<f32>().unwrap(), vec![2.0; 6]);
        assert_eq!(data["layer.bias"].to_vec1::<f32>().unwrap(), vec![-2.0; 3]);
    }

    #[test]
    fn test_restore_rejects_other_shapes() {
        let rng = ChaCha8Rng::seed_from_u64(0);
        let record = CheckpointRecord::capture(&var_map_with(1.0), "LeNet", 2, 10.0, 1, &rng).unwrap();

        let other = VarMap::new();
        other.get((3, 2), "layer.weight", Init::Const(0.0), DType::F32, &Device::Cpu).unwrap();
        other.get(3, "layer.bias", Init::Const(0.0), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(record.restore_weights(&other), Err(Error::Checkpoint(_))));
    }

    #[test]
    fn test_missing_checkpoint() {
        let dir = TempDir::new().unwrap();

        let absent_dir = CheckpointManager::new(dir.path().join("never-created"));
        assert!(matches!(
            absent_dir.read(&key()),
            Err(Error::CheckpointNotFound { .. })
        ));

        let empty_dir = CheckpointManager::new(dir.path());
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        match empty_dir.load(&key(), &mut rng) {
            Err(Error::CheckpointNotFound { path }) => assert_eq!(path, empty_dir.path_for(&key())),
            _ => panic!("Expected missing checkpoint"),
        }
    }
}
