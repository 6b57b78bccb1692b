//! Sweep configuration
//!
//! A [`SweepConfig`] starts from built-in defaults, is optionally replaced by
//! a JSON or YAML file, and is finally overridden by command-line options
//! ([`SweepArgs`]). Validation runs once, after all layers are applied.

use std::path::{Path, PathBuf};

use anyhow::Context;
use candle_core::Device;
use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::models::{parse_architecture, ModelRegistry};
use crate::training::{LossAveraging, PolicyKind};

/// Device type selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// CUDA when available, then Metal, then CPU
    #[default]
    Auto,
    Cpu,
    Cuda,
    Metal,
}

/// Everything one sweep needs to know
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Base learning rate
    pub lr: f64,
    /// Resume every experiment from its checkpoint
    pub resume: bool,
    /// Architecture name in the model registry
    pub model: String,
    /// Run name embedded in checkpoint and log file names
    pub name: String,
    pub seed: u64,
    pub batch_size: usize,
    pub test_batch_size: usize,
    /// Total epochs per trial
    pub epochs: usize,
    /// Random crop and flip on the training split
    pub augment: bool,
    /// L2 weight decay
    pub decay: f64,
    pub momentum: f64,
    /// Mixup Beta concentration
    pub alpha: f64,
    /// Directory holding one subdirectory per dataset
    pub dataset_dir: PathBuf,
    /// Trials per iteration
    pub trials: usize,
    /// Train without mixing
    pub baseline: bool,
    pub iterations: usize,
    /// Square side length images are resized to
    pub image_size: u32,
    /// Add the unmixed-prediction loss term to mixup
    pub mixup_v2: bool,
    /// Image decoding threads per loader
    pub workers: usize,
    pub device: DeviceType,
    pub checkpoint_dir: PathBuf,
    /// Root of the CSV logs and summary files
    pub output_dir: PathBuf,
    /// Average epoch losses over the last batch index instead of the batch count
    pub legacy_loss_average: bool,
    /// Draw per-batch progress bars
    pub progress: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            lr: 0.1,
            resume: false,
            model: "ResNet18".to_string(),
            name: "0".to_string(),
            seed: 0,
            batch_size: 16,
            test_batch_size: 8,
            epochs: 200,
            augment: true,
            decay: 1e-4,
            momentum: 0.9,
            alpha: 1.0,
            dataset_dir: PathBuf::from("Data"),
            trials: 5,
            baseline: false,
            iterations: 2,
            image_size: 32,
            mixup_v2: false,
            workers: 2,
            device: DeviceType::Auto,
            checkpoint_dir: PathBuf::from("checkpoint"),
            output_dir: PathBuf::from("."),
            legacy_loss_average: false,
            progress: true,
        }
    }
}

impl SweepConfig {
    /// Load configuration from a file, JSON when the extension says so and
    /// YAML otherwise
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .context("Failed to read configuration file")?;

        let config = if path.as_ref().extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content).context("Failed to parse JSON configuration")?
        } else {
            serde_yaml::from_str(&content).context("Failed to parse YAML configuration")?
        };

        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = if path.as_ref().extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::to_string_pretty(self)
                .context("Failed to serialize configuration to JSON")?
        } else {
            serde_yaml::to_string(self).context("Failed to serialize configuration to YAML")?
        };

        std::fs::write(path.as_ref(), content).context("Failed to write configuration file")?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.lr > 0.0) {
            return Err(Error::config("Learning rate must be positive"));
        }
        if !(self.decay >= 0.0) {
            return Err(Error::config("Weight decay must be non-negative"));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return Err(Error::config("Momentum must be in [0.0, 1.0)"));
        }
        if !(self.alpha >= 0.0) || !self.alpha.is_finite() {
            return Err(Error::config("Mixup alpha must be non-negative"));
        }
        if self.batch_size == 0 || self.test_batch_size == 0 {
            return Err(Error::config("Batch sizes must be greater than 0"));
        }
        if self.epochs == 0 {
            return Err(Error::config("Number of epochs must be greater than 0"));
        }
        if self.trials == 0 {
            return Err(Error::config("Number of trials must be greater than 0"));
        }
        if self.iterations == 0 {
            return Err(Error::config("Number of iterations must be greater than 0"));
        }
        if self.image_size < 16 {
            return Err(Error::config("Image size must be at least 16"));
        }
        if self.baseline && self.mixup_v2 {
            return Err(Error::config("--baseline and --mixup-v2 cannot be combined"));
        }
        ModelRegistry::builtin().factory(&self.model)?;
        Ok(())
    }

    /// Loss and accuracy policy selected by the flags
    pub fn policy_kind(&self) -> PolicyKind {
        if self.baseline {
            PolicyKind::Baseline
        } else if self.mixup_v2 {
            PolicyKind::MixupWithAuxiliary
        } else {
            PolicyKind::Mixup
        }
    }

    pub fn loss_averaging(&self) -> LossAveraging {
        if self.legacy_loss_average {
            LossAveraging::LegacyBatchIndex
        } else {
            LossAveraging::BatchCount
        }
    }

    /// Resolve the configured device
    pub fn select_device(&self) -> Result<Device> {
        let device = match self.device {
            DeviceType::Cpu => Device::Cpu,
            DeviceType::Cuda => Device::new_cuda(0)?,
            DeviceType::Metal => Device::new_metal(0)?,
            DeviceType::Auto => {
                if candle_core::utils::cuda_is_available() {
                    Device::new_cuda(0)?
                } else if candle_core::utils::metal_is_available() {
                    Device::new_metal(0)?
                } else {
                    Device::Cpu
                }
            }
        };
        info!("Using device {:?}", device);
        Ok(device)
    }
}

/// Command-line overrides; anything left unset keeps the file or default value
#[derive(Args, Debug, Clone, Default)]
pub struct SweepArgs {
    /// Configuration file (JSON or YAML) applied before the options below
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Learning rate
    #[arg(long)]
    pub lr: Option<f64>,

    /// Resume from checkpoint
    #[arg(short = 'r', long)]
    pub resume: bool,

    /// Model architecture
    #[arg(long, value_parser = parse_architecture)]
    pub model: Option<String>,

    /// Name of run
    #[arg(long)]
    pub name: Option<String>,

    /// Random seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Training batch size
    #[arg(long, alias = "batch_size")]
    pub batch_size: Option<usize>,

    /// Evaluation batch size
    #[arg(long, alias = "test_batch_size")]
    pub test_batch_size: Option<usize>,

    /// Total epochs to run
    #[arg(long, alias = "epochs")]
    pub epoch: Option<usize>,

    /// Disable standard augmentation
    #[arg(long, alias = "no_augment")]
    pub no_augment: bool,

    /// Weight decay
    #[arg(long)]
    pub decay: Option<f64>,

    /// SGD momentum
    #[arg(long)]
    pub momentum: Option<f64>,

    /// Mixup interpolation coefficient
    #[arg(long)]
    pub alpha: Option<f64>,

    /// Directory with one subdirectory per dataset
    #[arg(long, alias = "dataset_dir")]
    pub dataset_dir: Option<PathBuf>,

    /// Number of trials
    #[arg(long)]
    pub trials: Option<usize>,

    /// Train without mixup
    #[arg(short = 'b', long)]
    pub baseline: bool,

    /// Number of iterations
    #[arg(long)]
    pub iterations: Option<usize>,

    /// Input image size
    #[arg(long, alias = "image_size")]
    pub image_size: Option<u32>,

    /// Mixup with an extra loss on the unmixed prediction
    #[arg(long, alias = "mixup_v2", alias = "v2")]
    pub mixup_v2: bool,

    /// Image decoding threads per loader
    #[arg(long)]
    pub workers: Option<usize>,

    /// Device to use
    #[arg(long, value_enum)]
    pub device: Option<DeviceType>,

    /// Checkpoint directory
    #[arg(long, alias = "checkpoint_dir")]
    pub checkpoint_dir: Option<PathBuf>,

    /// Root of logs and summaries
    #[arg(long, alias = "output_dir")]
    pub output_dir: Option<PathBuf>,

    /// Average epoch loss over the last batch index
    #[arg(long, alias = "legacy_loss_average")]
    pub legacy_loss_average: bool,
}

impl SweepArgs {
    /// Apply every option that was given on top of `config`
    pub fn apply(&self, config: &mut SweepConfig) {
        if let Some(lr) = self.lr {
            config.lr = lr;
        }
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(name) = &self.name {
            config.name = name.clone();
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(test_batch_size) = self.test_batch_size {
            config.test_batch_size = test_batch_size;
        }
        if let Some(epochs) = self.epoch {
            config.epochs = epochs;
        }
        if let Some(decay) = self.decay {
            config.decay = decay;
        }
        if let Some(momentum) = self.momentum {
            config.momentum = momentum;
        }
        if let Some(alpha) = self.alpha {
            config.alpha = alpha;
        }
        if let Some(dir) = &self.dataset_dir {
            config.dataset_dir = dir.clone();
        }
        if let Some(trials) = self.trials {
            config.trials = trials;
        }
        if let Some(iterations) = self.iterations {
            config.iterations = iterations;
        }
        if let Some(image_size) = self.image_size {
            config.image_size = image_size;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(device) = self.device {
            config.device = device;
        }
        if let Some(dir) = &self.checkpoint_dir {
            config.checkpoint_dir = dir.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }

        config.resume |= self.resume;
        config.baseline |= self.baseline;
        config.mixup_v2 |= self.mixup_v2;
        config.legacy_loss_average |= self.legacy_loss_average;
        if self.no_augment {
            config.augment = false;
        }
    }

    /// Defaults, then the config file, then the options, then validation
    pub fn load(&self) -> anyhow::Result<SweepConfig> {
        let mut config = match &self.config {
            Some(path) => SweepConfig::from_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => SweepConfig::default(),
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }
}
