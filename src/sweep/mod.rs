//! Experiment sweep: dataset -> iteration -> trial -> epoch
//!
//! Every (dataset, iteration, trial) combination is one experiment with its
//! own [`ExperimentKey`], RNG stream, checkpoint file and CSV log. Nothing is
//! isolated between experiments: the first error ends the whole sweep.

pub mod csv_log;
pub mod report;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};

use crate::config::SweepConfig;
use crate::error::{Error, Result};
use crate::models::ModelRegistry;
use crate::training::data::datasets::sorted_subdirectories;
use crate::training::data::{Augmentation, DataLoader, DataLoaderConfig, ImageFolder, Transform};
use crate::training::{
    create_policy, CheckpointManager, EpochRunner, LossAveraging, MultiStepScheduler, Optimizer,
    Scheduler, SgdOptimizer,
};

pub use csv_log::{CsvLog, LogRow};
pub use report::{append_summary, ClassificationReport};

/// Identifies one training run
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExperimentKey {
    pub dataset: String,
    pub iteration: usize,
    pub trial: usize,
    pub run_name: String,
    pub seed: u64,
}

impl ExperimentKey {
    pub fn new(
        dataset: impl Into<String>,
        iteration: usize,
        trial: usize,
        run_name: impl Into<String>,
        seed: u64,
    ) -> Self {
        Self {
            dataset: dataset.into(),
            iteration,
            trial,
            run_name: run_name.into(),
            seed,
        }
    }

    /// `_ite_<i>_trial_<t>_dataset_<d>_`
    pub fn suffix(&self) -> String {
        format!(
            "_ite_{}_trial_{}_dataset_{}_",
            self.iteration, self.trial, self.dataset
        )
    }

    /// RNG stream of this experiment (64-bit FNV-1a of the key)
    pub fn stream_id(&self) -> u64 {
        const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0000_0100_0000_01b3;
        self.to_string()
            .bytes()
            .fold(OFFSET, |hash, byte| (hash ^ byte as u64).wrapping_mul(PRIME))
    }
}

impl fmt::Display for ExperimentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}_{}", self.suffix(), self.run_name, self.seed)
    }
}

/// Mutable state of the running experiment, threaded through every pass
#[derive(Debug, Clone)]
pub struct ExperimentState {
    pub key: ExperimentKey,
    /// Best test accuracy so far; a checkpoint exists iff this was raised
    pub best_accuracy: f64,
    pub start_epoch: usize,
    /// Source of every random draw of the experiment
    pub rng: ChaCha8Rng,
}

impl ExperimentState {
    pub fn new(key: ExperimentKey) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(key.seed);
        rng.set_stream(key.stream_id());
        Self {
            key,
            best_accuracy: 0.0,
            start_epoch: 0,
            rng,
        }
    }
}

/// What one experiment left behind
#[derive(Debug, Clone)]
pub struct ExperimentSummary {
    pub key: ExperimentKey,
    pub best_accuracy: f64,
    pub epochs_run: usize,
    pub log_path: PathBuf,
    /// Set once the final epoch ran and the summary was appended
    pub summary_path: Option<PathBuf>,
}

/// Drives the nested sweep loops
pub struct SweepController {
    config: SweepConfig,
    registry: ModelRegistry,
    device: Device,
    checkpoints: CheckpointManager,
}

impl SweepController {
    /// Validate `config` and pick the device
    pub fn new(config: SweepConfig) -> Result<Self> {
        config.validate()?;
        let device = config.select_device()?;
        Ok(Self::with_device(config, device))
    }

    /// Use `device` as given; `config` must already be valid
    pub fn with_device(config: SweepConfig, device: Device) -> Self {
        let checkpoints = CheckpointManager::new(&config.checkpoint_dir);
        Self {
            config,
            registry: ModelRegistry::builtin(),
            device,
            checkpoints,
        }
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    /// Sorted dataset directories under the dataset root
    pub fn discover_datasets(&self) -> Result<Vec<PathBuf>> {
        let root = &self.config.dataset_dir;
        let no_datasets = || Error::NoDatasets { root: root.clone() };
        if !root.is_dir() {
            return Err(no_datasets());
        }
        let names = sorted_subdirectories(root)?;
        if names.is_empty() {
            return Err(no_datasets());
        }
        Ok(names.into_iter().map(|name| root.join(name)).collect())
    }

    /// Run every experiment of the sweep in order
    pub fn run(&self) -> Result<Vec<ExperimentSummary>> {
        let datasets = self.discover_datasets()?;
        info!(
            "Sweeping {} dataset(s) x {} iteration(s) x {} trial(s) with {} ({})",
            datasets.len(),
            self.config.iterations,
            self.config.trials,
            self.config.model,
            self.config.policy_kind()
        );
        if self.config.loss_averaging() == LossAveraging::LegacyBatchIndex {
            warn!("Epoch losses are divided by the last batch index, not the batch count");
        }

        let mut summaries = Vec::new();
        for dataset_dir in &datasets {
            for iteration in 0..self.config.iterations {
                for trial in 0..self.config.trials {
                    summaries.push(self.run_experiment(dataset_dir, iteration, trial)?);
                }
            }
        }
        Ok(summaries)
    }

    /// One (dataset, iteration, trial) combination from loaders to summary
    pub fn run_experiment(
        &self,
        dataset_dir: &Path,
        iteration: usize,
        trial: usize,
    ) -> Result<ExperimentSummary> {
        let config = &self.config;
        let dataset = dataset_name(dataset_dir);
        info!(
            "Iteration {} Experiment: {} for dataset {}",
            iteration, trial, dataset
        );
        let key = ExperimentKey::new(&dataset, iteration, trial, &config.name, config.seed);
        let mut state = ExperimentState::new(key);

        let loaders = self.build_loaders(dataset_dir)?;
        let num_classes = loaders.test.dataset().num_classes();

        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, &self.device);
        let model = self.registry.build(&config.model, num_classes, vb)?;

        let mut scheduler = MultiStepScheduler::cifar(config.lr);
        if config.resume {
            info!("==> Resuming from checkpoint..");
            let record = self.checkpoints.load(&state.key, &mut state.rng)?;
            if record.architecture != config.model || record.num_classes != num_classes {
                return Err(Error::checkpoint(format!(
                    "checkpoint holds {} with {} classes, expected {} with {}",
                    record.architecture, record.num_classes, config.model, num_classes
                )));
            }
            record.restore_weights(&var_map)?;
            state.best_accuracy = record.accuracy;
            state.start_epoch = record.epoch + 1;
            scheduler.set_last_epoch(record.epoch);
        } else {
            info!("==> Building model..");
        }

        let log = CsvLog::open(config.output_dir.join(format!("results_{}", dataset)).join(
            format!(
                "log_{}_{}_{}_{}.csv",
                state.key.suffix(),
                model.architecture(),
                config.name,
                config.seed
            ),
        ))?;

        info!("Training {} on {:?}", model.architecture(), self.device);

        let mut optimizer = SgdOptimizer::new(&var_map, config.lr, config.momentum, config.decay);
        optimizer.set_learning_rate(scheduler.get_lr());
        let mut runner = EpochRunner::new(
            model,
            var_map,
            Box::new(optimizer),
            create_policy(config.policy_kind(), config.alpha),
            config.loss_averaging(),
        )
        .with_progress(config.progress);

        let mut epochs_run = 0;
        let mut summary_path = None;
        for epoch in state.start_epoch..config.epochs {
            let train = runner.train(epoch, &loaders.train, &mut state.rng)?;
            let test = runner.evaluate(epoch, &loaders.test, &mut state, &self.checkpoints)?;

            scheduler.step(None);
            runner.optimizer_mut().set_learning_rate(scheduler.get_lr());

            log.append(&LogRow {
                epoch,
                train_loss: train.loss,
                reg_loss: train.reg_loss,
                train_acc: train.accuracy,
                test_loss: test.loss,
                test_acc: test.accuracy,
            })?;
            info!(
                "Epoch {}: train loss {:.4} acc {:.3}% | test loss {:.4} acc {:.3}%{}",
                epoch,
                train.loss,
                train.accuracy,
                test.loss,
                test.accuracy,
                if test.improved { " (best)" } else { "" }
            );
            epochs_run += 1;

            if epoch + 1 == config.epochs {
                summary_path = Some(self.write_summary(&runner, &loaders, &state, &dataset)?);
            }
        }

        if epochs_run == 0 {
            info!(
                "{} already trained to epoch {}, nothing to do",
                state.key, state.start_epoch
            );
        }

        Ok(ExperimentSummary {
            key: state.key,
            best_accuracy: state.best_accuracy,
            epochs_run,
            log_path: log.path().to_path_buf(),
            summary_path,
        })
    }

    fn build_loaders(&self, dataset_dir: &Path) -> Result<Loaders> {
        let config = &self.config;
        let train_set = Arc::new(ImageFolder::open(dataset_dir.join("train"))?);
        let test_set = Arc::new(ImageFolder::open(dataset_dir.join("test"))?);
        if train_set.classes() != test_set.classes() {
            return Err(Error::dataset(format!(
                "train classes {:?} differ from test classes {:?} in {}",
                train_set.classes(),
                test_set.classes(),
                dataset_dir.display()
            )));
        }

        let train_transform = if config.augment {
            Transform::train(config.image_size, Augmentation::default())
        } else {
            Transform::eval(config.image_size)
        };
        let train = DataLoader::new(
            train_set.clone(),
            train_transform,
            DataLoaderConfig {
                batch_size: config.batch_size,
                shuffle: true,
                num_workers: config.workers,
                drop_last: false,
            },
            self.device.clone(),
        )?;

        let eval_config = DataLoaderConfig {
            batch_size: config.test_batch_size,
            shuffle: false,
            num_workers: config.workers,
            drop_last: false,
        };
        let test = DataLoader::new(
            test_set,
            Transform::eval(config.image_size),
            eval_config.clone(),
            self.device.clone(),
        )?;
        let train_report = DataLoader::new(
            train_set,
            Transform::eval(config.image_size),
            eval_config,
            self.device.clone(),
        )?;

        Ok(Loaders {
            train,
            test,
            train_report,
        })
    }

    /// Reload the best weights and append test and train reports
    fn write_summary(
        &self,
        runner: &EpochRunner,
        loaders: &Loaders,
        state: &ExperimentState,
        dataset: &str,
    ) -> Result<PathBuf> {
        let record = self.checkpoints.read(&state.key)?;
        record.restore_weights(runner.var_map())?;

        let classes = loaders.test.dataset().classes();
        let test = ClassificationReport::from_predictions(classes, &runner.predict(&loaders.test)?);
        let train =
            ClassificationReport::from_predictions(classes, &runner.predict(&loaders.train_report)?);

        std::fs::create_dir_all(&self.config.output_dir)?;
        let path = self.config.output_dir.join(format!("{}_.txt", dataset));
        append_summary(
            &path,
            dataset,
            state.key.iteration,
            state.key.trial,
            &test,
            &train,
        )?;
        info!(
            "Best model (acc {:.3}%, epoch {}) summarised in {}",
            record.accuracy,
            record.epoch,
            path.display()
        );
        Ok(path)
    }
}

struct Loaders {
    train: DataLoader,
    test: DataLoader,
    /// Train split without augmentation or shuffling
    train_report: DataLoader,
}

fn dataset_name(dir: &Path) -> String {
    dir.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string())
}
