//! Epoch runner: one training pass and one evaluation pass at a time
//!
//! The runner owns the model, its parameters, the optimizer and the training
//! policy of a single experiment. Everything else a pass needs (the loader,
//! the RNG, the best accuracy so far) is passed in by the sweep.

use candle_nn::VarMap;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use super::checkpoints::{CheckpointManager, CheckpointRecord};
use super::data::DataLoader;
use super::loss::{classification_loss, correct_count};
use super::metrics::{EvalOutcome, LossAveraging, RunningTotals, TrainOutcome};
use super::optimizers::Optimizer;
use super::policy::TrainingPolicy;
use super::progress::ProgressReporter;
use crate::error::Result;
use crate::models::ImageClassifier;
use crate::sweep::ExperimentState;

pub struct EpochRunner {
    model: Box<dyn ImageClassifier>,
    var_map: VarMap,
    optimizer: Box<dyn Optimizer>,
    policy: Box<dyn TrainingPolicy>,
    averaging: LossAveraging,
    show_progress: bool,
}

impl EpochRunner {
    pub fn new(
        model: Box<dyn ImageClassifier>,
        var_map: VarMap,
        optimizer: Box<dyn Optimizer>,
        policy: Box<dyn TrainingPolicy>,
        averaging: LossAveraging,
    ) -> Self {
        Self {
            model,
            var_map,
            optimizer,
            policy,
            averaging,
            show_progress: true,
        }
    }

    /// Draw progress bars during passes (on by default)
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn model(&self) -> &dyn ImageClassifier {
        self.model.as_ref()
    }

    pub fn var_map(&self) -> &VarMap {
        &self.var_map
    }

    pub fn optimizer(&self) -> &dyn Optimizer {
        self.optimizer.as_ref()
    }

    pub fn optimizer_mut(&mut self) -> &mut dyn Optimizer {
        self.optimizer.as_mut()
    }

    pub fn policy(&self) -> &dyn TrainingPolicy {
        self.policy.as_ref()
    }

    /// One pass over the training loader in training mode.
    ///
    /// Batch order and augmentation are drawn from `rng` first, then every
    /// step draws its mixing weight and permutation from the same generator.
    pub fn train(
        &mut self,
        epoch: usize,
        loader: &DataLoader,
        rng: &mut ChaCha8Rng,
    ) -> Result<TrainOutcome> {
        info!("Epoch: {}", epoch);
        let plan = loader.plan_epoch(rng);
        let progress = ProgressReporter::new_or_hidden("train", plan.len() as u64, self.show_progress);
        let mut totals = RunningTotals::new();

        for (batch_idx, planned) in plan.iter().enumerate() {
            let batch = loader.load(planned)?;
            let step = self.policy.step(self.model.as_ref(), &batch, rng)?;
            let loss_value = step.loss.to_scalar::<f32>()? as f64;

            self.optimizer.backward_step(&step.loss)?;

            totals.record(loss_value, 0.0, step.correct, step.total);
            progress.advance_train(&totals);
            debug!("Train batch {} - loss {:.4}", batch_idx, loss_value);
        }
        progress.finish();

        Ok(TrainOutcome {
            loss: totals.epoch_loss(self.averaging),
            reg_loss: totals.epoch_reg_loss(self.averaging),
            accuracy: totals.accuracy(),
        })
    }

    /// One pass over `loader` in evaluation mode against the true labels.
    ///
    /// Writes a checkpoint and raises `state.best_accuracy` only when the
    /// accuracy strictly exceeds the best seen so far.
    pub fn evaluate(
        &self,
        epoch: usize,
        loader: &DataLoader,
        state: &mut ExperimentState,
        checkpoints: &CheckpointManager,
    ) -> Result<EvalOutcome> {
        let plan = loader.plan_in_order();
        let progress = ProgressReporter::new_or_hidden("test", plan.len() as u64, self.show_progress);
        let mut totals = RunningTotals::new();

        for planned in &plan {
            let batch = loader.load(planned)?;
            let logits = self.model.forward_t(&batch.inputs, false)?;
            let loss = classification_loss(&logits, &batch.targets)?.to_scalar::<f32>()? as f64;
            let correct = correct_count(&logits, &batch.targets)?;
            totals.record(loss, 0.0, correct, batch.len());
            progress.advance_eval(&totals);
        }
        progress.finish();

        let accuracy = totals.accuracy();
        let improved = accuracy > state.best_accuracy;
        if improved {
            let record = CheckpointRecord::capture(
                &self.var_map,
                self.model.architecture(),
                self.model.num_classes(),
                accuracy,
                epoch,
                &state.rng,
            )?;
            checkpoints.save(&state.key, &record)?;
            state.best_accuracy = accuracy;
        }

        Ok(EvalOutcome {
            loss: totals.epoch_loss(self.averaging),
            accuracy,
            improved,
        })
    }

    /// `(predicted, true)` class pairs for every sample, in dataset order
    pub fn predict(&self, loader: &DataLoader) -> Result<Vec<(u32, u32)>> {
        let mut pairs = Vec::with_capacity(loader.len());
        for planned in loader.plan_in_order() {
            let batch = loader.load(&planned)?;
            let logits = self.model.forward_t(&batch.inputs, false)?;
            let predicted = logits.argmax(candle_core::D::Minus1)?.to_vec1::<u32>()?;
            let labels = batch.targets.to_vec1::<u32>()?;
            pairs.extend(predicted.into_iter().zip(labels));
        }
        Ok(pairs)
    }
}
