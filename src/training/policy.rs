//! Training policies: how one batch becomes a loss and an accuracy credit

use candle_core::Tensor;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::data::Batch;
use super::loss::{
    classification_loss, correct_count, mixup_correct, mixup_criterion, mixup_criterion_aux,
};
use super::mixup::mixup_data;
use crate::error::Result;
use crate::models::ImageClassifier;

/// Which policy a run trains with, chosen once from the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// No mixing
    Baseline,
    /// Mixed inputs with a blended loss
    Mixup,
    /// Mixup plus a full-weight loss on the unmixed prediction
    MixupWithAuxiliary,
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PolicyKind::Baseline => "baseline",
            PolicyKind::Mixup => "mixup",
            PolicyKind::MixupWithAuxiliary => "mixup_with_auxiliary",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of one training step before the backward pass
pub struct PolicyStep {
    /// Scalar loss to backpropagate
    pub loss: Tensor,
    /// Accuracy credit, fractional under mixing
    pub correct: f64,
    /// Samples credited toward the accuracy denominator
    pub total: usize,
}

/// Loss and accuracy contract shared by every policy
pub trait TrainingPolicy: Send + Sync {
    fn kind(&self) -> PolicyKind;

    /// Run the forward pass(es) for `batch` in training mode
    fn step(
        &self,
        model: &dyn ImageClassifier,
        batch: &Batch,
        rng: &mut dyn RngCore,
    ) -> Result<PolicyStep>;
}

pub struct Baseline;

impl TrainingPolicy for Baseline {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Baseline
    }

    fn step(
        &self,
        model: &dyn ImageClassifier,
        batch: &Batch,
        _rng: &mut dyn RngCore,
    ) -> Result<PolicyStep> {
        let logits = model.forward_t(&batch.inputs, true)?;
        let loss = classification_loss(&logits, &batch.targets)?;
        let correct = correct_count(&logits, &batch.targets)?;
        Ok(PolicyStep {
            loss,
            correct,
            total: batch.len(),
        })
    }
}

pub struct Mixup {
    pub alpha: f64,
}

impl TrainingPolicy for Mixup {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Mixup
    }

    fn step(
        &self,
        model: &dyn ImageClassifier,
        batch: &Batch,
        rng: &mut dyn RngCore,
    ) -> Result<PolicyStep> {
        let mixed = mixup_data(&batch.inputs, &batch.targets, self.alpha, rng)?;
        let logits = model.forward_t(&mixed.inputs, true)?;
        let loss = mixup_criterion(&logits, &mixed.targets_a, &mixed.targets_b, mixed.lam)?;
        let correct = mixup_correct(&logits, &mixed.targets_a, &mixed.targets_b, mixed.lam)?;
        Ok(PolicyStep {
            loss,
            correct,
            total: batch.len(),
        })
    }
}

/// Mixup whose unmixed prediction is taken before mixing and scored as a
/// separate full-credit tally, so every sample counts twice in the total
pub struct MixupWithAuxiliary {
    pub alpha: f64,
}

impl TrainingPolicy for MixupWithAuxiliary {
    fn kind(&self) -> PolicyKind {
        PolicyKind::MixupWithAuxiliary
    }

    fn step(
        &self,
        model: &dyn ImageClassifier,
        batch: &Batch,
        rng: &mut dyn RngCore,
    ) -> Result<PolicyStep> {
        let unmixed_logits = model.forward_t(&batch.inputs, true)?;
        let mixed = mixup_data(&batch.inputs, &batch.targets, self.alpha, rng)?;
        let logits = model.forward_t(&mixed.inputs, true)?;

        let loss = mixup_criterion_aux(
            &logits,
            &mixed.targets_a,
            &mixed.targets_b,
            mixed.lam,
            &unmixed_logits,
        )?;
        let correct = mixup_correct(&logits, &mixed.targets_a, &mixed.targets_b, mixed.lam)?
            + correct_count(&unmixed_logits, &batch.targets)?;
        Ok(PolicyStep {
            loss,
            correct,
            total: 2 * batch.len(),
        })
    }
}

/// Instantiate the policy for a run
pub fn create_policy(kind: PolicyKind, alpha: f64) -> Box<dyn TrainingPolicy> {
    match kind {
        PolicyKind::Baseline => Box::new(Baseline),
        PolicyKind::Mixup => Box::new(Mixup { alpha }),
        PolicyKind::MixupWithAuxiliary => Box::new(MixupWithAuxiliary { alpha }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ModelRegistry;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn setup() -> (VarMap, Box<dyn ImageClassifier>, Batch) {
        let device = Device::Cpu;
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, &device);
        let model = ModelRegistry::builtin().build("LeNet", 2, vb).unwrap();
        let inputs = Tensor::randn(0f32, 1f32, (4, 3, 16, 16), &device).unwrap();
        let targets = Tensor::new(&[0u32, 1, 0, 1], &device).unwrap();
        (var_map, model, Batch { inputs, targets })
    }

    #[test]
    fn test_factory_kinds() {
        for kind in [PolicyKind::Baseline, PolicyKind::Mixup, PolicyKind::MixupWithAuxiliary] {
            assert_eq!(create_policy(kind, 1.0).kind(), kind);
        }
    }

    #[test]
    fn test_baseline_step_matches_plain_loss() {
        let (_vars, model, batch) = setup();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let step = Baseline.step(model.as_ref(), &batch, &mut rng).unwrap();
        let logits = model.forward_t(&batch.inputs, true).unwrap();
        let expected = classification_loss(&logits, &batch.targets).unwrap();
        approx::assert_relative_eq!(
            step.loss.to_scalar::<f32>().unwrap(),
            expected.to_scalar::<f32>().unwrap(),
            epsilon = 1e-5
        );
        assert_eq!(step.total, 4);
        assert!(step.correct >= 0.0 && step.correct <= 4.0);
    }

    #[test]
    fn test_mixup_step_credit_is_bounded() {
        let (_vars, model, batch) = setup();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let step = Mixup { alpha: 1.0 }.step(model.as_ref(), &batch, &mut rng).unwrap();
        assert_eq!(step.total, 4);
        assert!(step.correct >= 0.0 && step.correct <= 4.0);
        assert!(step.loss.to_scalar::<f32>().unwrap().is_finite());
    }

    #[test]
    fn test_auxiliary_step_counts_batch_twice() {
        let (_vars, model, batch) = setup();
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let step = MixupWithAuxiliary { alpha: 1.0 }
            .step(model.as_ref(), &batch, &mut rng)
            .unwrap();
        assert_eq!(step.total, 8);
        assert!(step.correct >= 0.0 && step.correct <= 8.0);
    }
}
