//! Per-epoch running totals and the outcomes reported from them

use serde::{Deserialize, Serialize};

/// How the summed batch losses of an epoch are turned into the reported loss
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossAveraging {
    /// Divide by the number of batches processed
    #[default]
    BatchCount,
    /// Divide by the 0-based index of the last batch (at least 1)
    LegacyBatchIndex,
}

impl LossAveraging {
    fn divisor(self, batches: usize) -> usize {
        match self {
            LossAveraging::BatchCount => batches,
            LossAveraging::LegacyBatchIndex => batches.saturating_sub(1).max(1),
        }
    }
}

/// Accumulators of one Train or Evaluate pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunningTotals {
    pub loss_sum: f64,
    pub reg_loss_sum: f64,
    /// Accuracy credit, fractional under mixup
    pub correct: f64,
    /// Samples credited toward the accuracy denominator
    pub total: usize,
    /// Batches recorded so far
    pub batches: usize,
}

impl RunningTotals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one batch
    pub fn record(&mut self, loss: f64, reg_loss: f64, correct: f64, total: usize) {
        self.loss_sum += loss;
        self.reg_loss_sum += reg_loss;
        self.correct += correct;
        self.total += total;
        self.batches += 1;
    }

    /// Percentage of credited samples, 0 before any sample
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            100.0 * self.correct / self.total as f64
        }
    }

    /// Mean loss over the batches seen so far, as shown on the progress bar
    pub fn running_loss(&self) -> f64 {
        mean(self.loss_sum, self.batches)
    }

    pub fn running_reg_loss(&self) -> f64 {
        mean(self.reg_loss_sum, self.batches)
    }

    /// Reported loss of the finished pass
    pub fn epoch_loss(&self, averaging: LossAveraging) -> f64 {
        if self.batches == 0 {
            return 0.0;
        }
        mean(self.loss_sum, averaging.divisor(self.batches))
    }

    pub fn epoch_reg_loss(&self, averaging: LossAveraging) -> f64 {
        if self.batches == 0 {
            return 0.0;
        }
        mean(self.reg_loss_sum, averaging.divisor(self.batches))
    }
}

fn mean(sum: f64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Result of one training pass
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainOutcome {
    pub loss: f64,
    pub reg_loss: f64,
    pub accuracy: f64,
}

/// Result of one evaluation pass
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalOutcome {
    pub loss: f64,
    pub accuracy: f64,
    /// Whether the accuracy beat the best so far and a checkpoint was written
    pub improved: bool,
}
