//! Learning rate schedulers

/// Trait for learning rate schedulers
pub trait Scheduler {
    /// Scheduler name
    fn name(&self) -> &str;

    /// Advance by one epoch
    fn step(&mut self, metric: Option<f64>);

    /// Get current learning rate
    fn get_lr(&self) -> f64;

    /// Reset scheduler to initial state
    fn reset(&mut self);
}

/// Multiplies the base rate by `gamma` once for every milestone reached.
///
/// `lr_for_epoch(e) = base_lr * gamma ^ |{m in milestones : m <= e}|`
#[derive(Debug, Clone)]
pub struct MultiStepScheduler {
    base_lr: f64,
    milestones: Vec<usize>,
    gamma: f64,
    /// Last completed epoch, `None` before the first step
    last_epoch: Option<usize>,
}

impl MultiStepScheduler {
    pub fn new(base_lr: f64, mut milestones: Vec<usize>, gamma: f64) -> Self {
        milestones.sort_unstable();
        Self {
            base_lr,
            milestones,
            gamma,
            last_epoch: None,
        }
    }

    /// Decay by 10x at epoch 100 and again at epoch 150
    pub fn cifar(base_lr: f64) -> Self {
        Self::new(base_lr, vec![100, 150], 0.1)
    }

    pub fn base_lr(&self) -> f64 {
        self.base_lr
    }

    /// Learning rate once `epoch` has completed
    pub fn lr_for_epoch(&self, epoch: usize) -> f64 {
        let reached = self.milestones.iter().filter(|&&m| m <= epoch).count();
        self.base_lr * self.gamma.powi(reached as i32)
    }

    /// Jump to the state after `epoch` completed, as when resuming
    pub fn set_last_epoch(&mut self, epoch: usize) {
        self.last_epoch = Some(epoch);
    }

    pub fn last_epoch(&self) -> Option<usize> {
        self.last_epoch
    }
}

impl Scheduler for MultiStepScheduler {
    fn name(&self) -> &str {
        "multistep"
    }

    fn step(&mut self, _metric: Option<f64>) {
        self.last_epoch = Some(self.last_epoch.map_or(0, |e| e + 1));
    }

    fn get_lr(&self) -> f64 {
        match self.last_epoch {
            Some(epoch) => self.lr_for_epoch(epoch),
            None => self.base_lr,
        }
    }

    fn reset(&mut self) {
        self.last_epoch = None;
    }
}
