//! Optimizers and learning rate schedulers for sweep training
//!
//! SGD with momentum and L2 weight decay drives every run; the learning rate
//! follows a multi-step decay applied once per epoch.

pub mod schedulers;
pub mod sgd;

pub use schedulers::{MultiStepScheduler, Scheduler};
pub use sgd::SgdOptimizer;

use candle_core::backprop::GradStore;
use candle_core::Tensor;

use crate::error::Result;

/// Trait for optimizers
pub trait Optimizer: Send {
    /// Optimizer name
    fn name(&self) -> &str;

    /// Apply one update from the gradients of a backward pass
    fn step(&mut self, gradients: &GradStore) -> Result<()>;

    /// Get current learning rate
    fn learning_rate(&self) -> f64;

    /// Set learning rate
    fn set_learning_rate(&mut self, lr: f64);

    /// Get parameter count
    fn parameter_count(&self) -> usize;

    /// Get current step count
    fn step_count(&self) -> usize;

    /// Backpropagate `loss` and apply the update.
    ///
    /// Every backward pass produces a fresh gradient store, so gradients
    /// never accumulate across steps.
    fn backward_step(&mut self, loss: &Tensor) -> Result<()> {
        let gradients = loss.backward()?;
        self.step(&gradients)
    }
}
