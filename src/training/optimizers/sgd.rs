//! SGD optimizer implementation with momentum
//!
//! This module provides the Stochastic Gradient Descent optimizer with
//! momentum and L2 weight decay folded into the gradient.

use std::collections::HashMap;

use candle_core::backprop::GradStore;
use candle_core::Var;
use candle_nn::VarMap;

use super::Optimizer;
use crate::error::Result;

/// SGD optimizer with momentum
pub struct SgdOptimizer {
    /// Variable map containing parameters
    var_map: VarMap,

    /// Learning rate
    learning_rate: f64,

    /// Momentum coefficient
    momentum: f64,

    /// Weight decay coefficient
    weight_decay: f64,

    /// Current step count
    step_count: usize,

    /// Momentum buffers keyed by variable name
    momentum_buffers: HashMap<String, Var>,
}

impl SgdOptimizer {
    /// Create a new SGD optimizer over every variable of `var_map`
    pub fn new(var_map: &VarMap, learning_rate: f64, momentum: f64, weight_decay: f64) -> Self {
        Self {
            var_map: var_map.clone(),
            learning_rate,
            momentum,
            weight_decay,
            step_count: 0,
            momentum_buffers: HashMap::new(),
        }
    }

    pub fn momentum(&self) -> f64 {
        self.momentum
    }

    pub fn weight_decay(&self) -> f64 {
        self.weight_decay
    }

    /// `g' = g + wd * p`, `v = mu * v + g'`, `p = p - lr * v`
    fn update_parameter(&mut self, name: &str, param: &Var, grad: &candle_core::Tensor) -> Result<()> {
        let effective_grad = if self.weight_decay > 0.0 {
            (grad + param.as_tensor().affine(self.weight_decay, 0.0)?)?
        } else {
            grad.clone()
        };

        let update = if self.momentum > 0.0 {
            let velocity = match self.momentum_buffers.get(name) {
                // First step seeds the buffer with the gradient itself
                None => effective_grad,
                Some(buffer) => (buffer.as_tensor().affine(self.momentum, 0.0)? + effective_grad)?,
            };
            match self.momentum_buffers.get(name) {
                Some(buffer) => buffer.set(&velocity)?,
                None => {
                    let buffer = Var::from_tensor(&velocity)?;
                    self.momentum_buffers.insert(name.to_string(), buffer);
                }
            }
            velocity
        } else {
            effective_grad
        };

        let updated = (param.as_tensor() - update.affine(self.learning_rate, 0.0)?)?;
        param.set(&updated)?;
        Ok(())
    }
}

impl Optimizer for SgdOptimizer {
    fn name(&self) -> &str {
        if self.momentum > 0.0 {
            "sgd_momentum"
        } else {
            "sgd"
        }
    }

    fn step(&mut self, gradients: &GradStore) -> Result<()> {
        // Batch-norm running statistics receive no gradient and are skipped.
        let params: Vec<(String, Var)> = {
            let data = self
                .var_map
                .data()
                .lock()
                .map_err(|_| candle_core::Error::msg("variable map lock poisoned"))?;
            data.iter().map(|(name, var)| (name.clone(), var.clone())).collect()
        };

        for (name, param) in &params {
            if let Some(grad) = gradients.get(param.as_tensor()) {
                self.update_parameter(name, param, grad)?;
            }
        }

        self.step_count += 1;
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }

    fn parameter_count(&self) -> usize {
        self.var_map.all_vars().iter().map(|v| v.elem_count()).sum()
    }

    fn step_count(&self) -> usize {
        self.step_count
    }
}
