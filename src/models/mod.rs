//! Image classifier zoo
//!
//! Architectures are looked up by name through an explicit [`ModelRegistry`]
//! so that an unknown `--model` value is rejected while the configuration is
//! parsed rather than when the first trial starts.

pub mod lenet;
pub mod resnet;

use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::error::{Error, Result};

pub use lenet::LeNet;
pub use resnet::ResNet;

/// A trainable classifier producing `(batch, num_classes)` logits
pub trait ImageClassifier: Send + Sync {
    /// Registry name of the architecture
    fn architecture(&self) -> &'static str;

    /// Number of output classes
    fn num_classes(&self) -> usize;

    /// Forward pass; `train` toggles batch-norm statistics updates
    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor>;
}

/// Constructor signature shared by every registered architecture
pub type ModelFactory =
    fn(num_classes: usize, vb: VarBuilder) -> candle_core::Result<Box<dyn ImageClassifier>>;

fn build_lenet(num_classes: usize, vb: VarBuilder) -> candle_core::Result<Box<dyn ImageClassifier>> {
    Ok(Box::new(LeNet::new(num_classes, vb)?))
}

fn build_resnet18(num_classes: usize, vb: VarBuilder) -> candle_core::Result<Box<dyn ImageClassifier>> {
    Ok(Box::new(ResNet::resnet18(num_classes, vb)?))
}

fn build_resnet34(num_classes: usize, vb: VarBuilder) -> candle_core::Result<Box<dyn ImageClassifier>> {
    Ok(Box::new(ResNet::resnet34(num_classes, vb)?))
}

/// Name -> factory map of the available architectures
pub struct ModelRegistry {
    entries: Vec<(&'static str, ModelFactory)>,
}

impl ModelRegistry {
    /// Registry with every built-in architecture
    pub fn builtin() -> Self {
        Self {
            entries: vec![
                ("LeNet", build_lenet as ModelFactory),
                ("ResNet18", build_resnet18 as ModelFactory),
                ("ResNet34", build_resnet34 as ModelFactory),
            ],
        }
    }

    /// Registered architecture names in registration order
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|(name, _)| *name).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| *n == name)
    }

    /// Resolve a name, failing with the list of valid names
    pub fn factory(&self, name: &str) -> Result<ModelFactory> {
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, factory)| *factory)
            .ok_or_else(|| Error::UnknownArchitecture {
                name: name.to_string(),
                available: self.names().join(", "),
            })
    }

    /// Build a freshly initialised model whose parameters live in `vb`'s var map
    pub fn build(
        &self,
        name: &str,
        num_classes: usize,
        vb: VarBuilder,
    ) -> Result<Box<dyn ImageClassifier>> {
        if num_classes == 0 {
            return Err(Error::config("a classifier needs at least one class"));
        }
        let factory = self.factory(name)?;
        Ok(factory(num_classes, vb)?)
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// clap value parser accepting only registered architecture names
pub fn parse_architecture(name: &str) -> std::result::Result<String, String> {
    let registry = ModelRegistry::builtin();
    if registry.contains(name) {
        Ok(name.to_string())
    } else {
        Err(format!(
            "unknown architecture '{}' (expected one of: {})",
            name,
            registry.names().join(", ")
        ))
    }
}
