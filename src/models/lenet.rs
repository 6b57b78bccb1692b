//! LeNet-style convolutional classifier

use candle_core::{Module, Tensor, D};
use candle_nn::{conv2d, linear, Conv2d, Conv2dConfig, Linear, VarBuilder};

use super::ImageClassifier;

/// Two 5x5 convolutions with max pooling followed by three dense layers.
///
/// Spatial features are averaged before the dense head, so the model accepts
/// any input of at least 16x16 pixels.
pub struct LeNet {
    conv1: Conv2d,
    conv2: Conv2d,
    fc1: Linear,
    fc2: Linear,
    fc3: Linear,
    num_classes: usize,
}

impl LeNet {
    pub fn new(num_classes: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        let cfg = Conv2dConfig::default();
        Ok(Self {
            conv1: conv2d(3, 6, 5, cfg, vb.pp("conv1"))?,
            conv2: conv2d(6, 16, 5, cfg, vb.pp("conv2"))?,
            fc1: linear(16, 120, vb.pp("fc1"))?,
            fc2: linear(120, 84, vb.pp("fc2"))?,
            fc3: linear(84, num_classes, vb.pp("fc3"))?,
            num_classes,
        })
    }
}

impl ImageClassifier for LeNet {
    fn architecture(&self) -> &'static str {
        "LeNet"
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn forward_t(&self, xs: &Tensor, _train: bool) -> candle_core::Result<Tensor> {
        let xs = self.conv1.forward(xs)?.relu()?.max_pool2d(2)?;
        let xs = self.conv2.forward(&xs)?.relu()?.max_pool2d(2)?;
        let xs = xs.mean(D::Minus1)?.mean(D::Minus1)?;
        let xs = self.fc1.forward(&xs)?.relu()?;
        let xs = self.fc2.forward(&xs)?.relu()?;
        self.fc3.forward(&xs)
    }
}
