//! CIFAR-style residual networks
//!
//! A 3x3 stem keeps full resolution for small inputs; global average pooling
//! before the classifier makes the network independent of the input size.

use candle_core::{Module, ModuleT, Tensor, D};
use candle_nn::{
    batch_norm, conv2d_no_bias, linear, BatchNorm, BatchNormConfig, Conv2d, Conv2dConfig, Linear,
    VarBuilder,
};

use super::ImageClassifier;

fn conv3x3(in_planes: usize, out_planes: usize, stride: usize, vb: VarBuilder) -> candle_core::Result<Conv2d> {
    let cfg = Conv2dConfig {
        padding: 1,
        stride,
        ..Default::default()
    };
    conv2d_no_bias(in_planes, out_planes, 3, cfg, vb)
}

struct Shortcut {
    conv: Conv2d,
    bn: BatchNorm,
}

struct BasicBlock {
    conv1: Conv2d,
    bn1: BatchNorm,
    conv2: Conv2d,
    bn2: BatchNorm,
    shortcut: Option<Shortcut>,
}

impl BasicBlock {
    fn new(in_planes: usize, planes: usize, stride: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        let bn_cfg = BatchNormConfig::default();
        let shortcut = if stride != 1 || in_planes != planes {
            let cfg = Conv2dConfig {
                stride,
                ..Default::default()
            };
            Some(Shortcut {
                conv: conv2d_no_bias(in_planes, planes, 1, cfg, vb.pp("shortcut.0"))?,
                bn: batch_norm(planes, bn_cfg, vb.pp("shortcut.1"))?,
            })
        } else {
            None
        };

        Ok(Self {
            conv1: conv3x3(in_planes, planes, stride, vb.pp("conv1"))?,
            bn1: batch_norm(planes, bn_cfg, vb.pp("bn1"))?,
            conv2: conv3x3(planes, planes, 1, vb.pp("conv2"))?,
            bn2: batch_norm(planes, bn_cfg, vb.pp("bn2"))?,
            shortcut,
        })
    }

    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let out = self.bn1.forward_t(&self.conv1.forward(xs)?, train)?.relu()?;
        let out = self.bn2.forward_t(&self.conv2.forward(&out)?, train)?;
        let residual = match &self.shortcut {
            Some(s) => s.bn.forward_t(&s.conv.forward(xs)?, train)?,
            None => xs.clone(),
        };
        (out + residual)?.relu()
    }
}

/// ResNet built from basic blocks
pub struct ResNet {
    name: &'static str,
    conv1: Conv2d,
    bn1: BatchNorm,
    layers: Vec<BasicBlock>,
    linear: Linear,
    num_classes: usize,
}

impl ResNet {
    fn new(
        name: &'static str,
        num_blocks: [usize; 4],
        num_classes: usize,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        let mut layers = Vec::new();
        let mut in_planes = 64;
        for (stage, (&blocks, planes)) in num_blocks.iter().zip([64, 128, 256, 512]).enumerate() {
            let first_stride = if stage == 0 { 1 } else { 2 };
            for i in 0..blocks {
                let stride = if i == 0 { first_stride } else { 1 };
                let vb_block = vb.pp(format!("layer{}.{}", stage + 1, i));
                layers.push(BasicBlock::new(in_planes, planes, stride, vb_block)?);
                in_planes = planes;
            }
        }

        Ok(Self {
            name,
            conv1: conv3x3(3, 64, 1, vb.pp("conv1"))?,
            bn1: batch_norm(64, BatchNormConfig::default(), vb.pp("bn1"))?,
            layers,
            linear: linear(512, num_classes, vb.pp("linear"))?,
            num_classes,
        })
    }

    pub fn resnet18(num_classes: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        Self::new("ResNet18", [2, 2, 2, 2], num_classes, vb)
    }

    pub fn resnet34(num_classes: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        Self::new("ResNet34", [3, 4, 6, 3], num_classes, vb)
    }
}

impl ImageClassifier for ResNet {
    fn architecture(&self) -> &'static str {
        self.name
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let mut out = self.bn1.forward_t(&self.conv1.forward(xs)?, train)?.relu()?;
        for block in &self.layers {
            out = block.forward_t(&out, train)?;
        }
        let pooled = out.mean(D::Minus1)?.mean(D::Minus1)?;
        self.linear.forward(&pooled)
    }
}
