//! Per-sample image transform: resize, optional crop/flip, normalisation

use std::path::Path;

use image::imageops::FilterType;
use image::RgbImage;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Per-channel normalisation statistics of CIFAR-10
pub const CIFAR_MEAN: [f32; 3] = [0.4914, 0.4822, 0.4465];
pub const CIFAR_STD: [f32; 3] = [0.2023, 0.1994, 0.2010];

/// Random crop with zero padding followed by a random horizontal flip
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Augmentation {
    /// Zero padding added on every side before cropping back to size
    pub padding: u32,
    /// Probability of a horizontal flip
    pub flip_probability: f64,
}

impl Default for Augmentation {
    fn default() -> Self {
        Self {
            padding: 4,
            flip_probability: 0.5,
        }
    }
}

/// The random choices made for one augmented sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropFlip {
    /// Horizontal crop offset into the padded image, in `0..=2 * padding`
    pub dx: u32,
    /// Vertical crop offset into the padded image, in `0..=2 * padding`
    pub dy: u32,
    pub flip: bool,
}

impl Augmentation {
    /// Draw crop offsets and the flip decision
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> CropFlip {
        let span = 2 * self.padding;
        CropFlip {
            dx: rng.random_range(0..=span),
            dy: rng.random_range(0..=span),
            flip: rng.random_bool(self.flip_probability),
        }
    }
}

/// Turns an image file into a normalised CHW float buffer
#[derive(Debug, Clone)]
pub struct Transform {
    image_size: u32,
    augmentation: Option<Augmentation>,
    mean: [f32; 3],
    std: [f32; 3],
}

impl Transform {
    /// Evaluation transform: resize and normalise only
    pub fn eval(image_size: u32) -> Self {
        Self {
            image_size,
            augmentation: None,
            mean: CIFAR_MEAN,
            std: CIFAR_STD,
        }
    }

    /// Training transform with crop/flip augmentation
    pub fn train(image_size: u32, augmentation: Augmentation) -> Self {
        Self {
            augmentation: Some(augmentation),
            ..Self::eval(image_size)
        }
    }

    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    pub fn augmentation(&self) -> Option<&Augmentation> {
        self.augmentation.as_ref()
    }

    /// Number of floats produced per sample
    pub fn sample_len(&self) -> usize {
        3 * (self.image_size as usize) * (self.image_size as usize)
    }

    /// Decode `path` and apply the transform with the given random choices
    pub fn load(&self, path: &Path, choice: Option<CropFlip>) -> Result<Vec<f32>> {
        let img = image::open(path)?;
        let img = if img.width() != self.image_size || img.height() != self.image_size {
            img.resize_exact(self.image_size, self.image_size, FilterType::Triangle)
        } else {
            img
        };
        Ok(self.apply(&img.to_rgb8(), choice))
    }

    /// Apply crop/flip (when both an augmentation and a choice are present)
    /// and normalise into CHW order
    pub fn apply(&self, img: &RgbImage, choice: Option<CropFlip>) -> Vec<f32> {
        let size = self.image_size as i64;
        let (width, height) = (img.width() as i64, img.height() as i64);
        let plane = (size * size) as usize;
        let mut out = vec![0f32; 3 * plane];

        let (pad, choice) = match (self.augmentation, choice) {
            (Some(aug), Some(choice)) => (aug.padding as i64, choice),
            _ => (0, CropFlip { dx: 0, dy: 0, flip: false }),
        };

        for y in 0..size {
            for x in 0..size {
                let src_x = if choice.flip { size - 1 - x } else { x };
                let sx = src_x + choice.dx as i64 - pad;
                let sy = y + choice.dy as i64 - pad;
                let inside = sx >= 0 && sy >= 0 && sx < width && sy < height;
                let offset = (y * size + x) as usize;
                for c in 0..3 {
                    let raw = if inside {
                        img.get_pixel(sx as u32, sy as u32)[c] as f32 / 255.0
                    } else {
                        0.0
                    };
                    out[c * plane + offset] = (raw - self.mean[c]) / self.std[c];
                }
            }
        }
        out
    }
}
