//! Mixup data augmentation
//!
//! Trains on convex combinations of sample pairs: every input is blended with
//! a randomly chosen partner from the same batch, and the loss is blended the
//! same way between the two labels.

use candle_core::Tensor;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Beta, Distribution};

use crate::error::{Error, Result};

/// Blended inputs with both label vectors and the mixing weight
#[derive(Debug, Clone)]
pub struct MixedBatch {
    /// `lam * x + (1 - lam) * x[perm]`
    pub inputs: Tensor,
    /// Original labels
    pub targets_a: Tensor,
    /// Labels of the permuted partners
    pub targets_b: Tensor,
    /// Mixing weight in [0, 1]
    pub lam: f64,
    /// The permutation applied to the batch
    pub permutation: Vec<u32>,
}

/// Draw the mixing weight: `Beta(alpha, alpha)`, or exactly 1 when `alpha` is 0
pub fn sample_lambda<R: Rng + ?Sized>(alpha: f64, rng: &mut R) -> Result<f64> {
    if alpha < 0.0 || !alpha.is_finite() {
        return Err(Error::config(format!("mixup alpha must be >= 0, got {}", alpha)));
    }
    if alpha == 0.0 {
        return Ok(1.0);
    }
    let beta = Beta::new(alpha, alpha)
        .map_err(|e| Error::config(format!("invalid mixup alpha {}: {}", alpha, e)))?;
    Ok(beta.sample(rng))
}

/// Uniformly random permutation of `0..n`
pub fn random_permutation<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Vec<u32> {
    let mut index: Vec<u32> = (0..n as u32).collect();
    index.shuffle(rng);
    index
}

/// Mix a batch with a random permutation of itself.
///
/// Consumes one Beta draw (none when `alpha` is 0) and one permutation from
/// `rng`. The blend runs on the device the inputs already live on.
pub fn mixup_data<R: Rng + ?Sized>(
    inputs: &Tensor,
    targets: &Tensor,
    alpha: f64,
    rng: &mut R,
) -> Result<MixedBatch> {
    let lam = sample_lambda(alpha, rng)?;

    let batch_size = inputs.dim(0)?;
    let permutation = random_permutation(batch_size, rng);
    let index = Tensor::from_slice(&permutation, batch_size, inputs.device())?;

    let shuffled = inputs.index_select(&index, 0)?;
    let mixed = (inputs.affine(lam, 0.0)? + shuffled.affine(1.0 - lam, 0.0)?)?;
    let targets_b = targets.index_select(&index, 0)?;

    Ok(MixedBatch {
        inputs: mixed,
        targets_a: targets.clone(),
        targets_b,
        lam,
        permutation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use candle_core::{DType, Device};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn batch(n: usize) -> (Tensor, Tensor) {
        let device = Device::Cpu;
        let values: Vec<f32> = (0..n * 4).map(|v| v as f32).collect();
        let inputs = Tensor::from_vec(values, (n, 1, 2, 2), &device).unwrap();
        let targets = Tensor::from_vec((0..n as u32).collect::<Vec<_>>(), n, &device).unwrap();
        (inputs, targets)
    }

    #[test]
    fn test_lambda_in_open_unit_interval() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for alpha in [0.5, 1.0, 4.0] {
            for _ in 0..500 {
                let lam = sample_lambda(alpha, &mut rng).unwrap();
                assert!(lam > 0.0 && lam < 1.0, "lam {} for alpha {}", lam, alpha);
            }
        }
    }

    #[test]
    fn test_zero_alpha_leaves_batch_unchanged() {
        let (inputs, targets) = batch(6);
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mixed = mixup_data(&inputs, &targets, 0.0, &mut rng).unwrap();
        assert_eq!(mixed.lam, 1.0);
        let diff = (mixed.inputs - &inputs).unwrap().abs().unwrap().sum_all().unwrap();
        assert_eq!(diff.to_scalar::<f32>().unwrap(), 0.0);
        assert_eq!(
            mixed.targets_a.to_vec1::<u32>().unwrap(),
            targets.to_vec1::<u32>().unwrap()
        );
    }

    #[test]
    fn test_negative_alpha_rejected() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert!(sample_lambda(-0.5, &mut rng).is_err());
    }

    #[test]
    fn test_permutation_is_bijection() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        for n in [1, 2, 7, 64] {
            let mut perm = random_permutation(n, &mut rng);
            perm.sort_unstable();
            assert_eq!(perm, (0..n as u32).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_mixed_inputs_and_partner_labels() {
        let (inputs, targets) = batch(5);
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mixed = mixup_data(&inputs, &targets, 1.0, &mut rng).unwrap();

        let original = inputs.flatten_from(1).unwrap().to_vec2::<f32>().unwrap();
        let blended = mixed.inputs.flatten_from(1).unwrap().to_vec2::<f32>().unwrap();
        let partner_labels = mixed.targets_b.to_vec1::<u32>().unwrap();
        for (i, &j) in mixed.permutation.iter().enumerate() {
            assert_eq!(partner_labels[i], j);
            for k in 0..4 {
                let expected =
                    mixed.lam * original[i][k] as f64 + (1.0 - mixed.lam) * original[j as usize][k] as f64;
                assert_relative_eq!(blended[i][k] as f64, expected, epsilon = 1e-4);
            }
        }
        assert_eq!(mixed.inputs.dtype(), DType::F32);
    }

    #[test]
    fn test_single_sample_batch_is_degenerate() {
        let (inputs, targets) = batch(1);
        let mut rng = ChaCha8Rng::seed_from_u64(6);
        let mixed = mixup_data(&inputs, &targets, 1.0, &mut rng).unwrap();
        assert_eq!(mixed.permutation, vec![0]);
        let diff = (mixed.inputs - &inputs).unwrap().abs().unwrap().sum_all().unwrap();
        assert!(diff.to_scalar::<f32>().unwrap() < 1e-4);
    }
}
