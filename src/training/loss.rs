//! Loss blending for baseline and mixup training
//!
//! The classification loss is softmax cross-entropy with mean reduction.
//! Under mixup both the loss and the accuracy credit are split between the
//! original labels and the labels of the permuted partners.

use candle_core::{DType, Tensor, D};
use candle_nn as nn;

use crate::error::Result;

/// Mean cross-entropy of `(batch, classes)` logits against u32 labels
pub fn classification_loss(logits: &Tensor, targets: &Tensor) -> Result<Tensor> {
    Ok(nn::loss::cross_entropy(logits, targets)?)
}

/// `lam * CE(pred, y_a) + (1 - lam) * CE(pred, y_b)`
pub fn mixup_criterion(
    logits: &Tensor,
    targets_a: &Tensor,
    targets_b: &Tensor,
    lam: f64,
) -> Result<Tensor> {
    let loss_a = classification_loss(logits, targets_a)?.affine(lam, 0.0)?;
    let loss_b = classification_loss(logits, targets_b)?.affine(1.0 - lam, 0.0)?;
    Ok((loss_a + loss_b)?)
}

/// Mixup loss plus the full cross-entropy of the unmixed prediction against
/// the original labels
pub fn mixup_criterion_aux(
    logits: &Tensor,
    targets_a: &Tensor,
    targets_b: &Tensor,
    lam: f64,
    unmixed_logits: &Tensor,
) -> Result<Tensor> {
    let mixed = mixup_criterion(logits, targets_a, targets_b, lam)?;
    let auxiliary = classification_loss(unmixed_logits, targets_a)?;
    Ok((mixed + auxiliary)?)
}

/// Number of rows whose argmax equals the label
pub fn correct_count(logits: &Tensor, targets: &Tensor) -> Result<f64> {
    let predictions = logits.argmax(D::Minus1)?;
    let correct = predictions
        .eq(targets)?
        .to_dtype(DType::F32)?
        .sum_all()?
        .to_scalar::<f32>()?;
    Ok(correct as f64)
}

/// Fractional credit: `lam` per hit on `y_a` plus `1 - lam` per hit on `y_b`
pub fn mixup_correct(
    logits: &Tensor,
    targets_a: &Tensor,
    targets_b: &Tensor,
    lam: f64,
) -> Result<f64> {
    let hits_a = correct_count(logits, targets_a)?;
    let hits_b = correct_count(logits, targets_b)?;
    Ok(lam * hits_a + (1.0 - lam) * hits_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use candle_core::Device;

    fn logits() -> Tensor {
        Tensor::new(&[[2.0f32, 0.5, -1.0], [0.1, 0.2, 3.0], [1.0, 1.5, 0.0]], &Device::Cpu).unwrap()
    }

    fn labels(values: &[u32]) -> Tensor {
        Tensor::new(values, &Device::Cpu).unwrap()
    }

    fn scalar(t: &Tensor) -> f64 {
        t.to_scalar::<f32>().unwrap() as f64
    }

    fn reference_cross_entropy(rows: &[[f32; 3]], targets: &[u32]) -> f64 {
        let total: f64 = rows
            .iter()
            .zip(targets)
            .map(|(row, &t)| {
                let max = row.iter().cloned().fold(f32::MIN, f32::max) as f64;
                let sum: f64 = row.iter().map(|&v| (v as f64 - max).exp()).sum();
                -(row[t as usize] as f64 - max - sum.ln())
            })
            .sum();
        total / rows.len() as f64
    }

    #[test]
    fn test_classification_loss_matches_reference() {
        let rows = [[2.0f32, 0.5, -1.0], [0.1, 0.2, 3.0], [1.0, 1.5, 0.0]];
        let loss = classification_loss(&logits(), &labels(&[0, 2, 0])).unwrap();
        assert_relative_eq!(scalar(&loss), reference_cross_entropy(&rows, &[0, 2, 0]), epsilon = 1e-5);
    }

    #[test]
    fn test_full_weight_mixup_equals_plain_loss() {
        let ya = labels(&[0, 2, 1]);
        let yb = labels(&[1, 0, 2]);
        let plain = scalar(&classification_loss(&logits(), &ya).unwrap());
        let mixed = scalar(&mixup_criterion(&logits(), &ya, &yb, 1.0).unwrap());
        assert_relative_eq!(plain, mixed, epsilon = 1e-6);
    }

    #[test]
    fn test_mixup_criterion_is_convex_combination() {
        let ya = labels(&[0, 2, 1]);
        let yb = labels(&[1, 0, 2]);
        let la = scalar(&classification_loss(&logits(), &ya).unwrap());
        let lb = scalar(&classification_loss(&logits(), &yb).unwrap());
        let mixed = scalar(&mixup_criterion(&logits(), &ya, &yb, 0.3).unwrap());
        assert_relative_eq!(mixed, 0.3 * la + 0.7 * lb, epsilon = 1e-5);
    }

    #[test]
    fn test_auxiliary_term_adds_unmixed_loss() {
        let ya = labels(&[0, 2, 1]);
        let yb = labels(&[1, 0, 2]);
        let unmixed = logits().affine(0.5, 0.0).unwrap();
        let mixed = scalar(&mixup_criterion(&logits(), &ya, &yb, 0.6).unwrap());
        let aux = scalar(&classification_loss(&unmixed, &ya).unwrap());
        let total = scalar(&mixup_criterion_aux(&logits(), &ya, &yb, 0.6, &unmixed).unwrap());
        assert_relative_eq!(total, mixed + aux, epsilon = 1e-5);
    }

    #[test]
    fn test_correct_counts() {
        // argmax per row: 0, 2, 1
        assert_eq!(correct_count(&logits(), &labels(&[0, 2, 1])).unwrap(), 3.0);
        assert_eq!(correct_count(&logits(), &labels(&[0, 0, 0])).unwrap(), 1.0);

        let credit = mixup_correct(&logits(), &labels(&[0, 2, 1]), &labels(&[0, 0, 0]), 0.25).unwrap();
        assert_relative_eq!(credit, 0.25 * 3.0 + 0.75 * 1.0, epsilon = 1e-9);
    }
}
