//! Cross entropy that ignores padded targets.

use dfdx::prelude::*;
use melodist_core::PAD_INDEX;

use crate::error::{MelodyError, Result};
use crate::nn::Logits;

/// Per-class weights for [masked_cross_entropy()], flattened as
/// `(batch, seq, vocab)`, and the number of real targets `R`.
///
/// Each non-padding target contributes `1 / R` at its own class. Padded
/// targets contribute nothing, so they are in neither the sum nor `R`.
pub fn target_weights(targets: &[usize], vocab_size: usize) -> Result<(Vec<f32>, usize)> {
    let real = targets.iter().filter(|&&t| t != PAD_INDEX).count();
    let mut weights = vec![0.0; targets.len() * vocab_size];
    if real == 0 {
        return Ok((weights, 0));
    }
    let share = 1.0 / real as f32;
    for (i, &t) in targets.iter().enumerate() {
        if t == PAD_INDEX {
            continue;
        }
        if t >= vocab_size {
            return Err(MelodyError::Shape(format!(
                "target class {t} is outside the {vocab_size} logits"
            )));
        }
        weights[i * vocab_size + t] = share;
    }
    Ok((weights, real))
}

/// Mean negative log likelihood of `targets` under `logits`, averaged over
/// the targets that are not [PAD_INDEX].
///
/// `targets` is `(batch, seq)` in row-major order and must match the first
/// two dimensions of `logits`. A batch with no real targets has loss `0`.
pub fn masked_cross_entropy<D: Device<f32>, T: Tape<f32, D>>(
    dev: &D,
    logits: Logits<D, T>,
    targets: &[usize],
) -> Result<Tensor<Rank0, f32, D, T>> {
    let (batch, seq, vocab) = *logits.shape();
    if targets.len() != batch * seq {
        return Err(MelodyError::Shape(format!(
            "{} targets for logits of shape ({batch}, {seq}, {vocab})",
            targets.len()
        )));
    }
    let (weights, _) = target_weights(targets, vocab)?;
    let weights = dev.try_tensor_from_vec(weights, (batch, seq, vocab))?;
    let log_probs = logits.try_log_softmax::<Axis<2>>()?;
    Ok(log_probs
        .try_mul(weights)?
        .try_sum::<Rank0, _>()?
        .try_negate()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::*;

    #[test]
    fn test_weights_divide_by_real_count() {
        let (w, real) = target_weights(&[2, 0, 1, 0], 3).unwrap();
        assert_eq!(real, 2);
        assert_eq!(w, vec![0.0, 0.0, 0.5, 0.0, 0.0, 0.0, 0.0, 0.5, 0.0, 0.0, 0.0, 0.0]);
        assert!(target_weights(&[4], 3).is_err());
    }

    #[test]
    fn test_all_padding_is_zero() {
        let dev = TestDevice::seed_from_u64(0);
        let logits: Logits<_> = dev.sample_normal_like(&(2, 3, 4));
        let grads = Gradients::leaky();
        let loss = masked_cross_entropy(&dev, logits.trace(grads), &[0; 6]).unwrap();
        assert_eq!(loss.array(), 0.0);
        let g = loss.backward();
        assert!(g.get(&logits).as_vec().iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_matches_mean_over_real_positions() {
        let dev: TestDevice = Default::default();
        // uniform logits: every real position costs ln(vocab)
        let logits: Logits<_> = dev.zeros_like(&(1, 4, 5));
        let loss = masked_cross_entropy(&dev, logits, &[1, 2, 0, 0]).unwrap();
        assert_close(loss.array(), 5f32.ln(), 1e-6);

        // padding never changes the value, however much of it there is
        let logits: Logits<_> = dev.zeros_like(&(1, 2, 5));
        let loss = masked_cross_entropy(&dev, logits, &[1, 2]).unwrap();
        assert_close(loss.array(), 5f32.ln(), 1e-6);
    }

    #[test]
    fn test_padded_positions_get_no_gradient() {
        let dev = TestDevice::seed_from_u64(1);
        let logits: Logits<_> = dev.sample_normal_like(&(1, 3, 4));
        let loss =
            masked_cross_entropy(&dev, logits.leaky_trace(), &[3, 0, 1]).unwrap();
        let g = loss.backward().get(&logits).as_vec();
        assert!(g[4..8].iter().all(|x| *x == 0.0));
        assert!(g[..4].iter().any(|x| *x != 0.0));
    }

    #[test]
    fn test_shape_mismatch() {
        let dev: TestDevice = Default::default();
        let logits: Logits<_> = dev.zeros_like(&(1, 2, 3));
        assert!(matches!(
            masked_cross_entropy(&dev, logits, &[1, 2, 1]),
            Err(MelodyError::Shape(_))
        ));
    }
}
