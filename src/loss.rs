//! Forward-only training metrics over decoder output.
//!
//! Both helpers skip positions whose target is the pad token, so padding added to equalise a
//! batch does not count towards the loss or the accuracy.

use crate::tensor::{FloatElem, Result, Tensor, TensorError};

fn check_targets<T: FloatElem>(probs: &Tensor<T, 3>, targets: &Tensor<usize, 2>) -> Result<()> {
    let [batch, len, _] = *probs.shape();
    if targets.shape() != &[batch, len] {
        return Err(TensorError::ShapeMismatch {
            expected: vec![batch, len],
            got: targets.shape().to_vec(),
        });
    }
    Ok(())
}

/// Mean negative log-probability of the target tokens.
///
/// `probs` is `[B, L, V]` (rows already softmax-normalised), `targets` is `[B, L]`.
/// Probabilities are clamped to `[1e-7, 1]` before the logarithm. Returns zero when every
/// target is padding.
pub fn masked_cross_entropy<T: FloatElem>(
    probs: &Tensor<T, 3>,
    targets: &Tensor<usize, 2>,
    pad: usize,
) -> Result<T> {
    check_targets(probs, targets)?;
    let [_, _, vocab] = *probs.shape();
    let floor = T::from_f64(1e-7).unwrap_or_else(T::epsilon);

    let mut total = T::zero();
    let mut count = 0usize;
    for (row, &target) in probs.data().chunks(vocab.max(1)).zip(targets.data()) {
        if target == pad {
            continue;
        }
        let p = *row.get(target).ok_or_else(|| TensorError::IndexOutOfBounds {
            index: vec![target],
            shape: probs.shape().to_vec(),
        })?;
        total = total - p.max(floor).min(T::one()).ln();
        count += 1;
    }

    if count == 0 {
        return Ok(T::zero());
    }
    Ok(total / T::from_usize(count).unwrap_or_else(T::one))
}

/// Fraction of non-pad positions whose arg-max prediction equals the target.
pub fn masked_accuracy<T: FloatElem>(
    probs: &Tensor<T, 3>,
    targets: &Tensor<usize, 2>,
    pad: usize,
) -> Result<T> {
    check_targets(probs, targets)?;
    let predictions = probs.argmax_last();

    let (hits, count) = predictions
        .data()
        .iter()
        .zip(targets.data())
        .filter(|&(_, &target)| target != pad)
        .fold((0usize, 0usize), |(hits, count), (&pred, &target)| {
            (hits + usize::from(pred == target), count + 1)
        });

    if count == 0 {
        return Ok(T::zero());
    }
    let hits = T::from_usize(hits).unwrap_or_else(T::zero);
    Ok(hits / T::from_usize(count).unwrap_or_else(T::one))
}
