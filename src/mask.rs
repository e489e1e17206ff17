//! Attention masks.
//!
//! Masks are `{0, 1}` tensors where `1` marks a (query, key) pair that must not be attended to.
//! Attention turns them into additive penalties with [`apply_mask`]: `scores + mask * -penalty`.
//!
//! - [`padding_mask`]: hides key positions holding the pad token. Every query row is identical.
//! - [`lookahead_mask`]: hides key positions after the query position (strictly upper triangular).
//! - [`combined_mask`]: element-wise maximum of the two, used by decoder self-attention.

use crate::tensor::{FloatElem, Result, Tensor, TensorError};
use rayon::prelude::*;

fn indicator<T: FloatElem>(masked: bool) -> T {
    if masked {
        T::one()
    } else {
        T::zero()
    }
}

/// `[batch, length]` token ids to a `[batch, length, length]` mask with `mask[b, q, k] = 1` iff
/// `tokens[b, k] == pad`.
pub fn padding_mask<T: FloatElem>(tokens: &Tensor<usize, 2>, pad: usize) -> Tensor<T, 3> {
    let [batch, length] = *tokens.shape();
    let ids = tokens.data();
    Tensor::from_fn([batch, length, length], |[b, _, k]| {
        indicator(ids[b * length + k] == pad)
    })
}

/// `[length, length]` mask with ones strictly above the diagonal.
///
/// Equivalent to `1 - band_part(ones, -1, 0)`.
pub fn lookahead_mask<T: FloatElem>(length: usize) -> Tensor<T, 2> {
    Tensor::from_fn([length, length], |[q, k]| indicator(k > q))
}

/// Padding and lookahead masks of the same target history, merged with an element-wise maximum.
pub fn combined_mask<T: FloatElem>(tokens: &Tensor<usize, 2>, pad: usize) -> Tensor<T, 3> {
    let [batch, length] = *tokens.shape();
    let ids = tokens.data();
    Tensor::from_fn([batch, length, length], |[b, q, k]| {
        indicator(ids[b * length + k] == pad || k > q)
    })
}

/// Returns `scores + mask * -penalty`.
///
/// `scores` is `[B, Lq, Lk]`; `mask` is `[B, Lq, Lk]` or `[1, Lq, Lk]` (shared by the batch).
pub fn apply_mask<T: FloatElem>(
    scores: &Tensor<T, 3>,
    mask: &Tensor<T, 3>,
    penalty: T,
) -> Result<Tensor<T, 3>> {
    let [batch, lq, lk] = *scores.shape();
    let [mask_batch, mask_q, mask_k] = *mask.shape();
    if (mask_batch != batch && mask_batch != 1) || mask_q != lq || mask_k != lk {
        return Err(TensorError::ShapeMismatch {
            expected: scores.shape().to_vec(),
            got: mask.shape().to_vec(),
        });
    }

    let block = lq * lk;
    let mut out = scores.clone();
    if block == 0 {
        return Ok(out);
    }
    let mask_data = mask.data();
    out.data_mut()
        .par_chunks_mut(block)
        .enumerate()
        .for_each(|(b, chunk)| {
            let offset = if mask_batch == 1 { 0 } else { b * block };
            for (s, &m) in chunk.iter_mut().zip(&mask_data[offset..offset + block]) {
                *s -= m * penalty;
            }
        });
    Ok(out)
}
