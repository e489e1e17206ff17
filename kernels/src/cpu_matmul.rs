use crate::{KernelElem, KernelError, Result, matrix_dims};
use rayon::prelude::*;

/// Batched matrix multiplication `lhs @ rhs` over the last two axes.
///
/// Leading axes are batch axes and must agree between both operands.
/// `rhs` is transposed once up front so the inner loop walks both operands sequentially,
/// then the work is handed to [`cpu_matmul_transposed`].
pub fn cpu_matmul<T, const RANK: usize>(
    lhs_data: &[T],
    rhs_data: &[T],
    lhs_shape: &[usize; RANK],
    rhs_shape: &[usize; RANK],
) -> Result<Vec<T>>
where
    T: KernelElem,
{
    let k = lhs_shape[RANK - 1];
    if k != rhs_shape[RANK - 2] {
        return Err(KernelError::ShapeMismatch {
            expected: vec![k],
            got: vec![rhs_shape[RANK - 2]],
        });
    }

    let rhs_t_data = crate::cpu_transpose::cpu_transpose(rhs_data, rhs_shape)?;
    let mut rhs_t_shape = *rhs_shape;
    rhs_t_shape.swap(RANK - 1, RANK - 2);

    cpu_matmul_transposed(lhs_data, &rhs_t_data, lhs_shape, &rhs_t_shape)
}

/// Batched `lhs @ rhsᵀ` over the last two axes, without materialising the transpose.
///
/// `lhs` is `[..., M, K]` and `rhs` is `[..., N, K]`; the result is `[..., M, N]`.
/// This is the shape attention scores take (`queries @ keysᵀ`).
pub fn cpu_matmul_transposed<T, const RANK: usize>(
    lhs_data: &[T],
    rhs_data: &[T],
    lhs_shape: &[usize; RANK],
    rhs_shape: &[usize; RANK],
) -> Result<Vec<T>>
where
    T: KernelElem,
{
    let (batch, m, k) = matrix_dims(lhs_shape);
    let (rhs_batch, n, rhs_k) = matrix_dims(rhs_shape);

    if lhs_shape[..RANK - 2] != rhs_shape[..RANK - 2] || batch != rhs_batch {
        return Err(KernelError::ShapeMismatch {
            expected: lhs_shape.to_vec(),
            got: rhs_shape.to_vec(),
        });
    }
    if k != rhs_k {
        return Err(KernelError::ShapeMismatch {
            expected: vec![k],
            got: vec![rhs_k],
        });
    }
    if lhs_data.len() != batch * m * k || rhs_data.len() != rhs_batch * n * rhs_k {
        return Err(KernelError::ShapeMismatch {
            expected: vec![batch * m * k, rhs_batch * n * rhs_k],
            got: vec![lhs_data.len(), rhs_data.len()],
        });
    }

    let mut out_data = vec![T::zero(); batch * m * n];
    if n == 0 {
        return Ok(out_data);
    }

    out_data
        .par_chunks_mut(n)
        .enumerate()
        .for_each(|(global_row, out_row)| {
            let batch_idx = global_row / m.max(1);
            let lhs_start = global_row * k;
            let lhs_row = &lhs_data[lhs_start..lhs_start + k];
            let rhs_matrix = &rhs_data[batch_idx * n * k..(batch_idx + 1) * n * k];

            for (out_elem, rhs_row) in out_row.iter_mut().zip(rhs_matrix.chunks_exact(k.max(1))) {
                let mut sum = T::zero();
                for (&a, &b) in lhs_row.iter().zip(rhs_row.iter()) {
                    sum += a * b;
                }
                *out_elem = sum;
            }
        });

    Ok(out_data)
}
