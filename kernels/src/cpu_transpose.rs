use crate::{KernelElem, KernelError, Result, matrix_dims};
use rayon::prelude::*;

/// Swaps the last two axes of a row-major buffer.
///
/// Work is split over the rows of the output (`[..., N, M]`), each of which gathers one
/// column of the input matrix.
pub fn cpu_transpose<T, const RANK: usize>(data: &[T], shape: &[usize; RANK]) -> Result<Vec<T>>
where
    T: KernelElem,
{
    let (batch, m, n) = matrix_dims(shape);
    if data.len() != batch * m * n {
        return Err(KernelError::ShapeMismatch {
            expected: shape.to_vec(),
            got: vec![data.len()],
        });
    }

    let mut out_data = vec![T::zero(); data.len()];
    if m == 0 || n == 0 {
        return Ok(out_data);
    }

    out_data
        .par_chunks_mut(m)
        .enumerate()
        .for_each(|(i, out_row)| {
            let batch_offset = (i / n) * m * n;
            let col = i % n;
            for (r, out_elem) in out_row.iter_mut().enumerate() {
                *out_elem = data[batch_offset + r * n + col];
            }
        });

    Ok(out_data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transpose_simple() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]; // 2x3

        let result = cpu_transpose(&data, &[2, 3]).unwrap();
        assert_eq!(result, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_transpose_batch() {
        let data = vec![
            1.0, 2.0, 3.0, 4.0, //
            5.0, 6.0, 7.0, 8.0,
        ];

        let result = cpu_transpose(&data, &[2, 2, 2]).unwrap();
        assert_eq!(result, vec![1.0, 3.0, 2.0, 4.0, 5.0, 7.0, 6.0, 8.0]);
    }

    #[test]
    fn test_transpose_twice_is_identity() {
        let data: Vec<f32> = (0..24).map(|x| x as f32).collect();
        let once = cpu_transpose(&data, &[2, 3, 4]).unwrap();
        let twice = cpu_transpose(&once, &[2, 4, 3]).unwrap();
        assert_eq!(twice, data);
    }

    #[test]
    fn test_transpose_rejects_short_buffer() {
        let data = vec![1.0; 5];
        assert!(cpu_transpose(&data, &[2, 3]).is_err());
    }
}
