use crate::{FloatKernelElem, KernelError, Result};
use rayon::prelude::*;

/// Numerically stable softmax over contiguous rows of length `row_len`, in place.
///
/// Each row has its maximum subtracted before exponentiation, so large masking penalties
/// (`-1e9` and the like) underflow to exactly zero instead of producing `NaN`.
pub fn cpu_softmax<T>(data: &mut [T], row_len: usize) -> Result<()>
where
    T: FloatKernelElem,
{
    if row_len == 0 {
        return if data.is_empty() {
            Ok(())
        } else {
            Err(KernelError::RaggedRows {
                len: data.len(),
                row_len,
            })
        };
    }
    if data.len() % row_len != 0 {
        return Err(KernelError::RaggedRows {
            len: data.len(),
            row_len,
        });
    }

    data.par_chunks_mut(row_len).for_each(|row| {
        let max = row
            .iter()
            .copied()
            .fold(T::neg_infinity(), |acc, x| if x > acc { x } else { acc });

        let mut sum = T::zero();
        for x in row.iter_mut() {
            *x = (*x - max).exp();
            sum += *x;
        }
        for x in row.iter_mut() {
            *x /= sum;
        }
    });

    Ok(())
}
