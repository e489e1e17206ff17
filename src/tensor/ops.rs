use super::{FloatElem, Result, Tensor, TensorElem, TensorError};
use rayon::prelude::*;
use std::ops::{Add, Div, Mul, Sub};

// Element-wise arithmetic between two tensors of identical shape.
macro_rules! impl_bin_op {
    ($trait:ident, $method:ident) => {
        impl<T, const RANK: usize> $trait for &Tensor<T, RANK>
        where
            T: TensorElem,
        {
            type Output = Result<Tensor<T, RANK>>;

            fn $method(self, rhs: Self) -> Self::Output {
                self.zip_with(rhs, |a, b| a.$method(b))
            }
        }
    };
}

impl_bin_op!(Add, add);
impl_bin_op!(Sub, sub);
impl_bin_op!(Mul, mul);
impl_bin_op!(Div, div);

impl<T, const RANK: usize> Tensor<T, RANK>
where
    T: TensorElem,
{
    /// Applies a function element-wise.
    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(T) -> T + Sync + Send,
    {
        let mut out = Tensor::zeros(self.shape);
        out.data
            .par_iter_mut()
            .zip(self.data.par_iter())
            .for_each(|(o, &i)| *o = f(i));
        out
    }

    /// Combines two tensors of identical shape element-wise.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ShapeMismatch` if the shapes differ.
    pub fn zip_with<F>(&self, rhs: &Self, f: F) -> Result<Self>
    where
        F: Fn(T, T) -> T + Sync + Send,
    {
        if self.shape != rhs.shape {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.to_vec(),
                got: rhs.shape.to_vec(),
            });
        }

        let mut out = Tensor::zeros(self.shape);
        out.data
            .par_iter_mut()
            .zip(self.data.par_iter())
            .zip(rhs.data.par_iter())
            .for_each(|((o, &a), &b)| *o = f(a, b));
        Ok(out)
    }

    /// Multiplies every element by `factor`.
    pub fn scale(&self, factor: T) -> Self {
        self.map(|x| x * factor)
    }

    /// Element-wise maximum of two tensors of identical shape.
    pub fn maximum(&self, rhs: &Self) -> Result<Self> {
        self.zip_with(rhs, |a, b| if b > a { b } else { a })
    }

    /// Adds `rhs` to every trailing block of `self` whose shape equals `rhs`'s shape.
    ///
    /// `rhs` must match a suffix of `self`'s shape: a `[d]` bias broadcasts over `[b, l, d]`,
    /// an `[l, d]` positional table broadcasts over the batch axis of `[b, l, d]`.
    pub fn add_broadcast<const R2: usize>(&self, rhs: &Tensor<T, R2>) -> Result<Self> {
        if R2 > RANK || self.shape[RANK - R2..] != rhs.shape[..] {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape[RANK.saturating_sub(R2)..].to_vec(),
                got: rhs.shape.to_vec(),
            });
        }

        let mut out = self.clone();
        let block = rhs.size();
        if block == 0 {
            return Ok(out);
        }
        out.data.par_chunks_mut(block).for_each(|chunk| {
            for (o, &r) in chunk.iter_mut().zip(rhs.data.iter()) {
                *o += r;
            }
        });
        Ok(out)
    }

    /// Matrix multiplication over the last two axes.
    ///
    /// Supports any rank >= 2: `[..., M, K] x [..., K, N] -> [..., M, N]`, where the leading
    /// (batch) axes must match exactly.
    pub fn matmul(&self, rhs: &Self) -> Result<Self> {
        let out_shape = self.matmul_shape(rhs, false)?;
        let data = seq2seq_kernels::cpu_matmul(&self.data, &rhs.data, &self.shape, &rhs.shape)?;
        Tensor::new(data, out_shape)
    }

    /// Computes `self @ rhsᵀ` over the last two axes without materialising the transpose.
    ///
    /// `[..., M, K] x [..., N, K] -> [..., M, N]`. Attention scores are `queries @ keysᵀ`, and a
    /// linear layer is `x @ weightᵀ`, so both use this path.
    pub fn matmul_transposed(&self, rhs: &Self) -> Result<Self> {
        let out_shape = self.matmul_shape(rhs, true)?;
        let data = seq2seq_kernels::cpu_matmul_transposed(
            &self.data,
            &rhs.data,
            &self.shape,
            &rhs.shape,
        )?;
        Tensor::new(data, out_shape)
    }

    fn matmul_shape(&self, rhs: &Self, rhs_transposed: bool) -> Result<[usize; RANK]> {
        if RANK < 2 {
            return Err(TensorError::Unsupported(format!(
                "matmul requires rank >= 2, got {}",
                RANK
            )));
        }
        let mut out_shape = self.shape;
        out_shape[RANK - 1] = if rhs_transposed {
            rhs.shape[RANK - 2]
        } else {
            rhs.shape[RANK - 1]
        };
        if self.shape[..RANK - 2] != rhs.shape[..RANK - 2] {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.to_vec(),
                got: rhs.shape.to_vec(),
            });
        }
        Ok(out_shape)
    }

    /// Swaps the last two axes.
    pub fn transpose(&self) -> Result<Self> {
        if RANK < 2 {
            return Err(TensorError::Unsupported(
                "Transpose requires rank >= 2".into(),
            ));
        }
        let mut new_shape = self.shape;
        new_shape.swap(RANK - 1, RANK - 2);

        let data = seq2seq_kernels::cpu_transpose(&self.data, &self.shape)?;
        Tensor::new(data, new_shape)
    }

    /// Concatenates tensors along the last axis. All leading axes must agree.
    ///
    /// This is how per-head attention outputs `[B, L, D]` become `[B, L, heads * D]`.
    pub fn concat_last(parts: &[Self]) -> Result<Self> {
        let first = parts
            .first()
            .ok_or_else(|| TensorError::Unsupported("concat_last of zero tensors".into()))?;
        if RANK == 0 {
            return Err(TensorError::Unsupported(
                "concat_last requires rank >= 1".into(),
            ));
        }

        let lead = &first.shape[..RANK - 1];
        for part in parts {
            if &part.shape[..RANK - 1] != lead {
                return Err(TensorError::ShapeMismatch {
                    expected: first.shape.to_vec(),
                    got: part.shape.to_vec(),
                });
            }
        }

        let widths: Vec<usize> = parts.iter().map(|p| p.shape[RANK - 1]).collect();
        let total: usize = widths.iter().sum();
        let mut out_shape = first.shape;
        out_shape[RANK - 1] = total;

        let mut out = Tensor::zeros(out_shape);
        if total == 0 {
            return Ok(out);
        }
        out.data
            .par_chunks_mut(total)
            .enumerate()
            .for_each(|(row, out_row)| {
                let mut offset = 0;
                for (part, &width) in parts.iter().zip(widths.iter()) {
                    out_row[offset..offset + width]
                        .copy_from_slice(&part.data[row * width..(row + 1) * width]);
                    offset += width;
                }
            });
        Ok(out)
    }
}

impl<T, const RANK: usize> Tensor<T, RANK>
where
    T: FloatElem,
{
    /// Numerically stable softmax over the last axis.
    pub fn softmax_last_axis(&self) -> Result<Self> {
        if RANK == 0 {
            return Err(TensorError::Unsupported(
                "softmax requires rank >= 1".into(),
            ));
        }
        let mut out = self.clone();
        seq2seq_kernels::cpu_softmax(&mut out.data, self.shape[RANK - 1])?;
        Ok(out)
    }
}

impl<T> Tensor<T, 3>
where
    T: TensorElem,
{
    /// Index of the largest entry along the last axis, `[B, L, V] -> [B, L]`.
    ///
    /// Ties resolve to the lowest index.
    pub fn argmax_last(&self) -> Tensor<usize, 2> {
        let [batch, len, width] = self.shape;
        let mut out = Tensor::<usize, 2>::zeros([batch, len]);
        if width == 0 {
            return out;
        }
        out.data
            .par_iter_mut()
            .zip(self.data.par_chunks(width))
            .for_each(|(o, row)| {
                let mut best = 0;
                for (i, &v) in row.iter().enumerate() {
                    if v > row[best] {
                        best = i;
                    }
                }
                *o = best;
            });
        out
    }

    /// Extracts the feature vectors at sequence position `pos`, `[B, L, V] -> [B, V]`.
    pub fn select_position(&self, pos: usize) -> Result<Tensor<T, 2>> {
        let [batch, len, width] = self.shape;
        if pos >= len {
            return Err(TensorError::IndexOutOfBounds {
                index: vec![pos],
                shape: self.shape.to_vec(),
            });
        }
        let mut data = Vec::with_capacity(batch * width);
        for b in 0..batch {
            let start = (b * len + pos) * width;
            data.extend_from_slice(&self.data[start..start + width]);
        }
        Tensor::new(data, [batch, width])
    }
}
