//! Fixed-rank tensors.
//!
//! Every value the translation model touches is a [`Tensor`]: token ids (`[batch, length]`),
//! embeddings (`[batch, length, d_model]`), attention scores (`[batch, length_q, length_kv]`)
//! and layer weights. A tensor is a flat `Vec` plus a shape whose length (the rank) is part of
//! the type, so a rank-3 activation can never be passed where a rank-2 weight is expected.
//!
//! ```rust
//! use seq2seq_rs::tensor::Tensor;
//!
//! let embeddings = Tensor::<f32, 3>::from_fn([1, 2, 3], |[_, l, i]| (l * 3 + i) as f32);
//! assert_eq!(embeddings.shape(), &[1, 2, 3]);
//! assert_eq!(embeddings.get([0, 1, 0]).unwrap(), 3.0);
//! ```
//!
//! > [!NOTE]
//! > Storage is row-major: the last axis is contiguous. Softmax, layer normalisation and the
//! > dense projections all work on contiguous feature rows and depend on this.

use num_traits::{Float, FromPrimitive, Num, NumAssign, ToPrimitive};
use std::fmt::Debug;
use thiserror::Error;

pub mod ops;

/// Failures of tensor arithmetic. Every one of them is a caller-side shape problem.
#[derive(Error, Debug)]
pub enum TensorError {
    /// Operand shapes are incompatible.
    #[error("incompatible shapes: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    /// A coordinate or token id lies outside its axis.
    #[error("index {index:?} is outside shape {shape:?}")]
    IndexOutOfBounds {
        index: Vec<usize>,
        shape: Vec<usize>,
    },
    /// The operation is undefined for this rank or input.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, TensorError>;

impl From<seq2seq_kernels::KernelError> for TensorError {
    fn from(err: seq2seq_kernels::KernelError) -> Self {
        match err {
            seq2seq_kernels::KernelError::ShapeMismatch { expected, got } => {
                TensorError::ShapeMismatch { expected, got }
            }
            other => TensorError::Unsupported(other.to_string()),
        }
    }
}

/// Anything numeric, copyable and shareable across `rayon` workers.
///
/// Integer types qualify too, which is how token ids are carried (`Tensor<usize, 2>`).
pub trait TensorElem:
    Num + NumAssign + Copy + Clone + Debug + Send + Sync + FromPrimitive + ToPrimitive + PartialOrd
{
}

impl<T> TensorElem for T where
    T: Num
        + NumAssign
        + Copy
        + Clone
        + Debug
        + Send
        + Sync
        + FromPrimitive
        + ToPrimitive
        + PartialOrd
{
}

/// Floating point elements: everything with learned parameters or a softmax runs on these.
pub trait FloatElem: TensorElem + Float {}

impl<T> FloatElem for T where T: TensorElem + Float {}

/// Row-major array of `T` with `RANK` axes.
///
/// The rank lives in the type while the dimensions stay runtime values, so one model instance
/// handles any batch size and sequence length. Shape mismatches are therefore reported as
/// `TensorError::ShapeMismatch` at runtime instead of failing to compile.
#[derive(Clone, PartialEq)]
pub struct Tensor<T, const RANK: usize>
where
    T: TensorElem,
{
    shape: [usize; RANK],
    strides: [usize; RANK],
    data: Vec<T>,
}

impl<T, const RANK: usize> Tensor<T, RANK>
where
    T: TensorElem,
{
    /// Wraps `data` as a tensor of the given shape.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` unless `data.len()` equals the product of `shape`.
    pub fn new(data: Vec<T>, shape: [usize; RANK]) -> Result<Self> {
        let size: usize = shape.iter().product();
        if data.len() != size {
            return Err(TensorError::ShapeMismatch {
                expected: vec![size],
                got: vec![data.len()],
            });
        }

        Ok(Self {
            shape,
            strides: compute_strides(&shape),
            data,
        })
    }

    /// All-zero tensor.
    pub fn zeros(shape: [usize; RANK]) -> Self {
        Self::full(shape, T::zero())
    }

    /// All-one tensor.
    pub fn ones(shape: [usize; RANK]) -> Self {
        Self::full(shape, T::one())
    }

    /// Tensor with every element set to `value`.
    pub fn full(shape: [usize; RANK], value: T) -> Self {
        let size: usize = shape.iter().product();
        Self {
            shape,
            strides: compute_strides(&shape),
            data: vec![value; size],
        }
    }

    /// Creates a Tensor by evaluating `f` at every multi-dimensional index, in row-major order.
    ///
    /// ```rust
    /// use seq2seq_rs::tensor::Tensor;
    ///
    /// let eye = Tensor::<f32, 2>::from_fn([2, 2], |[r, c]| if r == c { 1.0 } else { 0.0 });
    /// assert_eq!(eye.data(), &[1.0, 0.0, 0.0, 1.0]);
    /// ```
    pub fn from_fn<F>(shape: [usize; RANK], f: F) -> Self
    where
        F: Fn([usize; RANK]) -> T,
    {
        let strides = compute_strides(&shape);
        let size: usize = shape.iter().product();
        let data = (0..size)
            .map(|flat| {
                let mut index = [0; RANK];
                for axis in 0..RANK {
                    index[axis] = (flat / strides[axis]) % shape[axis];
                }
                f(index)
            })
            .collect();

        Self {
            shape,
            strides,
            data,
        }
    }

    /// Reinterprets the same elements under `new_shape`, which may have a different rank.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` if `new_shape` holds a different number of elements.
    pub fn reshape<const NEW_RANK: usize>(
        self,
        new_shape: [usize; NEW_RANK],
    ) -> Result<Tensor<T, NEW_RANK>> {
        let new_size: usize = new_shape.iter().product();
        if self.data.len() != new_size {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.to_vec(),
                got: new_shape.to_vec(),
            });
        }

        Ok(Tensor {
            shape: new_shape,
            strides: compute_strides(&new_shape),
            data: self.data,
        })
    }

    pub fn shape(&self) -> &[usize; RANK] {
        &self.shape
    }

    /// Elements skipped per step along each axis.
    pub fn strides(&self) -> &[usize; RANK] {
        &self.strides
    }

    /// Flat row-major storage.
    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Borrows the shape and the mutable storage at the same time.
    pub fn shape_and_data_mut(&mut self) -> (&[usize; RANK], &mut [T]) {
        (&self.shape, &mut self.data)
    }

    /// Consumes the tensor and returns its flat storage.
    pub fn into_data(self) -> Vec<T> {
        self.data
    }

    /// Number of elements.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Returns the element at `index`.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::IndexOutOfBounds` if any coordinate exceeds its dimension.
    pub fn get(&self, index: [usize; RANK]) -> Result<T> {
        let mut offset = 0;
        for axis in 0..RANK {
            if index[axis] >= self.shape[axis] {
                return Err(TensorError::IndexOutOfBounds {
                    index: index.to_vec(),
                    shape: self.shape.to_vec(),
                });
            }
            offset += index[axis] * self.strides[axis];
        }
        Ok(self.data[offset])
    }
}

/// Row-major strides: the last axis has stride 1.
fn compute_strides<const RANK: usize>(shape: &[usize; RANK]) -> [usize; RANK] {
    let mut strides = [0; RANK];
    let mut stride = 1;
    for i in (0..RANK).rev() {
        strides[i] = stride;
        stride *= shape[i];
    }
    strides
}

impl<T, const RANK: usize> Debug for Tensor<T, RANK>
where
    T: TensorElem,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("data_len", &self.data.len())
            .finish()
    }
}
