//! Slice-level CPU kernels used by `seq2seq-rs`.
//!
//! The kernels operate on flat row-major buffers plus a shape, and know nothing about the
//! `Tensor` type built on top of them. Every kernel parallelises over output rows with `rayon`.

use num_traits::{Float, FromPrimitive, Num, NumAssign, ToPrimitive};
use std::fmt::Debug;
use thiserror::Error;

pub mod cpu_matmul;
pub mod cpu_softmax;
pub mod cpu_transpose;

pub use cpu_matmul::{cpu_matmul, cpu_matmul_transposed};
pub use cpu_softmax::cpu_softmax;
pub use cpu_transpose::cpu_transpose;

#[derive(Error, Debug)]
pub enum KernelError {
    #[error("kernel operands disagree: expected shape {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("Buffer of length {len} cannot be split into rows of length {row_len}")]
    RaggedRows { len: usize, row_len: usize },
}

pub type Result<T> = std::result::Result<T, KernelError>;

/// Numeric element a kernel can operate on. The tensor crate's element trait is a superset.
pub trait KernelElem:
    Num + NumAssign + Copy + Clone + Debug + Send + Sync + FromPrimitive + ToPrimitive + PartialOrd
{
}

impl<T> KernelElem for T where
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

/// Elements that additionally support transcendental functions (softmax needs `exp`).
pub trait FloatKernelElem: KernelElem + Float {}

impl<T> FloatKernelElem for T where T: KernelElem + Float {}

/// Splits `shape` into (number of stacked matrices, rows, cols).
pub(crate) fn matrix_dims<const RANK: usize>(shape: &[usize; RANK]) -> (usize, usize, usize) {
    let rows = shape[RANK - 2];
    let cols = shape[RANK - 1];
    let batch = shape[..RANK - 2].iter().product();
    (batch, rows, cols)
}
