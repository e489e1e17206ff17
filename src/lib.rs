//! # seq2seq-rs
//!
//! `seq2seq-rs` is a pure Rust transformer encoder-decoder for sequence-to-sequence
//! translation (Portuguese to English in the original setting), built from first principles on
//! a small CPU tensor library.
//!
//! The model is deliberately small: one encoder layer, one decoder layer, and multi-head
//! attention whose heads each work at the full model width.
//!
//! ## Modules
//!
//! - [`mod@tensor`]: Const-rank N-dimensional tensor and its operations.
//! - [`nn`]: Layer primitives (Linear, Embedding, LayerNorm, Dropout, activations).
//! - [`positional`]: Sinusoidal positional encoding.
//! - [`mask`]: Padding, lookahead and combined attention masks.
//! - [`attention`]: Scaled dot-product multi-head attention.
//! - [`models`]: Encoder, decoder and the full [`Transformer`](models::Transformer).
//! - [`config`]: Hyperparameters, loadable from JSON.
//! - [`checkpoint`]: Parameter persistence in the `safetensors` format.
//! - [`loss`]: Masked cross-entropy and accuracy.
//!
//! ## Example
//!
//! ```rust
//! use seq2seq_rs::config::TransformerConfig;
//! use seq2seq_rs::models::Transformer;
//! use seq2seq_rs::tensor::Tensor;
//!
//! let config = TransformerConfig::new(64, 64).with_d_model(8).with_n_heads(2);
//! let model = Transformer::<f32>::new(config).unwrap();
//!
//! let source = Tensor::new(vec![5, 17, 3, 0, 0], [1, 5]).unwrap();
//! let translation = model.translate_greedy(&source, 10).unwrap();
//! assert_eq!(translation.shape()[0], 1);
//! ```

/// Builds a [`Tensor`](tensor::Tensor) from a literal.
///
/// A wrong element count is rejected at compile time.
///
/// # Examples
///
/// ```rust
/// use seq2seq_rs::tensor;
/// use seq2seq_rs::tensor::Tensor;
///
/// let t: Tensor<f32, 2> = tensor!([1.0, 2.0, 3.0, 4.0], [2, 2]);
/// assert_eq!(t.shape(), &[2, 2]);
///
/// // Fails to compile:
/// // let t = tensor!([1.0, 2.0, 3.0], [2, 2]);
/// ```
#[macro_export]
macro_rules! tensor {
    ($data:expr, $shape:expr) => {{
        const DATA_LEN: usize = $data.len();
        const SHAPE: [usize; $shape.len()] = $shape;
        const EXPECTED_SIZE: usize = {
            let mut size = 1;
            let mut i = 0;
            while i < SHAPE.len() {
                size *= SHAPE[i];
                i += 1;
            }
            size
        };

        const _: () = assert!(
            DATA_LEN == EXPECTED_SIZE,
            "tensor! literal length differs from the product of its shape"
        );

        match $crate::tensor::Tensor::new($data.to_vec(), SHAPE) {
            Ok(t) => t,
            Err(_) => unreachable!("length checked at compile time"),
        }
    }};
}

pub mod attention;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod loss;
pub mod mask;
pub mod models;
pub mod nn;
pub mod positional;
pub mod tensor;

pub use error::{Error, Result};
pub use tensor::Tensor;
