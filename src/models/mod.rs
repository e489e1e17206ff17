//! Encoder-decoder translation model.
//!
//! Source tokens flow through the [`Encoder`] into a contextualised memory; the [`Decoder`]
//! attends over that memory and its own target history to predict the next target token.
//! [`Transformer`] owns one of each, built from a single [`TransformerConfig`].
//!
//! # Example
//!
//! ```rust
//! use seq2seq_rs::config::TransformerConfig;
//! use seq2seq_rs::models::Transformer;
//! use seq2seq_rs::nn::Mode;
//! use seq2seq_rs::tensor::Tensor;
//!
//! let config = TransformerConfig::new(100, 80).with_d_model(16).with_n_heads(2);
//! let model = Transformer::<f32>::new(config).unwrap();
//!
//! let source = Tensor::new(vec![5, 17, 3, 0, 0], [1, 5]).unwrap();
//! let history = Tensor::new(vec![2, 9, 0, 0], [1, 4]).unwrap();
//! let probs = model.forward(&source, &history, Mode::Inference).unwrap();
//! assert_eq!(probs.shape(), &[1, 4, 80]);
//! ```
//!
//! [`TransformerConfig`]: crate::config::TransformerConfig

pub mod decoder;
pub mod encoder;
pub mod transformer;

pub use decoder::{Decoder, DecoderAttention};
pub use encoder::Encoder;
pub use transformer::Transformer;
