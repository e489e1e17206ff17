//! Neural network layer primitives.
//!
//! - [`Linear`]: dense projection, eager or lazily shaped.
//! - [`Embedding`]: token lookup table.
//! - [`LayerNorm`]: feature-wise standardisation.
//! - [`Dropout`]: inverted dropout, active only in [`Mode::Training`].
//! - [`Activation`]: element-wise non-linearities.
//! - [`Module`]: parameter enumeration and loading shared by every layer and block.

pub mod activation;
pub mod dropout;
pub mod embedding;
pub mod init;
pub mod linear;
pub mod module;
pub mod norm;

pub use activation::Activation;
pub use dropout::Dropout;
pub use embedding::Embedding;
pub use init::SeedStream;
pub use linear::Linear;
pub use module::{Module, ParamMut, ParamRef, StateDict, StateTensor};
pub use norm::LayerNorm;

/// Whether a forward pass is part of training or inference. Only dropout looks at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    Training,
    #[default]
    Inference,
}
