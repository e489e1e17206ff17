//! Sinusoidal positional encoding.
//!
//! Attention treats its inputs as an unordered set, so each embedding gets a fixed,
//! position-dependent offset added to it. For position `p` and feature `i`:
//!
//! $$ PE(p, i) = \cos(p \cdot \omega_i) \text{ if } i \text{ even}, \quad \sin(p \cdot \omega_i) \text{ if } i \text{ odd} $$
//!
//! The table has no learned parameters and is rebuilt for every input length.
//!
//! > [!NOTE]
//! > With [`FrequencyIndex::Raw`] (the default) the exponent of $\omega_i$ uses the feature
//! > index $i$ itself: $\omega_i = 10000^{-2i/d}$. [`FrequencyIndex::Paired`] gives the textbook
//! > variant where features $2k$ and $2k+1$ share $\omega = 10000^{-2k/d}$.

use crate::tensor::{FloatElem, Result, Tensor};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Which feature index feeds the frequency exponent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyIndex {
    /// `ω(i) = 10000^(-2i / d_model)`
    #[default]
    Raw,
    /// `ω(i) = 10000^(-2⌊i/2⌋ / d_model)`
    Paired,
}

impl FrequencyIndex {
    fn omega(self, i: usize, d_model: usize) -> f64 {
        let k = match self {
            FrequencyIndex::Raw => i,
            FrequencyIndex::Paired => i / 2,
        };
        10000f64.powf(-2.0 * k as f64 / d_model as f64)
    }
}

/// The `[length, d_model]` table of offsets added to a sequence of embeddings.
pub fn positional_mask<T: FloatElem>(
    length: usize,
    d_model: usize,
    frequency_index: FrequencyIndex,
) -> Tensor<T, 2> {
    let omegas: Vec<f64> = (0..d_model)
        .map(|i| frequency_index.omega(i, d_model))
        .collect();

    Tensor::from_fn([length, d_model], |[p, i]| {
        let angle = p as f64 * omegas[i];
        let value = if i % 2 == 0 { angle.cos() } else { angle.sin() };
        T::from_f64(value).unwrap_or_else(T::zero)
    })
}

/// Adds the positional table to `[batch, length, d_model]` embeddings.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionalEncoder {
    frequency_index: FrequencyIndex,
}

impl PositionalEncoder {
    pub fn new(frequency_index: FrequencyIndex) -> Self {
        Self { frequency_index }
    }

    pub fn frequency_index(&self) -> FrequencyIndex {
        self.frequency_index
    }

    pub fn forward<T: FloatElem>(&self, x: &Tensor<T, 3>) -> Result<Tensor<T, 3>> {
        let [_, length, d_model] = *x.shape();
        trace!(length, d_model, "positional encoding");
        let table = positional_mask::<T>(length, d_model, self.frequency_index);
        x.add_broadcast(&table)
    }
}
