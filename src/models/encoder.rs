use crate::attention::{AttentionOutput, MultiHeadAttention};
use crate::config::TransformerConfig;
use crate::error::Result as CrateResult;
use crate::mask::padding_mask;
use crate::nn::module::{nest, scoped, Module, ParamMut, ParamRef, StateDict};
use crate::nn::{Embedding, Mode, SeedStream};
use crate::positional::PositionalEncoder;
use crate::tensor::{FloatElem, Result, Tensor, TensorElem};
use tracing::trace;

/// Single-layer encoder: source embedding, positional encoding, and one padding-masked
/// self-attention block.
///
/// Input is `[batch, length]` source token ids; output is `[batch, length, d_model]`.
#[derive(Debug)]
pub struct Encoder<T: TensorElem> {
    embedding: Embedding<T>,
    positional: PositionalEncoder,
    attention: MultiHeadAttention<T>,
    pad_token: usize,
}

impl<T: FloatElem> Encoder<T> {
    pub fn new(config: &TransformerConfig, seeds: &mut SeedStream) -> Self {
        Self {
            embedding: Embedding::random(
                config.source_vocab_size,
                config.d_model,
                seeds.next_seed(),
            ),
            positional: PositionalEncoder::new(config.frequency_index),
            attention: MultiHeadAttention::new(config, seeds),
            pad_token: config.pad_token,
        }
    }

    pub fn embedding(&self) -> &Embedding<T> {
        &self.embedding
    }

    pub fn attention(&self) -> &MultiHeadAttention<T> {
        &self.attention
    }

    pub fn forward(&self, source: &Tensor<usize, 2>, mode: Mode) -> Result<Tensor<T, 3>> {
        self.forward_with_attention(source, mode)
            .map(|(out, _)| out)
    }

    /// Also returns the self-attention weights of every head, `[batch, length, length]`.
    pub fn forward_with_attention(
        &self,
        source: &Tensor<usize, 2>,
        mode: Mode,
    ) -> Result<AttentionOutput<T>> {
        let [batch, length] = *source.shape();
        trace!(batch, length, "encoder");

        let mask = padding_mask::<T>(source, self.pad_token);
        let embedded = self.embedding.forward(source)?;
        let x = self.positional.forward(&embedded)?;
        self.attention
            .forward_with_weights(&x, &x, &x, Some(&mask), mode)
    }
}

impl<T: TensorElem> Module<T> for Encoder<T> {
    fn parameters(&self) -> Vec<(String, ParamRef<'_, T>)> {
        nest("embedding", self.embedding.parameters())
            .chain(nest("attention", self.attention.parameters()))
            .collect()
    }

    fn parameters_mut(&mut self) -> Vec<(String, ParamMut<'_, T>)> {
        nest("embedding", self.embedding.parameters_mut())
            .chain(nest("attention", self.attention.parameters_mut()))
            .collect()
    }

    fn check_parameters(&self, prefix: &str, state: &StateDict<T>) -> CrateResult<()> {
        self.embedding
            .check_parameters(&scoped(prefix, "embedding"), state)?;
        self.attention
            .check_parameters(&scoped(prefix, "attention"), state)
    }

    fn apply_parameters(&mut self, prefix: &str, state: &StateDict<T>) -> CrateResult<()> {
        self.embedding
            .apply_parameters(&scoped(prefix, "embedding"), state)?;
        self.attention
            .apply_parameters(&scoped(prefix, "attention"), state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder() -> Encoder<f64> {
        let config = TransformerConfig::new(30, 30).with_d_model(8).with_n_heads(2);
        Encoder::new(&config, &mut SeedStream::new(3))
    }

    #[test]
    fn test_output_shape() {
        let enc = encoder();
        let source = Tensor::new(vec![5, 17, 3, 0, 0, 4, 4, 4, 4, 0], [2, 5]).unwrap();
        let out = enc.forward(&source, Mode::Inference).unwrap();
        assert_eq!(out.shape(), &[2, 5, 8]);
    }

    #[test]
    fn test_padded_keys_get_no_weight() {
        let enc = encoder();
        let source = Tensor::new(vec![5, 17, 3, 0, 0], [1, 5]).unwrap();
        let (_, weights) = enc.forward_with_attention(&source, Mode::Inference).unwrap();
        for w in &weights {
            for row in w.data().chunks(5) {
                assert_eq!(row[3], 0.0);
                assert_eq!(row[4], 0.0);
            }
        }
    }

    #[test]
    fn test_unknown_token_is_error() {
        let enc = encoder();
        let source = Tensor::new(vec![1, 30], [1, 2]).unwrap();
        assert!(enc.forward(&source, Mode::Inference).is_err());
    }
}
