use crate::attention::MultiHeadAttention;
use crate::config::TransformerConfig;
use crate::error::Result as CrateResult;
use crate::mask::combined_mask;
use crate::nn::module::{nest, scoped, Module, ParamMut, ParamRef, StateDict};
use crate::nn::{Embedding, Linear, Mode, SeedStream};
use crate::positional::PositionalEncoder;
use crate::tensor::{FloatElem, Result, Tensor, TensorElem};
use tracing::trace;

/// Per-head attention weights collected during one decoder pass.
#[derive(Debug, Clone)]
pub struct DecoderAttention<T: TensorElem> {
    /// `[batch, length_tgt, length_tgt]` per head.
    pub self_attention: Vec<Tensor<T, 3>>,
    /// `[batch, length_tgt, length_src]` per head.
    pub cross_attention: Vec<Tensor<T, 3>>,
}

/// Single-layer decoder.
///
/// Target history is embedded and position-encoded, attends to itself under the combined
/// padding/lookahead mask, then attends (unmasked) over the encoder memory. A dense layer with
/// softmax turns each position into a distribution over the target vocabulary.
#[derive(Debug)]
pub struct Decoder<T: TensorElem> {
    embedding: Embedding<T>,
    positional: PositionalEncoder,
    self_attention: MultiHeadAttention<T>,
    cross_attention: MultiHeadAttention<T>,
    projection: Linear<T>,
    pad_token: usize,
}

impl<T: FloatElem> Decoder<T> {
    pub fn new(config: &TransformerConfig, seeds: &mut SeedStream) -> Self {
        Self {
            embedding: Embedding::random(
                config.target_vocab_size,
                config.d_model,
                seeds.next_seed(),
            ),
            positional: PositionalEncoder::new(config.frequency_index),
            self_attention: MultiHeadAttention::new(config, seeds),
            cross_attention: MultiHeadAttention::new(config, seeds),
            projection: Linear::lazy(config.target_vocab_size, seeds.next_seed()),
            pad_token: config.pad_token,
        }
    }

    pub fn target_vocab_size(&self) -> usize {
        self.projection.out_features()
    }

    /// Returns `[batch, length_tgt, target_vocab]` next-token distributions.
    ///
    /// `key_memory` and `value_memory` are `[batch, length_src, d_model]`; in a plain
    /// encoder-decoder both are the encoder output.
    pub fn forward(
        &self,
        key_memory: &Tensor<T, 3>,
        value_memory: &Tensor<T, 3>,
        target_history: &Tensor<usize, 2>,
        mode: Mode,
    ) -> Result<Tensor<T, 3>> {
        self.forward_with_attention(key_memory, value_memory, target_history, mode)
            .map(|(out, _)| out)
    }

    pub fn forward_with_attention(
        &self,
        key_memory: &Tensor<T, 3>,
        value_memory: &Tensor<T, 3>,
        target_history: &Tensor<usize, 2>,
        mode: Mode,
    ) -> Result<(Tensor<T, 3>, DecoderAttention<T>)> {
        let [batch, length] = *target_history.shape();
        trace!(
            batch,
            length,
            length_src = key_memory.shape()[1],
            "decoder"
        );

        let mask = combined_mask::<T>(target_history, self.pad_token);
        let embedded = self.embedding.forward(target_history)?;
        let x = self.positional.forward(&embedded)?;

        let (attended, self_weights) =
            self.self_attention
                .forward_with_weights(&x, &x, &x, Some(&mask), mode)?;
        let (crossed, cross_weights) = self.cross_attention.forward_with_weights(
            &attended,
            key_memory,
            value_memory,
            None,
            mode,
        )?;

        let probs = self.projection.forward(&crossed)?.softmax_last_axis()?;
        Ok((
            probs,
            DecoderAttention {
                self_attention: self_weights,
                cross_attention: cross_weights,
            },
        ))
    }
}

impl<T: TensorElem> Module<T> for Decoder<T> {
    fn parameters(&self) -> Vec<(String, ParamRef<'_, T>)> {
        nest("embedding", self.embedding.parameters())
            .chain(nest("self_attention", self.self_attention.parameters()))
            .chain(nest("cross_attention", self.cross_attention.parameters()))
            .chain(nest("projection", self.projection.parameters()))
            .collect()
    }

    fn parameters_mut(&mut self) -> Vec<(String, ParamMut<'_, T>)> {
        nest("embedding", self.embedding.parameters_mut())
            .chain(nest("self_attention", self.self_attention.parameters_mut()))
            .chain(nest("cross_attention", self.cross_attention.parameters_mut()))
            .chain(nest("projection", self.projection.parameters_mut()))
            .collect()
    }

    fn check_parameters(&self, prefix: &str, state: &StateDict<T>) -> CrateResult<()> {
        self.embedding
            .check_parameters(&scoped(prefix, "embedding"), state)?;
        self.self_attention
            .check_parameters(&scoped(prefix, "self_attention"), state)?;
        self.cross_attention
            .check_parameters(&scoped(prefix, "cross_attention"), state)?;
        self.projection
            .check_parameters(&scoped(prefix, "projection"), state)
    }

    fn apply_parameters(&mut self, prefix: &str, state: &StateDict<T>) -> CrateResult<()> {
        self.embedding
            .apply_parameters(&scoped(prefix, "embedding"), state)?;
        self.self_attention
            .apply_parameters(&scoped(prefix, "self_attention"), state)?;
        self.cross_attention
            .apply_parameters(&scoped(prefix, "cross_attention"), state)?;
        self.projection
            .apply_parameters(&scoped(prefix, "projection"), state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder() -> Decoder<f64> {
        let config = TransformerConfig::new(20, 12).with_d_model(8).with_n_heads(2);
        Decoder::new(&config, &mut SeedStream::new(9))
    }

    fn memory(batch: usize, len: usize) -> Tensor<f64, 3> {
        Tensor::from_fn([batch, len, 8], |[b, l, i]| ((b + 2 * l + 3 * i) % 5) as f64 * 0.1)
    }

    #[test]
    fn test_distributions_over_target_vocab() {
        let dec = decoder();
        let mem = memory(1, 5);
        let target = Tensor::new(vec![2, 9, 0, 0], [1, 4]).unwrap();
        let (probs, attention) = dec
            .forward_with_attention(&mem, &mem, &target, Mode::Inference)
            .unwrap();

        assert_eq!(probs.shape(), &[1, 4, 12]);
        for row in probs.data().chunks(12) {
            assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-9);
            assert!(row.iter().all(|&p| p >= 0.0));
        }
        assert_eq!(attention.self_attention[0].shape(), &[1, 4, 4]);
        assert_eq!(attention.cross_attention[0].shape(), &[1, 4, 5]);
    }

    #[test]
    fn test_self_attention_is_causal() {
        let dec = decoder();
        let mem = memory(1, 3);
        let target = Tensor::new(vec![2, 9, 4, 6], [1, 4]).unwrap();
        let (_, attention) = dec
            .forward_with_attention(&mem, &mem, &target, Mode::Inference)
            .unwrap();
        for w in &attention.self_attention {
            for q in 0..4 {
                for k in (q + 1)..4 {
                    assert_eq!(w.get([0, q, k]).unwrap(), 0.0);
                }
            }
        }
    }

    #[test]
    fn test_batch_mismatch_is_error() {
        let dec = decoder();
        let mem = memory(2, 3);
        let target = Tensor::new(vec![2, 9], [1, 2]).unwrap();
        assert!(dec.forward(&mem, &mem, &target, Mode::Inference).is_err());
    }
}
