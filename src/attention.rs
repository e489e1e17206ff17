//! Scaled dot-product multi-head attention.
//!
//! # How a head works
//!
//! Each head projects the query source and the key source through its own dense layer (followed
//! by the configured activation) and scores every query against every key:
//!
//! $$ \text{weights} = \text{softmax}\left(\frac{Q K^T}{\sqrt{L_k}} - \text{penalty} \cdot M\right), \qquad \text{out} = \text{weights} \cdot V $$
//!
//! Two details differ from the textbook formulation and are kept on purpose:
//!
//! - Heads are **full width**: every head projects to `d_model`, not `d_model / n_heads`.
//! - Scores are scaled by the **key sequence length** `L_k` (the trailing axis of the score
//!   matrix), not by the per-head feature width.
//!
//! `V` is the raw value source unless `project_values` is enabled in the configuration.
//!
//! # Combining heads
//!
//! ```text
//! concat(heads)            [B, Lq, n_heads * d_model]
//!   -> LayerNorm
//!   -> Linear(d_model) + activation
//!   -> Dropout (training only)
//!   -> + query source      (residual)
//!   -> Linear(d_model) + activation
//!   -> LayerNorm           [B, Lq, d_model]
//! ```

use crate::config::TransformerConfig;
use crate::error::Result as CrateResult;
use crate::mask::apply_mask;
use crate::nn::module::{nest, scoped, Module, ParamMut, ParamRef, StateDict};
use crate::nn::{Activation, Dropout, LayerNorm, Linear, Mode, SeedStream};
use crate::tensor::{FloatElem, Result, Tensor, TensorElem, TensorError};
use rayon::prelude::*;
use tracing::trace;

/// Output of an attention pass plus the attention weights of every head, each `[B, Lq, Lk]`.
pub type AttentionOutput<T> = (Tensor<T, 3>, Vec<Tensor<T, 3>>);

/// One head's projections. All are lazily shaped to `d_model` outputs.
#[derive(Debug)]
pub struct AttentionHead<T: TensorElem> {
    pub query: Linear<T>,
    pub key: Linear<T>,
    pub value: Option<Linear<T>>,
}

impl<T: FloatElem> AttentionHead<T> {
    fn new(d_model: usize, project_values: bool, seeds: &mut SeedStream) -> Self {
        Self {
            query: Linear::lazy(d_model, seeds.next_seed()),
            key: Linear::lazy(d_model, seeds.next_seed()),
            value: project_values.then(|| Linear::lazy(d_model, seeds.next_seed())),
        }
    }

    /// Returns the head output `[B, Lq, Dv]` and its attention weights `[B, Lq, Lk]`.
    fn forward(
        &self,
        query: &Tensor<T, 3>,
        key: &Tensor<T, 3>,
        value: &Tensor<T, 3>,
        mask: Option<&Tensor<T, 3>>,
        activation: Activation,
        penalty: T,
    ) -> Result<(Tensor<T, 3>, Tensor<T, 3>)> {
        let q = activation.forward(&self.query.forward(query)?);
        let k = activation.forward(&self.key.forward(key)?);
        let projected;
        let v = match &self.value {
            Some(layer) => {
                projected = activation.forward(&layer.forward(value)?);
                &projected
            }
            None => value,
        };

        let mut scores = q.matmul_transposed(&k)?;
        let len_kv = scores.shape()[2];
        if len_kv > 0 {
            let scale = T::one() / T::from_usize(len_kv).unwrap_or_else(T::one).sqrt();
            scores = scores.scale(scale);
        }
        if let Some(mask) = mask {
            scores = apply_mask(&scores, mask, penalty)?;
        }

        let weights = scores.softmax_last_axis()?;
        let out = weights.matmul(v)?;
        Ok((out, weights))
    }
}

impl<T: TensorElem> Module<T> for AttentionHead<T> {
    fn parameters(&self) -> Vec<(String, ParamRef<'_, T>)> {
        let mut out: Vec<_> = nest("query", self.query.parameters())
            .chain(nest("key", self.key.parameters()))
            .collect();
        if let Some(value) = &self.value {
            out.extend(nest("value", value.parameters()));
        }
        out
    }

    fn parameters_mut(&mut self) -> Vec<(String, ParamMut<'_, T>)> {
        let mut out: Vec<_> = nest("query", self.query.parameters_mut())
            .chain(nest("key", self.key.parameters_mut()))
            .collect();
        if let Some(value) = &mut self.value {
            out.extend(nest("value", value.parameters_mut()));
        }
        out
    }

    fn check_parameters(&self, prefix: &str, state: &StateDict<T>) -> CrateResult<()> {
        self.query.check_parameters(&scoped(prefix, "query"), state)?;
        self.key.check_parameters(&scoped(prefix, "key"), state)?;
        if let Some(value) = &self.value {
            value.check_parameters(&scoped(prefix, "value"), state)?;
        }
        Ok(())
    }

    fn apply_parameters(&mut self, prefix: &str, state: &StateDict<T>) -> CrateResult<()> {
        self.query.apply_parameters(&scoped(prefix, "query"), state)?;
        self.key.apply_parameters(&scoped(prefix, "key"), state)?;
        if let Some(value) = &mut self.value {
            value.apply_parameters(&scoped(prefix, "value"), state)?;
        }
        Ok(())
    }
}

/// Multi-head attention block with its residual and normalisation tail.
#[derive(Debug)]
pub struct MultiHeadAttention<T: TensorElem> {
    heads: Vec<AttentionHead<T>>,
    concat_norm: LayerNorm<T>,
    output: Linear<T>,
    dropout: Dropout,
    feed_forward: Linear<T>,
    output_norm: LayerNorm<T>,
    activation: Activation,
    mask_penalty: T,
    d_model: usize,
}

impl<T: FloatElem> MultiHeadAttention<T> {
    /// Builds the block's (still unshaped) layers from `config`, drawing seeds from `seeds`.
    pub fn new(config: &TransformerConfig, seeds: &mut SeedStream) -> Self {
        let eps = T::from_f64(config.layer_norm_epsilon).unwrap_or_else(T::epsilon);
        let heads = (0..config.n_heads)
            .map(|_| AttentionHead::new(config.d_model, config.project_values, seeds))
            .collect();

        Self {
            heads,
            concat_norm: LayerNorm::lazy(eps),
            output: Linear::lazy(config.d_model, seeds.next_seed()),
            dropout: Dropout::new(config.dropout_rate, seeds.next_seed()),
            feed_forward: Linear::lazy(config.d_model, seeds.next_seed()),
            output_norm: LayerNorm::lazy(eps),
            activation: config.activation,
            mask_penalty: T::from_f64(config.mask_penalty).unwrap_or_else(T::max_value),
            d_model: config.d_model,
        }
    }

    pub fn n_heads(&self) -> usize {
        self.heads.len()
    }

    pub fn d_model(&self) -> usize {
        self.d_model
    }

    pub fn heads(&self) -> &[AttentionHead<T>] {
        &self.heads
    }

    /// Attends from `query` (`[B, Lq, d_model]`) over `key`/`value` (`[B, Lk, _]`).
    ///
    /// `mask` is `[B, Lq, Lk]` or `[1, Lq, Lk]`, with `1` marking pairs to suppress.
    /// The result is `[B, Lq, d_model]`.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` if the sources disagree on batch size, the mask does not fit the score
    /// matrix, or the query source is not `d_model` wide (the residual needs matching widths).
    pub fn forward(
        &self,
        query: &Tensor<T, 3>,
        key: &Tensor<T, 3>,
        value: &Tensor<T, 3>,
        mask: Option<&Tensor<T, 3>>,
        mode: Mode,
    ) -> Result<Tensor<T, 3>> {
        self.forward_with_weights(query, key, value, mask, mode)
            .map(|(out, _)| out)
    }

    /// Like [`forward`](Self::forward), also returning every head's attention weights.
    pub fn forward_with_weights(
        &self,
        query: &Tensor<T, 3>,
        key: &Tensor<T, 3>,
        value: &Tensor<T, 3>,
        mask: Option<&Tensor<T, 3>>,
        mode: Mode,
    ) -> Result<AttentionOutput<T>> {
        let [batch, len_q, width] = *query.shape();
        // Checked before any lazy projection sees the input and fixes its width.
        if width != self.d_model {
            return Err(TensorError::ShapeMismatch {
                expected: vec![batch, len_q, self.d_model],
                got: query.shape().to_vec(),
            });
        }
        let len_kv = key.shape()[1];
        trace!(
            batch,
            len_q,
            len_kv,
            heads = self.heads.len(),
            masked = mask.is_some(),
            "multi-head attention"
        );

        let (head_outputs, weights): (Vec<_>, Vec<_>) = self
            .heads
            .par_iter()
            .map(|head| {
                head.forward(query, key, value, mask, self.activation, self.mask_penalty)
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .unzip();

        let concat = Tensor::concat_last(&head_outputs)?;
        let normed = self.concat_norm.forward(&concat)?;
        let projected = self.activation.forward(&self.output.forward(&normed)?);
        let dropped = self.dropout.forward(&projected, mode);

        let residual = (&dropped + query)?;
        let transformed = self
            .activation
            .forward(&self.feed_forward.forward(&residual)?);
        let out = self.output_norm.forward(&transformed)?;

        Ok((out, weights))
    }
}

impl<T: TensorElem> Module<T> for MultiHeadAttention<T> {
    fn parameters(&self) -> Vec<(String, ParamRef<'_, T>)> {
        let mut out = Vec::new();
        for (i, head) in self.heads.iter().enumerate() {
            out.extend(nest(&format!("heads.{}", i), head.parameters()));
        }
        out.extend(nest("concat_norm", self.concat_norm.parameters()));
        out.extend(nest("output", self.output.parameters()));
        out.extend(nest("feed_forward", self.feed_forward.parameters()));
        out.extend(nest("output_norm", self.output_norm.parameters()));
        out
    }

    fn parameters_mut(&mut self) -> Vec<(String, ParamMut<'_, T>)> {
        let mut out = Vec::new();
        for (i, head) in self.heads.iter_mut().enumerate() {
            out.extend(nest(&format!("heads.{}", i), head.parameters_mut()));
        }
        out.extend(nest("concat_norm", self.concat_norm.parameters_mut()));
        out.extend(nest("output", self.output.parameters_mut()));
        out.extend(nest("feed_forward", self.feed_forward.parameters_mut()));
        out.extend(nest("output_norm", self.output_norm.parameters_mut()));
        out
    }

    fn check_parameters(&self, prefix: &str, state: &StateDict<T>) -> CrateResult<()> {
        for (i, head) in self.heads.iter().enumerate() {
            head.check_parameters(&scoped(prefix, &format!("heads.{}", i)), state)?;
        }
        self.concat_norm
            .check_parameters(&scoped(prefix, "concat_norm"), state)?;
        self.output.check_parameters(&scoped(prefix, "output"), state)?;
        self.feed_forward
            .check_parameters(&scoped(prefix, "feed_forward"), state)?;
        self.output_norm
            .check_parameters(&scoped(prefix, "output_norm"), state)?;
        Ok(())
    }

    fn apply_parameters(&mut self, prefix: &str, state: &StateDict<T>) -> CrateResult<()> {
        for (i, head) in self.heads.iter_mut().enumerate() {
            head.apply_parameters(&scoped(prefix, &format!("heads.{}", i)), state)?;
        }
        self.concat_norm
            .apply_parameters(&scoped(prefix, "concat_norm"), state)?;
        self.output.apply_parameters(&scoped(prefix, "output"), state)?;
        self.feed_forward
            .apply_parameters(&scoped(prefix, "feed_forward"), state)?;
        self.output_norm
            .apply_parameters(&scoped(prefix, "output_norm"), state)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::lookahead_mask;

    fn config(n_heads: usize) -> TransformerConfig {
        TransformerConfig::new(20, 20)
            .with_d_model(6)
            .with_n_heads(n_heads)
            .with_seed(5)
    }

    fn input(batch: usize, len: usize, d: usize) -> Tensor<f64, 3> {
        Tensor::from_fn([batch, len, d], |[b, l, i]| {
            ((b * 31 + l * 7 + i * 3) % 11) as f64 / 11.0 - 0.4
        })
    }

    #[test]
    fn test_output_shape_independent_of_heads() {
        for n_heads in [1, 2, 5] {
            let mha = MultiHeadAttention::<f64>::new(&config(n_heads), &mut SeedStream::new(0));
            let q = input(2, 3, 6);
            let kv = input(2, 4, 6);
            let (out, weights) = mha
                .forward_with_weights(&q, &kv, &kv, None, Mode::Inference)
                .unwrap();
            assert_eq!(out.shape(), &[2, 3, 6]);
            assert_eq!(weights.len(), n_heads);
            assert!(weights.iter().all(|w| w.shape() == &[2, 3, 4]));
        }
    }

    #[test]
    fn test_weights_are_distributions_and_masked_pairs_vanish() {
        let mha = MultiHeadAttention::<f64>::new(&config(2), &mut SeedStream::new(1));
        let x = input(1, 4, 6);
        let mask = lookahead_mask::<f64>(4).reshape([1, 4, 4]).unwrap();

        let (_, weights) = mha
            .forward_with_weights(&x, &x, &x, Some(&mask), Mode::Inference)
            .unwrap();
        for w in &weights {
            for (q, row) in w.data().chunks(4).enumerate() {
                let sum: f64 = row.iter().sum();
                assert!((sum - 1.0).abs() < 1e-9);
                for (k, &p) in row.iter().enumerate() {
                    if k > q {
                        assert!(p < 1e-12);
                    }
                }
            }
        }
    }

    #[test]
    fn test_scaling_uses_key_length() {
        // A head with identity projections and identity activation exposes the raw scores.
        let mut cfg = config(1).with_activation(Activation::Identity);
        cfg.d_model = 2;
        let mut mha = MultiHeadAttention::<f64>::new(&cfg, &mut SeedStream::new(0));
        let eye = Tensor::from_fn([2, 2], |[r, c]| if r == c { 1.0 } else { 0.0 });
        mha.heads[0].query = Linear::new(eye.clone(), None);
        mha.heads[0].key = Linear::new(eye, None);

        let q = Tensor::<f64, 3>::new(vec![1.0, 0.0], [1, 1, 2]).unwrap();
        let k = Tensor::<f64, 3>::new(vec![2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0], [1, 4, 2])
            .unwrap();
        let (_, weights) = mha
            .forward_with_weights(&q, &k, &k, None, Mode::Inference)
            .unwrap();

        // Scores [2, 0, 0, 0] scaled by 1/sqrt(4).
        let e = 1.0f64.exp();
        let expected = [e / (e + 3.0), 1.0 / (e + 3.0)];
        let w = weights[0].data();
        assert!((w[0] - expected[0]).abs() < 1e-12);
        assert!((w[1] - expected[1]).abs() < 1e-12);
    }

    #[test]
    fn test_values_unprojected_by_default() {
        let mha = MultiHeadAttention::<f32>::new(&config(3), &mut SeedStream::new(2));
        assert!(mha.heads().iter().all(|h| h.value.is_none()));

        let projected = MultiHeadAttention::<f32>::new(
            &config(3).with_project_values(true),
            &mut SeedStream::new(2),
        );
        assert!(projected.heads().iter().all(|h| h.value.is_some()));
    }

    #[test]
    fn test_residual_width_mismatch_is_error() {
        let mha = MultiHeadAttention::<f64>::new(&config(1), &mut SeedStream::new(0));
        let q = input(1, 2, 4);
        assert!(matches!(
            mha.forward(&q, &q, &q, None, Mode::Inference),
            Err(TensorError::ShapeMismatch { .. })
        ));

        // The rejected call must not have fixed any projection to the wrong width.
        assert_eq!(mha.num_parameters(), 0);
        let x = input(1, 2, 6);
        let out = mha.forward(&x, &x, &x, None, Mode::Inference).unwrap();
        assert_eq!(out.shape(), &[1, 2, 6]);
    }

    #[test]
    fn test_mismatched_mask_is_error() {
        let mha = MultiHeadAttention::<f64>::new(&config(1), &mut SeedStream::new(0));
        let x = input(2, 3, 6);
        let mask = Tensor::<f64, 3>::zeros([2, 3, 4]);
        assert!(mha.forward(&x, &x, &x, Some(&mask), Mode::Inference).is_err());
    }

    #[test]
    fn test_parameter_names() {
        let mha = MultiHeadAttention::<f32>::new(&config(2), &mut SeedStream::new(0));
        assert_eq!(mha.num_parameters(), 0);

        let x = Tensor::<f32, 3>::ones([1, 2, 6]);
        mha.forward(&x, &x, &x, None, Mode::Inference).unwrap();

        let names: Vec<String> = mha.parameters().into_iter().map(|(n, _)| n).collect();
        assert!(names.contains(&"heads.1.key.weight".to_string()));
        assert!(names.contains(&"concat_norm.weight".to_string()));
        assert!(names.contains(&"output_norm.bias".to_string()));

        // 2 heads x (q, k) x (6*6 + 6), concat norm 2*12, output 12*6 + 6,
        // feed-forward 6*6 + 6, output norm 2*6.
        let expected = 2 * 2 * 42 + 24 + 78 + 42 + 12;
        assert_eq!(mha.num_parameters(), expected);
    }

    #[test]
    fn test_dropout_only_in_training() {
        let mha = MultiHeadAttention::<f64>::new(&config(2), &mut SeedStream::new(0));
        let x = input(1, 5, 6);
        let a = mha.forward(&x, &x, &x, None, Mode::Inference).unwrap();
        let b = mha.forward(&x, &x, &x, None, Mode::Inference).unwrap();
        assert_eq!(a, b);

        let t = mha.forward(&x, &x, &x, None, Mode::Training).unwrap();
        assert_ne!(a, t);
    }
}
