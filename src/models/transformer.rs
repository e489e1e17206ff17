use super::{Decoder, Encoder};
use crate::config::TransformerConfig;
use crate::error::Result as CrateResult;
use crate::nn::module::{nest, scoped, Module, ParamMut, ParamRef, StateDict};
use crate::nn::{Mode, SeedStream};
use crate::tensor::{FloatElem, Result, Tensor, TensorElem};
use tracing::{debug, warn};

/// Encoder-decoder translation model.
#[derive(Debug)]
pub struct Transformer<T: TensorElem> {
    config: TransformerConfig,
    encoder: Encoder<T>,
    decoder: Decoder<T>,
}

impl<T: FloatElem> Transformer<T> {
    /// Validates `config` and builds both halves. Parameters materialise on the first forward
    /// pass or on [`Module::load_parameters`].
    pub fn new(config: TransformerConfig) -> CrateResult<Self> {
        config.validate()?;
        let mut seeds = SeedStream::new(config.seed);
        let encoder = Encoder::new(&config, &mut seeds);
        let decoder = Decoder::new(&config, &mut seeds);
        debug!(
            d_model = config.d_model,
            n_heads = config.n_heads,
            source_vocab = config.source_vocab_size,
            target_vocab = config.target_vocab_size,
            "built transformer"
        );
        Ok(Self {
            config,
            encoder,
            decoder,
        })
    }

    pub fn config(&self) -> &TransformerConfig {
        &self.config
    }

    pub fn encoder(&self) -> &Encoder<T> {
        &self.encoder
    }

    pub fn decoder(&self) -> &Decoder<T> {
        &self.decoder
    }

    /// Next-token distributions `[batch, length_tgt, target_vocab]` for every prefix of
    /// `target_history`.
    pub fn forward(
        &self,
        source: &Tensor<usize, 2>,
        target_history: &Tensor<usize, 2>,
        mode: Mode,
    ) -> Result<Tensor<T, 3>> {
        let memory = self.encoder.forward(source, mode)?;
        self.decoder.forward(&memory, &memory, target_history, mode)
    }

    /// Greedy decoding with the configured `max_decode_len`.
    pub fn translate(&self, source: &Tensor<usize, 2>) -> Result<Tensor<usize, 2>> {
        self.translate_greedy(source, self.config.max_decode_len)
    }

    /// Encodes `source` once, then repeatedly appends the most probable next token to a
    /// history seeded with `start_token`.
    ///
    /// Stops once every row has produced `end_token` or after `max_len` generated tokens.
    /// Rows that finish early are right-padded with the pad token. The returned
    /// `[batch, 1 + generated]` ids include the leading start token.
    pub fn translate_greedy(
        &self,
        source: &Tensor<usize, 2>,
        max_len: usize,
    ) -> Result<Tensor<usize, 2>> {
        let batch = source.shape()[0];
        let memory = self.encoder.forward(source, Mode::Inference)?;

        let mut rows: Vec<Vec<usize>> = vec![vec![self.config.start_token]; batch];
        let mut finished = vec![false; batch];

        for _ in 0..max_len {
            if finished.iter().all(|&f| f) {
                break;
            }
            let length = rows.first().map_or(1, Vec::len);
            let history = Tensor::new(rows.concat(), [batch, length])?;
            let probs = self
                .decoder
                .forward(&memory, &memory, &history, Mode::Inference)?;

            let vocab = probs.shape()[2];
            let next = probs
                .select_position(length - 1)?
                .reshape::<3>([batch, 1, vocab])?
                .argmax_last();

            for ((row, done), &token) in rows.iter_mut().zip(finished.iter_mut()).zip(next.data())
            {
                if *done {
                    row.push(self.config.pad_token);
                } else {
                    row.push(token);
                    *done = token == self.config.end_token;
                }
            }
        }

        let unfinished = finished.iter().filter(|&&f| !f).count();
        if unfinished > 0 {
            warn!(unfinished, max_len, "greedy decoding stopped at max_len");
        }

        let length = rows.first().map_or(1, Vec::len);
        Tensor::new(rows.concat(), [batch, length])
    }
}

impl<T: TensorElem> Module<T> for Transformer<T> {
    fn parameters(&self) -> Vec<(String, ParamRef<'_, T>)> {
        nest("encoder", self.encoder.parameters())
            .chain(nest("decoder", self.decoder.parameters()))
            .collect()
    }

    fn parameters_mut(&mut self) -> Vec<(String, ParamMut<'_, T>)> {
        nest("encoder", self.encoder.parameters_mut())
            .chain(nest("decoder", self.decoder.parameters_mut()))
            .collect()
    }

    fn check_parameters(&self, prefix: &str, state: &StateDict<T>) -> CrateResult<()> {
        self.encoder
            .check_parameters(&scoped(prefix, "encoder"), state)?;
        self.decoder
            .check_parameters(&scoped(prefix, "decoder"), state)
    }

    fn apply_parameters(&mut self, prefix: &str, state: &StateDict<T>) -> CrateResult<()> {
        self.encoder
            .apply_parameters(&scoped(prefix, "encoder"), state)?;
        self.decoder
            .apply_parameters(&scoped(prefix, "decoder"), state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TransformerConfig {
        TransformerConfig::new(25, 15)
            .with_d_model(8)
            .with_n_heads(2)
            .with_seed(11)
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(Transformer::<f32>::new(config().with_n_heads(0)).is_err());
    }

    #[test]
    fn test_same_seed_same_model() {
        let a = Transformer::<f64>::new(config()).unwrap();
        let b = Transformer::<f64>::new(config()).unwrap();
        let source = Tensor::new(vec![4, 8, 1, 0], [1, 4]).unwrap();
        let target = Tensor::new(vec![2, 7], [1, 2]).unwrap();

        let pa = a.forward(&source, &target, Mode::Inference).unwrap();
        let pb = b.forward(&source, &target, Mode::Inference).unwrap();
        assert_eq!(pa, pb);
        assert_eq!(a.state_dict(), b.state_dict());
    }

    #[test]
    fn test_greedy_respects_max_len() {
        let model = Transformer::<f64>::new(config()).unwrap();
        let source = Tensor::new(vec![4, 8, 1, 0, 3, 3, 0, 0], [2, 4]).unwrap();
        let out = model.translate_greedy(&source, 5).unwrap();

        let [batch, length] = *out.shape();
        assert_eq!(batch, 2);
        assert!((2..=6).contains(&length));
        for row in out.data().chunks(length) {
            assert_eq!(row[0], model.config().start_token);
            assert!(row.iter().all(|&t| t < 15));
            // Nothing but padding follows an end token.
            if let Some(end) = row.iter().position(|&t| t == model.config().end_token) {
                assert!(row[end + 1..].iter().all(|&t| t == model.config().pad_token));
            }
        }
    }

    #[test]
    fn test_greedy_zero_steps_returns_start() {
        let model = Transformer::<f32>::new(config()).unwrap();
        let source = Tensor::new(vec![4, 8], [1, 2]).unwrap();
        let out = model.translate_greedy(&source, 0).unwrap();
        assert_eq!(out.data(), &[model.config().start_token]);
    }
}
