//! Model configuration.
//!
//! Every hyperparameter lives in one [`TransformerConfig`] that is passed explicitly to each
//! component constructor. It can be built in code or read from JSON; fields left out of the
//! JSON take their defaults.
//!
//! ```rust
//! use seq2seq_rs::config::TransformerConfig;
//!
//! let config = TransformerConfig::from_json_str(
//!     r#"{ "d_model": 32, "n_heads": 2, "source_vocab_size": 100, "target_vocab_size": 80 }"#,
//! )
//! .unwrap();
//! assert_eq!(config.dropout_rate, 0.2);
//! ```

use crate::error::{Error, Result};
use crate::nn::Activation;
use crate::positional::FrequencyIndex;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformerConfig {
    /// Feature width shared by every sub-layer.
    pub d_model: usize,
    /// Attention heads per attention block. Each head works at the full `d_model` width.
    pub n_heads: usize,
    pub source_vocab_size: usize,
    pub target_vocab_size: usize,
    /// Dropout applied to the attention block's output projection during training.
    pub dropout_rate: f64,
    /// Non-linearity after every dense projection inside attention.
    pub activation: Activation,
    pub layer_norm_epsilon: f64,
    /// Magnitude of the additive penalty on masked attention scores.
    pub mask_penalty: f64,
    pub pad_token: usize,
    pub frequency_index: FrequencyIndex,
    /// Project the value source through its own dense layer per head. Off by default: heads
    /// attend over the raw value source.
    pub project_values: bool,
    pub start_token: usize,
    pub end_token: usize,
    pub max_decode_len: usize,
    /// Base seed for every parameter initialiser and dropout generator.
    pub seed: u64,
}

impl Default for TransformerConfig {
    fn default() -> Self {
        Self {
            d_model: 128,
            n_heads: 4,
            source_vocab_size: 8000,
            target_vocab_size: 8000,
            dropout_rate: 0.2,
            activation: Activation::Relu,
            layer_norm_epsilon: 1e-3,
            mask_penalty: 1e9,
            pad_token: 0,
            frequency_index: FrequencyIndex::Raw,
            project_values: false,
            start_token: 2,
            end_token: 3,
            max_decode_len: 40,
            seed: 0,
        }
    }
}

impl TransformerConfig {
    /// Default hyperparameters for the given vocabulary sizes.
    pub fn new(source_vocab_size: usize, target_vocab_size: usize) -> Self {
        Self {
            source_vocab_size,
            target_vocab_size,
            ..Self::default()
        }
    }

    pub fn with_d_model(mut self, d_model: usize) -> Self {
        self.d_model = d_model;
        self
    }

    pub fn with_n_heads(mut self, n_heads: usize) -> Self {
        self.n_heads = n_heads;
        self
    }

    pub fn with_dropout_rate(mut self, dropout_rate: f64) -> Self {
        self.dropout_rate = dropout_rate;
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_layer_norm_epsilon(mut self, eps: f64) -> Self {
        self.layer_norm_epsilon = eps;
        self
    }

    pub fn with_mask_penalty(mut self, penalty: f64) -> Self {
        self.mask_penalty = penalty;
        self
    }

    pub fn with_pad_token(mut self, pad_token: usize) -> Self {
        self.pad_token = pad_token;
        self
    }

    pub fn with_frequency_index(mut self, frequency_index: FrequencyIndex) -> Self {
        self.frequency_index = frequency_index;
        self
    }

    pub fn with_project_values(mut self, project_values: bool) -> Self {
        self.project_values = project_values;
        self
    }

    pub fn with_special_tokens(mut self, start_token: usize, end_token: usize) -> Self {
        self.start_token = start_token;
        self.end_token = end_token;
        self
    }

    pub fn with_max_decode_len(mut self, max_decode_len: usize) -> Self {
        self.max_decode_len = max_decode_len;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Rejects configurations no model can be built from.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidConfig(msg));

        if self.d_model == 0 {
            return invalid("d_model must be positive".into());
        }
        if self.n_heads == 0 {
            return invalid("n_heads must be positive".into());
        }
        if self.source_vocab_size == 0 || self.target_vocab_size == 0 {
            return invalid(format!(
                "vocabulary sizes must be positive, got source {} and target {}",
                self.source_vocab_size, self.target_vocab_size
            ));
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return invalid(format!(
                "dropout_rate must be in [0, 1), got {}",
                self.dropout_rate
            ));
        }
        if self.layer_norm_epsilon <= 0.0 || self.layer_norm_epsilon.is_nan() {
            return invalid(format!(
                "layer_norm_epsilon must be positive, got {}",
                self.layer_norm_epsilon
            ));
        }
        if self.mask_penalty.is_nan() || self.mask_penalty < 0.0 {
            return invalid(format!(
                "mask_penalty must be non-negative, got {}",
                self.mask_penalty
            ));
        }
        for (name, token) in [
            ("pad_token", self.pad_token),
            ("start_token", self.start_token),
            ("end_token", self.end_token),
        ] {
            if token >= self.target_vocab_size {
                return invalid(format!(
                    "{} {} is outside the target vocabulary of {}",
                    name, token, self.target_vocab_size
                ));
            }
        }
        if self.pad_token >= self.source_vocab_size {
            return invalid(format!(
                "pad_token {} is outside the source vocabulary of {}",
                self.pad_token, self.source_vocab_size
            ));
        }
        Ok(())
    }
}
