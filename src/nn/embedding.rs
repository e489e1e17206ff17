use crate::error::Result as CrateResult;
use crate::nn::init;
use crate::nn::module::{scoped, take_param, Module, ParamMut, ParamRef, StateDict};
use crate::tensor::{FloatElem, Result, Tensor, TensorElem, TensorError};
use rayon::prelude::*;

/// Token embedding lookup table, `[vocab_size, d_model]`.
#[derive(Debug, Clone)]
pub struct Embedding<T: TensorElem> {
    pub weight: Tensor<T, 2>,
}

impl<T: TensorElem> Embedding<T> {
    pub fn new(weight: Tensor<T, 2>) -> Self {
        Self { weight }
    }

    pub fn vocab_size(&self) -> usize {
        self.weight.shape()[0]
    }

    pub fn embedding_dim(&self) -> usize {
        self.weight.shape()[1]
    }

    /// Maps `[batch, length]` token ids to `[batch, length, d_model]` vectors.
    ///
    /// # Errors
    ///
    /// `TensorError::IndexOutOfBounds` if any id is `>= vocab_size`.
    pub fn forward(&self, input: &Tensor<usize, 2>) -> Result<Tensor<T, 3>> {
        let [batch_size, seq_len] = *input.shape();
        let [vocab_size, hidden_dim] = *self.weight.shape();

        if let Some(&bad) = input.data().iter().find(|&&id| id >= vocab_size) {
            return Err(TensorError::IndexOutOfBounds {
                index: vec![bad],
                shape: vec![vocab_size, hidden_dim],
            });
        }

        let mut out = Tensor::zeros([batch_size, seq_len, hidden_dim]);
        if hidden_dim == 0 {
            return Ok(out);
        }
        let weight_data = self.weight.data();
        out.data_mut()
            .par_chunks_mut(hidden_dim)
            .zip(input.data().par_iter())
            .for_each(|(row, &token_id)| {
                let start = token_id * hidden_dim;
                row.copy_from_slice(&weight_data[start..start + hidden_dim]);
            });

        Ok(out)
    }
}

impl<T: FloatElem> Embedding<T> {
    /// A table initialised from `U(-0.05, 0.05)`.
    pub fn random(vocab_size: usize, embedding_dim: usize, seed: u64) -> Self {
        Self::new(init::uniform([vocab_size, embedding_dim], 0.05, seed))
    }
}

impl<T: TensorElem> Embedding<T> {
    fn read_weight(&self, prefix: &str, state: &StateDict<T>) -> CrateResult<Tensor<T, 2>> {
        take_param(state, &scoped(prefix, "weight"), Some(*self.weight.shape()))
    }
}

impl<T: TensorElem> Module<T> for Embedding<T> {
    fn parameters(&self) -> Vec<(String, ParamRef<'_, T>)> {
        vec![("weight".to_string(), ParamRef::from(&self.weight))]
    }

    fn parameters_mut(&mut self) -> Vec<(String, ParamMut<'_, T>)> {
        vec![("weight".to_string(), ParamMut::from(&mut self.weight))]
    }

    fn check_parameters(&self, prefix: &str, state: &StateDict<T>) -> CrateResult<()> {
        self.read_weight(prefix, state).map(drop)
    }

    fn apply_parameters(&mut self, prefix: &str, state: &StateDict<T>) -> CrateResult<()> {
        self.weight = self.read_weight(prefix, state)?;
        Ok(())
    }
}
