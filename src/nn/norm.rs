use crate::error::Result as CrateResult;
use crate::nn::module::{scoped, take_param, Module, ParamMut, ParamRef, StateDict};
use crate::tensor::{FloatElem, Result, Tensor, TensorElem, TensorError};
use rayon::prelude::*;
use std::sync::OnceLock;
use tracing::debug;

/// Layer Normalization.
///
/// Standardises every feature vector (the last axis) to zero mean and unit variance, then applies
/// a learned scale (gamma) and shift (beta):
/// `y = (x - mean) / sqrt(var + eps) * gamma + beta`
///
/// Like [`Linear`](crate::nn::Linear), the feature width may be left open and fixed by the first
/// input; gamma then starts at ones and beta at zeros.
#[derive(Debug)]
pub struct LayerNorm<T: TensorElem> {
    eps: T,
    params: OnceLock<NormParams<T>>,
}

#[derive(Debug, Clone)]
struct NormParams<T: TensorElem> {
    weight: Tensor<T, 1>,
    bias: Tensor<T, 1>,
}

impl<T: FloatElem> LayerNorm<T> {
    /// Creates a LayerNorm with explicit gamma (`weight`) and beta (`bias`), both `[features]`.
    pub fn new(weight: Tensor<T, 1>, bias: Tensor<T, 1>, eps: T) -> Self {
        Self {
            eps,
            params: OnceLock::from(NormParams { weight, bias }),
        }
    }

    /// Creates a LayerNorm whose width is fixed by the first input it sees.
    pub fn lazy(eps: T) -> Self {
        Self {
            eps,
            params: OnceLock::new(),
        }
    }

    pub fn eps(&self) -> T {
        self.eps
    }

    pub fn weight(&self) -> Option<&Tensor<T, 1>> {
        self.params.get().map(|p| &p.weight)
    }

    pub fn bias(&self) -> Option<&Tensor<T, 1>> {
        self.params.get().map(|p| &p.bias)
    }

    fn materialise(&self, features: usize) -> &NormParams<T> {
        self.params.get_or_init(|| {
            debug!(features, "materialising layer norm");
            NormParams {
                weight: Tensor::ones([features]),
                bias: Tensor::zeros([features]),
            }
        })
    }

    /// Normalises over the last dimension.
    pub fn forward<const RANK: usize>(&self, x: &Tensor<T, RANK>) -> Result<Tensor<T, RANK>> {
        if RANK == 0 {
            return Err(TensorError::Unsupported(
                "LayerNorm requires rank >= 1".into(),
            ));
        }
        let last_dim = x.shape()[RANK - 1];
        let params = self.materialise(last_dim);
        let (weight, bias) = (params.weight.data(), params.bias.data());
        if last_dim != weight.len() || last_dim != bias.len() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![weight.len(), bias.len()],
                got: vec![last_dim],
            });
        }

        let mut out = Tensor::zeros(*x.shape());
        if last_dim == 0 {
            return Ok(out);
        }
        let n = T::from_usize(last_dim).unwrap_or_else(T::one);
        let eps = self.eps;

        out.data_mut()
            .par_chunks_mut(last_dim)
            .zip(x.data().par_chunks(last_dim))
            .for_each(|(out_row, in_row)| {
                let mean = in_row.iter().fold(T::zero(), |acc, &v| acc + v) / n;
                let var = in_row
                    .iter()
                    .fold(T::zero(), |acc, &v| acc + (v - mean) * (v - mean))
                    / n;
                let rstd = T::one() / (var + eps).sqrt();

                for (i, o) in out_row.iter_mut().enumerate() {
                    *o = (in_row[i] - mean) * rstd * weight[i] + bias[i];
                }
            });

        Ok(out)
    }
}

fn read_norm_params<T: TensorElem>(
    prefix: &str,
    state: &StateDict<T>,
) -> CrateResult<NormParams<T>> {
    let weight: Tensor<T, 1> = take_param(state, &scoped(prefix, "weight"), None)?;
    let bias = take_param(state, &scoped(prefix, "bias"), Some(*weight.shape()))?;
    Ok(NormParams { weight, bias })
}

impl<T: TensorElem> Module<T> for LayerNorm<T> {
    fn parameters(&self) -> Vec<(String, ParamRef<'_, T>)> {
        match self.params.get() {
            Some(p) => vec![
                ("weight".to_string(), ParamRef::from(&p.weight)),
                ("bias".to_string(), ParamRef::from(&p.bias)),
            ],
            None => Vec::new(),
        }
    }

    fn parameters_mut(&mut self) -> Vec<(String, ParamMut<'_, T>)> {
        match self.params.get_mut() {
            Some(p) => vec![
                ("weight".to_string(), ParamMut::from(&mut p.weight)),
                ("bias".to_string(), ParamMut::from(&mut p.bias)),
            ],
            None => Vec::new(),
        }
    }

    fn check_parameters(&self, prefix: &str, state: &StateDict<T>) -> CrateResult<()> {
        read_norm_params(prefix, state).map(drop)
    }

    fn apply_parameters(&mut self, prefix: &str, state: &StateDict<T>) -> CrateResult<()> {
        self.params = OnceLock::from(read_norm_params(prefix, state)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layernorm_forward() {
        let input = Tensor::<f32, 1>::new(vec![1.0, 2.0, 3.0], [3]).unwrap();
        let norm = LayerNorm::new(Tensor::ones([3]), Tensor::zeros([3]), 1e-5);

        let output = norm.forward(&input).unwrap();

        let std = (2.0f32 / 3.0 + 1e-5).sqrt();
        let expected = [-1.0 / std, 0.0, 1.0 / std];
        for (got, exp) in output.data().iter().zip(expected.iter()) {
            assert!((got - exp).abs() < 1e-4);
        }
    }

    #[test]
    fn test_layernorm_gamma_beta() {
        let input = Tensor::<f32, 2>::new(vec![1.0, 3.0, 5.0, 5.0], [2, 2]).unwrap();
        let norm = LayerNorm::new(
            Tensor::new(vec![2.0, 2.0], [2]).unwrap(),
            Tensor::new(vec![1.0, 1.0], [2]).unwrap(),
            0.0,
        );

        let out = norm.forward(&input).unwrap();
        // Row 1 is constant and eps is zero, so only row 0 is meaningful.
        assert!((out.data()[0] + 1.0).abs() < 1e-6);
        assert!((out.data()[1] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_lazy_layernorm_rows_standardised() {
        let norm = LayerNorm::<f64>::lazy(1e-3);
        let x = Tensor::<f64, 3>::from_fn([2, 3, 4], |[b, l, d]| (b * 7 + l * 3 + d * d) as f64);

        let out = norm.forward(&x).unwrap();
        assert_eq!(norm.num_parameters(), 8);
        for row in out.data().chunks(4) {
            let mean: f64 = row.iter().sum::<f64>() / 4.0;
            assert!(mean.abs() < 1e-9);
        }
    }

    #[test]
    fn test_layernorm_shape_mismatch() {
        let norm = LayerNorm::new(Tensor::<f32, 1>::ones([4]), Tensor::zeros([4]), 1e-5);
        assert!(norm.forward(&Tensor::<f32, 2>::zeros([2, 3])).is_err());
    }
}
