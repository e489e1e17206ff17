use crate::error::Result as CrateResult;
use crate::nn::init;
use crate::nn::module::{scoped, take_param, Module, ParamMut, ParamRef, StateDict};
use crate::tensor::{FloatElem, Result, Tensor, TensorElem, TensorError};
use std::sync::OnceLock;
use tracing::debug;

/// Linear Layer: `y = xA^T + b`
///
/// Every input feature is connected to every output feature.
///
/// - **Weights ($A$):** `[out_features, in_features]`
/// - **Bias ($b$):** `[out_features]`, optional
///
/// # Lazy construction
///
/// A layer built with [`Linear::lazy`] only knows its output width. The input width is taken
/// from the first tensor passed to [`Linear::forward`], at which point a Glorot-uniform weight
/// and a zero bias are materialised from the layer's seed. From then on the input width is fixed:
/// a later call with a different trailing dimension is a `ShapeMismatch`.
///
/// # Examples
/// ```rust
/// use seq2seq_rs::nn::Linear;
/// use seq2seq_rs::tensor::Tensor;
///
/// let layer = Linear::<f32>::lazy(5, 0);
/// assert!(layer.weight().is_none());
///
/// let out = layer.forward(&Tensor::<f32, 3>::ones([2, 4, 10])).unwrap();
/// assert_eq!(out.shape(), &[2, 4, 5]);
/// assert_eq!(layer.weight().unwrap().shape(), &[5, 10]);
/// ```
#[derive(Debug)]
pub struct Linear<T: TensorElem> {
    out_features: usize,
    seed: u64,
    params: OnceLock<LinearParams<T>>,
}

#[derive(Debug, Clone)]
struct LinearParams<T: TensorElem> {
    weight: Tensor<T, 2>,
    bias: Option<Tensor<T, 1>>,
}

impl<T: TensorElem> Linear<T> {
    /// Creates a Linear layer from explicit parameters.
    ///
    /// * `weight` - `[out_features, in_features]`.
    /// * `bias` - optional `[out_features]`.
    pub fn new(weight: Tensor<T, 2>, bias: Option<Tensor<T, 1>>) -> Self {
        Self {
            out_features: weight.shape()[0],
            seed: 0,
            params: OnceLock::from(LinearParams { weight, bias }),
        }
    }

    /// Creates a Linear layer whose parameters are materialised on the first forward pass.
    pub fn lazy(out_features: usize, seed: u64) -> Self {
        Self {
            out_features,
            seed,
            params: OnceLock::new(),
        }
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// The input width, once known.
    pub fn in_features(&self) -> Option<usize> {
        self.params.get().map(|p| p.weight.shape()[1])
    }

    pub fn weight(&self) -> Option<&Tensor<T, 2>> {
        self.params.get().map(|p| &p.weight)
    }

    pub fn bias(&self) -> Option<&Tensor<T, 1>> {
        self.params.get().and_then(|p| p.bias.as_ref())
    }
}

impl<T: FloatElem> Linear<T> {
    fn materialise(&self, in_features: usize) -> &LinearParams<T> {
        self.params.get_or_init(|| {
            debug!(
                in_features,
                out_features = self.out_features,
                seed = self.seed,
                "materialising linear layer"
            );
            LinearParams {
                weight: init::glorot_uniform([self.out_features, in_features], self.seed),
                bias: Some(Tensor::zeros([self.out_features])),
            }
        })
    }

    /// Applies the layer to the last axis of `x`, for any rank >= 1.
    ///
    /// `[..., in_features] -> [..., out_features]`
    pub fn forward<const RANK: usize>(&self, x: &Tensor<T, RANK>) -> Result<Tensor<T, RANK>> {
        if RANK == 0 {
            return Err(TensorError::Unsupported(
                "Linear requires rank >= 1".into(),
            ));
        }
        let in_features = x.shape()[RANK - 1];
        let params = self.materialise(in_features);

        let [out_features, weight_in] = *params.weight.shape();
        if weight_in != in_features {
            return Err(TensorError::ShapeMismatch {
                expected: vec![weight_in],
                got: vec![in_features],
            });
        }

        let rows = x.size().checked_div(in_features).unwrap_or(0);
        let flat: Tensor<T, 2> = x.clone().reshape([rows, in_features])?;
        let mut out = flat.matmul_transposed(&params.weight)?;
        if let Some(bias) = &params.bias {
            out = out.add_broadcast(bias)?;
        }

        let mut out_shape = *x.shape();
        out_shape[RANK - 1] = out_features;
        out.reshape(out_shape)
    }
}

impl<T: TensorElem> Module<T> for Linear<T> {
    fn parameters(&self) -> Vec<(String, ParamRef<'_, T>)> {
        let Some(params) = self.params.get() else {
            return Vec::new();
        };
        let mut out = vec![("weight".to_string(), ParamRef::from(&params.weight))];
        if let Some(bias) = &params.bias {
            out.push(("bias".to_string(), ParamRef::from(bias)));
        }
        out
    }

    fn parameters_mut(&mut self) -> Vec<(String, ParamMut<'_, T>)> {
        let Some(params) = self.params.get_mut() else {
            return Vec::new();
        };
        let mut out = vec![("weight".to_string(), ParamMut::from(&mut params.weight))];
        if let Some(bias) = params.bias.as_mut() {
            out.push(("bias".to_string(), ParamMut::from(bias)));
        }
        out
    }

    fn check_parameters(&self, prefix: &str, state: &StateDict<T>) -> CrateResult<()> {
        self.read_params(prefix, state).map(drop)
    }

    fn apply_parameters(&mut self, prefix: &str, state: &StateDict<T>) -> CrateResult<()> {
        self.params = OnceLock::from(self.read_params(prefix, state)?);
        Ok(())
    }
}

impl<T: TensorElem> Linear<T> {
    /// Reads `prefix.weight` and the optional `prefix.bias`, checking them against this
    /// layer's output width.
    fn read_params(&self, prefix: &str, state: &StateDict<T>) -> CrateResult<LinearParams<T>> {
        let weight: Tensor<T, 2> = take_param(state, &scoped(prefix, "weight"), None)?;
        let out_features = weight.shape()[0];
        if out_features != self.out_features {
            return Err(TensorError::ShapeMismatch {
                expected: vec![self.out_features],
                got: vec![out_features],
            }
            .into());
        }

        let bias_name = scoped(prefix, "bias");
        let bias = if state.contains_key(&bias_name) {
            Some(take_param(state, &bias_name, Some([out_features]))?)
        } else {
            None
        };
        Ok(LinearParams { weight, bias })
    }
}
