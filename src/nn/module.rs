use crate::error::{Error, Result};
use crate::tensor::{Tensor, TensorElem, TensorError};
use std::collections::BTreeMap;
use std::fmt::Debug;

/// A Module trait for Neural Network layers.
///
/// Every layer and every composite block (attention, encoder, decoder) implements it, which gives
/// one uniform way to:
///
/// 1.  **Enumerate parameters** under stable dotted names (`heads.0.query.weight`), which is what
///     an external optimizer and the checkpoint writer consume.
/// 2.  **Restore parameters** from a [`StateDict`], materialising lazily-shaped layers without a
///     warm-up forward pass.
///
/// `Send + Sync` is required because forward passes take `&self` and run heads in parallel.
pub trait Module<T: TensorElem>: Debug + Send + Sync {
    /// Read views of every materialised parameter, keyed by dotted name relative to this module.
    fn parameters(&self) -> Vec<(String, ParamRef<'_, T>)>;

    /// Write views of every materialised parameter. Only one writer may exist at a time, which
    /// `&mut self` enforces.
    fn parameters_mut(&mut self) -> Vec<(String, ParamMut<'_, T>)>;

    /// Verifies that `state` holds every entry [`Module::apply_parameters`] would read under
    /// `prefix`, with the right shapes, without touching `self`.
    fn check_parameters(&self, prefix: &str, state: &StateDict<T>) -> Result<()>;

    /// Overwrites parameters sub-module by sub-module. An error part-way through leaves the
    /// earlier sub-modules replaced; use [`Module::load_parameters`] unless `state` was
    /// already checked.
    fn apply_parameters(&mut self, prefix: &str, state: &StateDict<T>) -> Result<()>;

    /// Replaces this module's parameters with the entries named `prefix.<name>` in `state`.
    ///
    /// All or nothing: on error the module is left exactly as it was.
    fn load_parameters(&mut self, prefix: &str, state: &StateDict<T>) -> Result<()> {
        self.check_parameters(prefix, state)?;
        self.apply_parameters(prefix, state)
    }

    /// Total number of scalar parameters currently materialised.
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|(_, p)| p.data.len()).sum()
    }

    /// Owned copy of every materialised parameter.
    fn state_dict(&self) -> StateDict<T> {
        self.parameters()
            .into_iter()
            .map(|(name, p)| (name, StateTensor::from(p)))
            .collect()
    }
}

/// Borrowed, rank-erased view of one parameter tensor.
#[derive(Debug, Clone, Copy)]
pub struct ParamRef<'a, T> {
    pub shape: &'a [usize],
    pub data: &'a [T],
}

impl<'a, T: TensorElem, const RANK: usize> From<&'a Tensor<T, RANK>> for ParamRef<'a, T> {
    fn from(tensor: &'a Tensor<T, RANK>) -> Self {
        Self {
            shape: &tensor.shape()[..],
            data: tensor.data(),
        }
    }
}

/// Mutable, rank-erased view of one parameter tensor. The shape is fixed; only values change.
#[derive(Debug)]
pub struct ParamMut<'a, T> {
    pub shape: &'a [usize],
    pub data: &'a mut [T],
}

impl<'a, T: TensorElem, const RANK: usize> From<&'a mut Tensor<T, RANK>> for ParamMut<'a, T> {
    fn from(tensor: &'a mut Tensor<T, RANK>) -> Self {
        let (shape, data) = tensor.shape_and_data_mut();
        Self {
            shape: &shape[..],
            data,
        }
    }
}

/// An owned tensor whose rank is only known at runtime, as read back from a checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct StateTensor<T> {
    shape: Vec<usize>,
    data: Vec<T>,
}

impl<T: TensorElem> StateTensor<T> {
    pub fn new(shape: Vec<usize>, data: Vec<T>) -> crate::tensor::Result<Self> {
        let size: usize = shape.iter().product();
        if size != data.len() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![size],
                got: vec![data.len()],
            });
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Converts into a fixed-rank tensor, failing if the stored rank differs.
    pub fn to_tensor<const RANK: usize>(&self) -> crate::tensor::Result<Tensor<T, RANK>> {
        let shape: [usize; RANK] =
            self.shape
                .as_slice()
                .try_into()
                .map_err(|_| TensorError::ShapeMismatch {
                    expected: vec![RANK],
                    got: vec![self.shape.len()],
                })?;
        Tensor::new(self.data.clone(), shape)
    }
}

impl<T: TensorElem> From<ParamRef<'_, T>> for StateTensor<T> {
    fn from(param: ParamRef<'_, T>) -> Self {
        Self {
            shape: param.shape.to_vec(),
            data: param.data.to_vec(),
        }
    }
}

/// Named parameters of a whole model, ordered by name.
pub type StateDict<T> = BTreeMap<String, StateTensor<T>>;

/// Joins a module scope and a parameter name with a dot.
pub fn scoped(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

/// Prepends `scope` to every name in a child module's parameter list.
pub(crate) fn nest<'a, P: 'a>(
    scope: &'a str,
    params: Vec<(String, P)>,
) -> impl Iterator<Item = (String, P)> + 'a {
    params
        .into_iter()
        .map(move |(name, p)| (scoped(scope, &name), p))
}

/// Looks up `name` in `state` and checks that it has the expected shape.
pub(crate) fn take_param<T: TensorElem, const RANK: usize>(
    state: &StateDict<T>,
    name: &str,
    expected: Option<[usize; RANK]>,
) -> Result<Tensor<T, RANK>> {
    let stored = state
        .get(name)
        .ok_or_else(|| Error::MissingParameter(name.to_string()))?;
    let tensor = stored.to_tensor::<RANK>()?;
    if let Some(shape) = expected {
        if tensor.shape() != &shape {
            return Err(TensorError::ShapeMismatch {
                expected: shape.to_vec(),
                got: tensor.shape().to_vec(),
            }
            .into());
        }
    }
    Ok(tensor)
}
