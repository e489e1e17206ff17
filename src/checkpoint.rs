//! Checkpointing in the `safetensors` format.
//!
//! A checkpoint holds every materialised parameter of a [`Module`] under its dotted name
//! (`encoder.attention.heads.0.query.weight`, ...), with its shape preserved. Lazy layers that
//! have not seen an input yet are simply absent from a saved file; loading a checkpoint into a
//! fresh model materialises them without a warm-up pass.
//!
//! ```rust, no_run
//! use seq2seq_rs::checkpoint;
//! use seq2seq_rs::config::TransformerConfig;
//! use seq2seq_rs::models::Transformer;
//!
//! let mut model = Transformer::<f32>::new(TransformerConfig::new(100, 80)).unwrap();
//! checkpoint::restore("model.safetensors", &mut model).unwrap();
//! ```

use crate::error::{Error, Result};
use crate::nn::module::{Module, StateDict, StateTensor};
use crate::tensor::{FloatElem, TensorError};
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use std::path::Path;
use tracing::info;

/// Element types that can be written to and read from a checkpoint.
pub trait CheckpointElem: FloatElem {
    const DTYPE: Dtype;

    fn extend_le_bytes(self, out: &mut Vec<u8>);

    /// Decodes one little-endian element; `None` if `bytes` has the wrong length.
    fn from_le_chunk(bytes: &[u8]) -> Option<Self>;
}

impl CheckpointElem for f32 {
    const DTYPE: Dtype = Dtype::F32;

    fn extend_le_bytes(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn from_le_chunk(bytes: &[u8]) -> Option<Self> {
        Some(f32::from_le_bytes(bytes.try_into().ok()?))
    }
}

impl CheckpointElem for f64 {
    const DTYPE: Dtype = Dtype::F64;

    fn extend_le_bytes(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn from_le_chunk(bytes: &[u8]) -> Option<Self> {
        Some(f64::from_le_bytes(bytes.try_into().ok()?))
    }
}

/// Writes every materialised parameter of `module` to `path`. Returns the number of tensors
/// written.
pub fn save<T, M>(path: impl AsRef<Path>, module: &M) -> Result<usize>
where
    T: CheckpointElem,
    M: Module<T> + ?Sized,
{
    save_state(path, &module.state_dict())
}

/// Writes a state dict to `path`. Returns the number of tensors written.
pub fn save_state<T: CheckpointElem>(
    path: impl AsRef<Path>,
    state: &StateDict<T>,
) -> Result<usize> {
    let path = path.as_ref();

    let encoded: Vec<(&str, &[usize], Vec<u8>)> = state
        .iter()
        .map(|(name, tensor)| {
            let mut bytes = Vec::with_capacity(std::mem::size_of_val(tensor.data()));
            for &v in tensor.data() {
                v.extend_le_bytes(&mut bytes);
            }
            (name.as_str(), tensor.shape(), bytes)
        })
        .collect();

    let views = encoded
        .iter()
        .map(|(name, shape, bytes)| {
            TensorView::new(T::DTYPE, shape.to_vec(), bytes).map(|view| (*name, view))
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    safetensors::serialize_to_file(views, &None, path)?;
    info!(path = %path.display(), tensors = state.len(), "saved checkpoint");
    Ok(state.len())
}

/// Reads every tensor stored at `path`.
///
/// # Errors
///
/// [`Error::DtypeMismatch`] if a stored tensor is not of type `T`; I/O and format errors
/// otherwise.
pub fn load<T: CheckpointElem>(path: impl AsRef<Path>) -> Result<StateDict<T>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    let file = SafeTensors::deserialize(&bytes)?;

    let mut state = StateDict::new();
    for (name, view) in file.tensors() {
        if view.dtype() != T::DTYPE {
            return Err(Error::DtypeMismatch {
                name,
                expected: format!("{:?}", T::DTYPE),
                found: format!("{:?}", view.dtype()),
            });
        }
        let data = view
            .data()
            .chunks_exact(std::mem::size_of::<T>())
            .map(T::from_le_chunk)
            .collect::<Option<Vec<T>>>()
            .ok_or_else(|| {
                TensorError::Unsupported(format!("tensor `{}` has a truncated payload", name))
            })?;
        let tensor = StateTensor::new(view.shape().to_vec(), data)?;
        state.insert(name, tensor);
    }

    info!(path = %path.display(), tensors = state.len(), "loaded checkpoint");
    Ok(state)
}

/// Loads `path` into `module`, materialising any lazy layers.
///
/// Every entry is checked before the first parameter is replaced, so on error `module` is
/// unchanged.
pub fn restore<T, M>(path: impl AsRef<Path>, module: &mut M) -> Result<()>
where
    T: CheckpointElem,
    M: Module<T> + ?Sized,
{
    let state = load::<T>(path)?;
    module.load_parameters("", &state)
}
