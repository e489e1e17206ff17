//! Crate-level error type.
//!
//! Layer arithmetic reports [`TensorError`] directly. Anything that touches the outside world
//! (configuration files, checkpoints) or combines several failure sources reports [`Error`].

use crate::tensor::TensorError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Tensor(#[from] TensorError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Checkpoint format error: {0}")]
    SafeTensors(#[from] safetensors::SafeTensorError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Parameter `{0}` not found in state dict")]
    MissingParameter(String),

    #[error("Checkpoint tensor `{name}` has dtype {found}, expected {expected}")]
    DtypeMismatch {
        name: String,
        expected: String,
        found: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
