//! Activation Functions.
//!
//! Every dense projection inside the attention block is followed by a non-linearity. Which one is
//! configurable; the default is ReLU.
//!
//! - **ReLU**: $f(x) = \max(0, x)$.
//! - **GELU**: Gaussian Error Linear Unit, smoother than ReLU.
//! - **SiLU** (Swish): $x \cdot \sigma(x)$.
//! - **Tanh**: $\tanh(x)$.
//! - **Identity**: no non-linearity.

use crate::tensor::{FloatElem, Tensor};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Relu,
    Gelu,
    Silu,
    Tanh,
    Identity,
}

impl Activation {
    /// Applies the activation to a single value.
    pub fn apply<T: FloatElem>(self, x: T) -> T {
        match self {
            Activation::Relu => relu(x),
            Activation::Gelu => gelu(x),
            Activation::Silu => silu(x),
            Activation::Tanh => x.tanh(),
            Activation::Identity => x,
        }
    }

    /// Applies the activation element-wise to a tensor.
    pub fn forward<T: FloatElem, const RANK: usize>(self, x: &Tensor<T, RANK>) -> Tensor<T, RANK> {
        match self {
            Activation::Identity => x.clone(),
            act => x.map(move |v| act.apply(v)),
        }
    }
}

pub fn relu<T: FloatElem>(x: T) -> T {
    if x > T::zero() {
        x
    } else {
        T::zero()
    }
}

/// $$ \text{SiLU}(x) = \frac{x}{1 + e^{-x}} $$
pub fn silu<T: FloatElem>(x: T) -> T {
    x / (T::one() + (-x).exp())
}

/// Tanh approximation of GELU:
///
/// $$ \text{GELU}(x) \approx 0.5 x (1 + \tanh[\sqrt{2/\pi} (x + 0.044715 x^3)]) $$
pub fn gelu<T: FloatElem>(x: T) -> T {
    let half = T::from_f64(0.5).unwrap_or_else(T::zero);
    let c = T::from_f64(0.044715).unwrap_or_else(T::zero);
    let sqrt_2_over_pi = T::from_f64((2.0 / std::f64::consts::PI).sqrt()).unwrap_or_else(T::one);

    half * x * (T::one() + (sqrt_2_over_pi * (x + c * x * x * x)).tanh())
}
