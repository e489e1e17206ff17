//! Parameter initialisation.
//!
//! All randomness in the model is drawn from `StdRng` instances seeded through a [`SeedStream`],
//! so two models built from the same configuration materialise bit-identical parameters.

use crate::tensor::{FloatElem, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Hands out a distinct, reproducible seed to every layer that needs one.
///
/// Seeds are `base + n` for the `n`-th request, in construction order.
#[derive(Debug, Clone)]
pub struct SeedStream {
    base: u64,
    issued: u64,
}

impl SeedStream {
    pub fn new(base: u64) -> Self {
        Self { base, issued: 0 }
    }

    pub fn next_seed(&mut self) -> u64 {
        let seed = self.base.wrapping_add(self.issued);
        self.issued += 1;
        seed
    }
}

/// Samples every element independently from `U(-bound, bound)`.
pub fn uniform<T: FloatElem, const RANK: usize>(
    shape: [usize; RANK],
    bound: f64,
    seed: u64,
) -> Tensor<T, RANK> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = Tensor::zeros(shape);
    if bound > 0.0 {
        for x in out.data_mut() {
            *x = T::from_f64(rng.random_range(-bound..bound)).unwrap_or_else(T::zero);
        }
    }
    out
}

/// Glorot (Xavier) uniform initialisation for a `[out_features, in_features]` weight:
/// `U(-sqrt(6 / (in + out)), sqrt(6 / (in + out)))`.
pub fn glorot_uniform<T: FloatElem>(shape: [usize; 2], seed: u64) -> Tensor<T, 2> {
    let fan_sum = (shape[0] + shape[1]) as f64;
    let bound = if fan_sum > 0.0 {
        (6.0 / fan_sum).sqrt()
    } else {
        0.0
    };
    uniform(shape, bound, seed)
}
