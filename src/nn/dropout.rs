//! Dropout regularisation.
//!
//! In [`Mode::Training`] each element is zeroed with probability `p` and survivors are scaled by
//! `1/(1-p)` (inverted dropout) so the expected activation is unchanged. In
//! [`Mode::Inference`] the layer is the identity.

use crate::nn::Mode;
use crate::tensor::{FloatElem, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Mutex, PoisonError};

#[derive(Debug)]
pub struct Dropout {
    rate: f64,
    rng: Mutex<StdRng>,
}

impl Dropout {
    /// Creates a dropout layer dropping a fraction `rate` of activations, with its own seeded
    /// generator.
    pub fn new(rate: f64, seed: u64) -> Self {
        Self {
            rate,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn forward<T: FloatElem, const RANK: usize>(
        &self,
        x: &Tensor<T, RANK>,
        mode: Mode,
    ) -> Tensor<T, RANK> {
        if mode == Mode::Inference || self.rate <= 0.0 {
            return x.clone();
        }

        let scale = if self.rate < 1.0 {
            T::from_f64(1.0 / (1.0 - self.rate)).unwrap_or_else(T::one)
        } else {
            T::zero()
        };

        // The generator is shared by every forward pass of this layer; drawing the mask
        // sequentially keeps runs reproducible for a fixed seed.
        let keep: Vec<bool> = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            (0..x.size())
                .map(|_| rng.random::<f64>() >= self.rate)
                .collect()
        };

        let mut out = x.clone();
        for (o, kept) in out.data_mut().iter_mut().zip(keep) {
            *o = if kept { *o * scale } else { T::zero() };
        }
        out
    }
}
