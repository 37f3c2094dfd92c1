//! Deterministic random number generation for synthetic data.
//!
//! RULE: synthetic data never touches a platform RNG. Every stream is
//! derived from (master seed, stream index), so one day's rows are
//! reproducible without generating the days before it.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;

/// Largest single synthetic amount, in cents (9,999.99).
pub const MAX_AMOUNT_CENTS: i64 = 999_999;

pub struct SeededRng {
    inner: Pcg64Mcg,
}

impl SeededRng {
    /// The index must stay stable for a given stream.
    pub fn new(master_seed: u64, stream_index: u64) -> Self {
        let derived_seed = master_seed ^ (stream_index.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        Self {
            inner: Pcg64Mcg::seed_from_u64(derived_seed),
        }
    }

    /// Uniform index in [0, n). An empty range behaves like n = 1.
    pub fn pick(&mut self, n: u64) -> u64 {
        self.inner.gen_range(0..n.max(1))
    }

    /// Opaque 64-bit token, used to make row ids unique.
    pub fn token(&mut self) -> u64 {
        self.inner.gen()
    }

    pub fn chance(&mut self, p: f64) -> bool {
        self.inner.gen_bool(p.clamp(0.0, 1.0))
    }

    /// Pareto-tailed amount in whole cents, clamped to [1, MAX_AMOUNT_CENTS].
    /// Higher alpha gives a thinner tail.
    pub fn amount_cents(&mut self, x_min: f64, alpha: f64) -> i64 {
        // 1 - u is in (0, 1], so the power stays finite.
        let u = 1.0 - self.inner.gen::<f64>();
        let amount = x_min * u.powf(-1.0 / alpha);
        ((amount * 100.0).round() as i64).clamp(1, MAX_AMOUNT_CENTS)
    }
}
