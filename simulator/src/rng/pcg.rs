//! PCG-XSH-RR 64/32 random number generator.
//!
//! # Algorithm
//!
//! A 64-bit linear congruential state with a 32-bit xorshift-rotate
//! output function (O'Neill's PCG family). The increment encodes the
//! stream id, so one seed supports many independent streams.
//!
//! # Determinism
//!
//! The generator uses only fixed-width wrapping arithmetic, so the
//! sequence for a given `(seed, stream)` pair is identical on every
//! platform regardless of host word size.

use serde::{Deserialize, Serialize};

const PCG_MULT: u64 = 6364136223846793005;

/// Deterministic per-stream random number generator.
///
/// # Example
/// ```
/// use rtgs_sim_core::rng::PcgRng;
///
/// let mut rng = PcgRng::new(12345, 0);
/// let value = rng.next_u64();
/// let amount = rng.range(10_000, 100_000); // [10_000, 100_000)
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcgRng {
    state: u64,
    /// Odd increment derived from the stream id; selects the stream.
    inc: u64,
}

impl PcgRng {
    /// Create a generator for `(seed, stream)`.
    pub fn new(seed: u64, stream: u64) -> Self {
        let mut rng = Self {
            state: 0,
            inc: (stream << 1) | 1,
        };
        rng.next_u32();
        rng.state = rng.state.wrapping_add(seed);
        rng.next_u32();
        rng
    }

    /// Generate the next 32-bit value.
    pub fn next_u32(&mut self) -> u32 {
        let old = self.state;
        self.state = old.wrapping_mul(PCG_MULT).wrapping_add(self.inc);
        let xorshifted = (((old >> 18) ^ old) >> 27) as u32;
        let rot = (old >> 59) as u32;
        xorshifted.rotate_right(rot)
    }

    /// Generate the next 64-bit value (two 32-bit outputs).
    pub fn next_u64(&mut self) -> u64 {
        let high = self.next_u32() as u64;
        let low = self.next_u32() as u64;
        (high << 32) | low
    }

    /// Generate a value in `[min, max)`.
    ///
    /// # Panics
    /// Panics if `min >= max`.
    pub fn range(&mut self, min: i64, max: i64) -> i64 {
        assert!(min < max, "min must be less than max");
        let span = (max - min) as u64;
        min + (self.next_u64() % span) as i64
    }

    /// Generate an f64 in `[0.0, 1.0)` with 53 bits of precision.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 * (1.0 / ((1u64 << 53) as f64))
    }

    /// Sample a Poisson-distributed count (Knuth's method).
    ///
    /// Returns 0 for non-positive `lambda`.
    pub fn poisson(&mut self, lambda: f64) -> u64 {
        if lambda <= 0.0 {
            return 0;
        }
        let limit = (-lambda).exp();
        let mut k: u64 = 0;
        let mut p = 1.0;
        loop {
            p *= self.next_f64();
            if p <= limit {
                return k;
            }
            k += 1;
        }
    }

    /// Sample a standard normal via the Box-Muller transform.
    pub fn standard_normal(&mut self) -> f64 {
        // ln(0) is avoided by flipping u1 into (0, 1]
        let u1 = 1.0 - self.next_f64();
        let u2 = self.next_f64();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }

    /// Sample a log-normal value with the given log-space parameters.
    pub fn log_normal(&mut self, mu: f64, sigma: f64) -> f64 {
        (mu + sigma * self.standard_normal()).exp()
    }
}
