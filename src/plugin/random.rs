//! Random sources for the sweep trigger.
//!
//! Sampling goes through the [`RandomSource`] trait so tests can inject a
//! seeded generator instead of the thread-local one.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Mutex, PoisonError};

/// A uniform integer generator.
pub trait RandomSource: Send + Sync {
    /// Returns a value drawn uniformly from `1..=upper`.
    ///
    /// `upper` is never 0.
    fn draw(&self, upper: u32) -> u32;
}

/// Draws from the calling thread's `rand::thread_rng`.
///
/// Holds no shared state, so concurrent writers never contend on it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn draw(&self, upper: u32) -> u32 {
        rand::thread_rng().gen_range(1..=upper)
    }
}

/// A reproducible source seeded by the caller.
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    /// Creates a source seeded with `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn draw(&self, upper: u32) -> u32 {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.gen_range(1..=upper)
    }
}
