// src/internal/rng.rs

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

const WEYL_CONSTANT: u64 = 0x9E3779B97F4A7C15;

/// A fast, shareable, non-cryptographic pseudo-random number generator
/// using a Weyl sequence on an atomic integer.
///
/// Used where the runtime needs cheap unbiased-enough draws without pulling
/// a full RNG into the hot path: picking a winner among ready select
/// descriptors and rotating steal victims.
#[derive(Debug)]
pub(crate) struct FastRng {
  state: AtomicU64,
}

impl FastRng {
  pub fn new(seed: u64) -> Self {
    Self {
      state: AtomicU64::new(if seed == 0 { 1 } else { seed }),
    }
  }

  /// Seeds from the process-random `RandomState`, so two runs differ.
  pub fn from_entropy() -> Self {
    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u64(0);
    Self::new(hasher.finish())
  }

  /// Atomically advances the Weyl sequence and returns the new state.
  ///
  /// Relaxed is sufficient: only atomicity of the step matters, no other
  /// memory is synchronized through it.
  #[inline(always)]
  fn next_weyl(&self) -> u64 {
    self.state.fetch_add(WEYL_CONSTANT, Ordering::Relaxed)
  }

  /// A mixed 64-bit draw (splitmix-style finalizer over the Weyl state).
  #[inline(always)]
  pub fn next_u64(&self) -> u64 {
    let mut z = self.next_weyl();
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
  }

  /// A draw in `0..bound`. `bound` must be non-zero.
  #[inline(always)]
  pub fn gen_below(&self, bound: usize) -> usize {
    debug_assert!(bound > 0);
    (self.next_u64() % bound as u64) as usize
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn gen_below_stays_in_range() {
    let rng = FastRng::new(42);
    for _ in 0..1000 {
      assert!(rng.gen_below(7) < 7);
    }
  }

  #[test]
  fn draws_are_not_constant() {
    let rng = FastRng::from_entropy();
    let first = rng.next_u64();
    assert!((0..64).any(|_| rng.next_u64() != first));
  }
}
