//! Internal random number generator implementation based on PCG32.
//!
//! Record identifiers and the fault decisions of the chaos bus need randomness but
//! not cryptographic strength, so a small PCG-XSH-RR generator covers them without
//! pulling in the `rand` crate.
//!
//! ```rust
//! use record_relay::rng::{Pcg32, Rng, SeedableRng};
//!
//! let mut rng = Pcg32::seed_from_u64(12345);
//! let roll = rng.gen_range_usize(0..20);
//! assert!(roll < 20);
//! ```

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

/// PCG32 random number generator.
///
/// 64 bits of state, 32-bit output, period 2^64. NOT cryptographically secure:
/// record identifiers generated from it are unique in practice, not unguessable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pcg32 {
    state: u64,
    inc: u64,
}

const PCG_DEFAULT_STREAM: u64 = 1442695040888963407;
const PCG_MULTIPLIER: u64 = 6364136223846793005;

impl Pcg32 {
    /// Creates a generator from an initial state and a stream selector.
    #[must_use]
    pub const fn new(state: u64, stream: u64) -> Self {
        let inc = (stream << 1) | 1;
        let mut pcg = Self { state: 0, inc };
        pcg.state = pcg.state.wrapping_mul(PCG_MULTIPLIER).wrapping_add(pcg.inc);
        pcg.state = pcg.state.wrapping_add(state);
        pcg.state = pcg.state.wrapping_mul(PCG_MULTIPLIER).wrapping_add(pcg.inc);
        pcg
    }

    #[inline]
    fn step(&mut self) -> u32 {
        let old_state = self.state;
        self.state = old_state
            .wrapping_mul(PCG_MULTIPLIER)
            .wrapping_add(self.inc);
        let xorshifted = (((old_state >> 18) ^ old_state) >> 27) as u32;
        let rot = (old_state >> 59) as u32;
        xorshifted.rotate_right(rot)
    }
}

/// Trait for seeding random number generators.
pub trait SeedableRng: Sized {
    /// Creates a new RNG seeded from a 64-bit value.
    #[must_use]
    fn seed_from_u64(seed: u64) -> Self;

    /// Creates a new RNG from process entropy. Two calls never share a seed.
    #[must_use]
    fn from_entropy() -> Self;
}

impl SeedableRng for Pcg32 {
    fn seed_from_u64(seed: u64) -> Self {
        Self::new(seed, PCG_DEFAULT_STREAM)
    }

    fn from_entropy() -> Self {
        Self::seed_from_u64(entropy_seed())
    }
}

/// Trait for random number generation.
pub trait Rng {
    /// Returns the next 32-bit random value.
    fn next_u32(&mut self) -> u32;

    /// Returns the next 64-bit random value.
    fn next_u64(&mut self) -> u64 {
        let high = u64::from(self.next_u32());
        let low = u64::from(self.next_u32());
        (high << 32) | low
    }

    /// Returns a uniformly distributed value in `[0.0, 1.0)`.
    fn gen_f64(&mut self) -> f64 {
        // 53 random mantissa bits
        (self.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Returns `true` with the given probability. Probabilities outside `[0, 1]` are clamped.
    fn gen_bool(&mut self, probability: f64) -> bool {
        if probability <= 0.0 {
            false
        } else if probability >= 1.0 {
            true
        } else {
            self.gen_f64() < probability
        }
    }

    /// Returns a value in `[range.start, range.end)`, or `range.start` for an empty range.
    fn gen_range_usize(&mut self, range: std::ops::Range<usize>) -> usize {
        let span = range.end.saturating_sub(range.start) as u64;
        if span == 0 {
            return range.start;
        }
        // rejection sampling keeps the distribution unbiased
        let threshold = span.wrapping_neg() % span;
        loop {
            let value = self.next_u64();
            if value >= threshold {
                return range.start + (value % span) as usize;
            }
        }
    }

    /// Returns a value in `[start, end]`, or `start` when `start > end`.
    fn gen_range_i64_inclusive(&mut self, range: std::ops::RangeInclusive<i64>) -> i64 {
        let (start, end) = (*range.start(), *range.end());
        if start > end {
            return start;
        }
        let span = (i128::from(end) - i128::from(start) + 1) as u64;
        if span == 0 {
            return self.next_u64() as i64;
        }
        let threshold = span.wrapping_neg() % span;
        loop {
            let value = self.next_u64();
            if value >= threshold {
                return start.wrapping_add((value % span) as i64);
            }
        }
    }
}

impl Rng for Pcg32 {
    #[inline]
    fn next_u32(&mut self) -> u32 {
        self.step()
    }
}

/// Mixes the std hasher's per-process random keys, the wall clock and a counter.
fn entropy_seed() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u64(COUNTER.fetch_add(1, Ordering::Relaxed));
    hasher.write_u128(
        web_time::SystemTime::now()
            .duration_since(web_time::SystemTime::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or(0),
    );
    hasher.finish()
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_sequence() {
        let mut a = Pcg32::seed_from_u64(99);
        let mut b = Pcg32::seed_from_u64(99);
        for _ in 0..100 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
    }

    #[test]
    fn entropy_seeds_differ() {
        let mut a = Pcg32::from_entropy();
        let mut b = Pcg32::from_entropy();
        assert_ne!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn gen_f64_stays_in_unit_interval() {
        let mut rng = Pcg32::seed_from_u64(3);
        for _ in 0..10_000 {
            let v = rng.gen_f64();
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn gen_bool_extremes_are_exact() {
        let mut rng = Pcg32::seed_from_u64(5);
        for _ in 0..1_000 {
            assert!(!rng.gen_bool(0.0));
            assert!(rng.gen_bool(1.0));
            assert!(!rng.gen_bool(-3.0));
        }
    }

    #[test]
    fn gen_range_usize_respects_bounds_and_empty_range() {
        let mut rng = Pcg32::seed_from_u64(8);
        for _ in 0..1_000 {
            let v = rng.gen_range_usize(3..9);
            assert!((3..9).contains(&v));
        }
        assert_eq!(rng.gen_range_usize(4..4), 4);
    }

    #[test]
    fn gen_range_i64_inclusive_covers_negative_spans() {
        let mut rng = Pcg32::seed_from_u64(13);
        let mut seen_negative = false;
        for _ in 0..1_000 {
            let v = rng.gen_range_i64_inclusive(-5..=5);
            assert!((-5..=5).contains(&v));
            seen_negative |= v < 0;
        }
        assert!(seen_negative);
        assert_eq!(rng.gen_range_i64_inclusive(10..=2), 10);
    }
}
