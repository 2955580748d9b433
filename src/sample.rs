//! Weighted distribution sampling.
//!
//! Statements, interfaces, and column types all declare how often they should
//! occur by drawing a weight from a configured range on *every* selection —
//! a `[a, b]` range contributes a time-varying weight, which is intentional.
//! The caller passes an expected-call multiplier so one selection can stand
//! for a whole batch of consecutive uses.

use crate::error::{FuzzerError, Result};
use crate::rng::RandomSource;

// ---------------------------------------------------------------------------
// Distributable
// ---------------------------------------------------------------------------

/// An element the sampler can pick, weighted by `occurrence_rate`.
pub trait Distributable {
    /// Draw this element's weight for one selection.
    fn occurrence_rate(&self, rng: &RandomSource) -> u64;
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Pick one element, weighted by freshly drawn occurrence rates scaled by
/// `expected_calls`. Returns the index of the chosen element.
///
/// Fails with a configuration error when every weight resolves to zero.
pub fn select<T: Distributable + ?Sized>(
    rng: &RandomSource,
    expected_calls: u64,
    items: &[&T],
) -> Result<usize> {
    if items.is_empty() {
        return Err(FuzzerError::new("distribution has no elements"));
    }
    let weights: Vec<u64> = items
        .iter()
        .map(|item| item.occurrence_rate(rng).saturating_mul(expected_calls))
        .collect();
    let total: u64 = weights
        .iter()
        .try_fold(0_u64, |acc, w| acc.checked_add(*w))
        .ok_or_else(|| FuzzerError::new("distribution weights overflow"))?;
    if total == 0 {
        return Err(FuzzerError::new(
            "distribution configuration resolves every weight to zero",
        ));
    }
    let mut pick = rng.u64_below(total);
    for (i, w) in weights.iter().enumerate() {
        if pick < *w {
            return Ok(i);
        }
        pick -= w;
    }
    unreachable!("pick < total implies a bucket matches")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
