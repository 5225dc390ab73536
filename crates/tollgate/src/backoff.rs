//! Jittered exponential backoff for conditional-write retries.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with randomization, in the style of
/// exponential-random interval functions: attempt `n` sleeps
/// `initial * 2^(n-1)`, scaled by a uniform factor in
/// `[1 - randomization, 1 + randomization]` and capped at `max`.
///
/// Jitter keeps a herd of clients that all lost the same version race from
/// colliding again on the next attempt.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    initial: Duration,
    max: Duration,
    randomization: f64,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            randomization: 0.5,
        }
    }

    /// Delay before retry attempt `attempt` (1-indexed: the first retry
    /// passes 1).
    pub(crate) fn delay(&self, attempt: usize) -> Duration {
        let exp = attempt.saturating_sub(1).min(16) as u32;
        let base = self
            .initial
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max);
        let factor = 1.0 - self.randomization
            + rand::rng().random_range(0.0..=(2.0 * self.randomization));
        base.mul_f64(factor).min(self.max)
    }
}
