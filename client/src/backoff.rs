//! Exponential backoff with bounded jitter.
//!
//! The nominal delay after the k-th consecutive failure is
//! `base * 2^(k-1)`, capped at `max`. The actual wait adds a random extra of
//! up to `jitter * nominal` and is capped again, so successive waits never
//! decrease as long as `jitter <= 1`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Fraction of the nominal delay added at random, clamped to 0.0..=1.0
    pub jitter: f64,
}

/// Consecutive-failure counter that produces retry delays.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    failures: u32,
    rng: StdRng,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self::with_rng(policy, StdRng::from_entropy())
    }

    /// Deterministic jitter for tests.
    pub fn with_seed(policy: BackoffPolicy, seed: u64) -> Self {
        Self::with_rng(policy, StdRng::seed_from_u64(seed))
    }

    fn with_rng(policy: BackoffPolicy, rng: StdRng) -> Self {
        let jitter = if policy.jitter.is_finite() {
            policy.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            policy: BackoffPolicy { jitter, ..policy },
            failures: 0,
            rng,
        }
    }

    /// Record a failure and return how long to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let nominal = self.nominal().unwrap_or(self.policy.base);

        let spread = (nominal.as_millis() as f64 * self.policy.jitter) as u64;
        let extra = if spread == 0 {
            0
        } else {
            self.rng.gen_range(0..=spread)
        };

        (nominal + Duration::from_millis(extra)).min(self.policy.max)
    }

    /// Nominal delay for the current failure streak, if any.
    pub fn nominal(&self) -> Option<Duration> {
        if self.failures == 0 {
            return None;
        }
        // 2^31 * base overflows long before it matters; the cap wins anyway
        let shift = (self.failures - 1).min(31);
        let nominal = self
            .policy
            .base
            .checked_mul(1u32 << shift)
            .unwrap_or(self.policy.max);
        Some(nominal.min(self.policy.max))
    }

    /// Back to the base delay.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
