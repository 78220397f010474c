//! Exponential backoff policy for failed deliveries.
//!
//! Retry delays double with each attempt from a configurable base and
//! are capped, with optional jitter to spread retry bursts across
//! endpoints.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry timing policy for the delivery queue.
///
/// The delay before attempt `n + 1` is `base * 2^(n-1)`, capped at
/// `max_delay`. The base comes from the webhook's configuration (copied
/// onto each delivery); `base_delay` here is the fallback when a
/// delivery carries no base of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Fallback base delay for exponential backoff.
    pub base_delay: Duration,

    /// Maximum delay between retry attempts.
    pub max_delay: Duration,

    /// Jitter percentage (0.0 to 1.0) to add randomness.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, given the attempt that just failed
    /// (1-based) and the delivery's own backoff base.
    ///
    /// A zero base falls back to the policy's `base_delay`.
    pub fn delay_from_base(&self, base: Duration, failed_attempt: u32) -> Duration {
        let base = if base.is_zero() { self.base_delay } else { base };

        let exponent = failed_attempt.saturating_sub(1).min(16);
        let multiplier = 2_u32.saturating_pow(exponent);
        let capped = std::cmp::min(base.saturating_mul(multiplier), self.max_delay);

        std::cmp::min(apply_jitter(capped, self.jitter_factor), self.max_delay)
    }

    /// Delay before the next attempt using the policy's own base.
    pub fn delay_for_attempt(&self, failed_attempt: u32) -> Duration {
        self.delay_from_base(self.base_delay, failed_attempt)
    }
}

/// Applies jitter to a duration to prevent thundering herd effects.
///
/// Randomizes the delay by ±`jitter_factor`. With a factor of 0.1, a 10s
/// delay becomes 9s to 11s.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }

    let clamped_jitter = jitter_factor.clamp(0.0, 1.0);

    let mut rng = rand::rng();
    let jitter_range = duration.as_secs_f64() * clamped_jitter;
    let jitter_offset = rng.random_range(-jitter_range..=jitter_range);
    let jittered_secs = duration.as_secs_f64() + jitter_offset;

    Duration::from_secs_f64(jittered_secs.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_without_jitter() -> RetryPolicy {
        RetryPolicy { jitter_factor: 0.0, ..Default::default() }
    }

    #[test]
    fn exponential_backoff_doubles_per_attempt() {
        let policy = policy_without_jitter();

        let delays: Vec<_> = (1..=5).map(|n| policy.delay_for_attempt(n)).collect();

        assert_eq!(delays[0], Duration::from_secs(1));
        assert_eq!(delays[1], Duration::from_secs(2));
        assert_eq!(delays[2], Duration::from_secs(4));
        assert_eq!(delays[3], Duration::from_secs(8));
        assert_eq!(delays[4], Duration::from_secs(16));
    }

    #[test]
    fn delay_capped_at_max() {
        let policy = policy_without_jitter();

        // 2^19 seconds is far past the cap
        assert_eq!(policy.delay_for_attempt(20), Duration::from_secs(60));
    }

    #[test]
    fn delivery_base_overrides_policy_base() {
        let policy = policy_without_jitter();

        let delay = policy.delay_from_base(Duration::from_millis(250), 3);
        assert_eq!(delay, Duration::from_secs(1));
    }

    #[test]
    fn zero_base_falls_back_to_policy_base() {
        let policy = policy_without_jitter();

        assert_eq!(policy.delay_from_base(Duration::ZERO, 1), Duration::from_secs(1));
    }

    #[test]
    fn jitter_varies_delay_within_bounds() {
        let base = Duration::from_secs(10);
        let mut seen = std::collections::HashSet::new();

        for _ in 0..20 {
            let jittered = apply_jitter(base, 0.5);
            assert!(jittered >= Duration::from_secs(5), "delay too small: {jittered:?}");
            assert!(jittered <= Duration::from_secs(15), "delay too large: {jittered:?}");
            seen.insert(jittered.as_millis());
        }

        assert!(seen.len() > 1, "jitter should create variation");
    }

    #[test]
    fn huge_attempt_numbers_do_not_overflow() {
        let policy = policy_without_jitter();

        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(60));
    }
}
