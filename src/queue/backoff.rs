//! Exponential backoff with bounded jitter for task retries.

use rand::Rng;
use std::time::Duration;

use crate::models::RetryPolicy;

/// Delay before the next delivery of a task that has failed `attempt` times.
///
/// Doubles from `base_delay_ms` per completed attempt, clamped to
/// `max_delay_ms`, then shortened by up to `jitter_fraction` to spread
/// synchronized retries apart. `attempt` is 1-based: the delay before the
/// second delivery is computed with `attempt = 1`.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let raw_ms = policy
        .base_delay_ms
        .saturating_mul(1u64 << exponent)
        .min(policy.max_delay_ms);

    let jitter = policy.jitter_fraction.clamp(0.0, 1.0);
    let jittered_ms = if jitter > 0.0 {
        let scale = 1.0 - rand::thread_rng().gen_range(0.0..jitter);
        (raw_ms as f64 * scale).round() as u64
    } else {
        raw_ms
    };

    Duration::from_millis(jittered_ms)
}
