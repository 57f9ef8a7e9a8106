use crate::config::RetryPolicy;
use std::time::Duration;

/// Delay before re-queuing a block that has failed `failures` times.
///
/// Doubles from `base_delay` on each failure and is capped at `max_delay`.
pub fn retry_delay(policy: &RetryPolicy, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    policy
        .base_delay
        .saturating_mul(1u32 << exponent)
        .min(policy.max_delay)
}
