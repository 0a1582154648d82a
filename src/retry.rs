//! Retry policy for batch delivery.
//!
//! Retry behavior is an explicit value rather than ad-hoc timer callbacks:
//! the policy decides how many attempts an item gets and how long to wait
//! between them, while the collector executes the waits on the tokio timer.
//! Under a paused test runtime the timer is virtual, so retry timing is
//! deterministically testable without wall-clock waits.

use std::time::Duration;

/// Delivery retry policy: bounded attempts with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt
    pub max_retries: u32,

    /// Delay before the first retry; doubles per subsequent retry
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Delay before the retry following the given failed attempt count:
    /// `base_delay * 2^attempt`. The exponent is clamped so pathological
    /// retry counts cannot overflow.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.min(16))
    }

    /// Whether an item with this many failed attempts should be dropped.
    pub fn exhausted(&self, retry_count: u32) -> bool {
        retry_count > self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn test_exhaustion_boundary() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        assert!(!policy.exhausted(3));
        assert!(policy.exhausted(4));
    }

    #[test]
    fn test_delay_exponent_is_clamped() {
        let policy = RetryPolicy::new(u32::MAX, Duration::from_millis(1));
        // Must not panic on absurd attempt counts.
        let _ = policy.delay_for(u32::MAX);
    }
}
