//! Retry policy
//!
//! Pure, stateless classification of failures plus exponential backoff.
//! The computed delay is a scheduling hint only: retried tasks re-enter the
//! queue tail immediately and the value is recorded as telemetry.

use crate::error::TransferError;
use std::time::Duration;

/// Retry policy with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Initial delay in milliseconds
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 100,
            max_delay_ms: 5000,
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// Backoff delay for a given retry count: `min(cap, base * 2^count)`
    pub fn delay_for_attempt(&self, retry_count: u32) -> Duration {
        let base = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(retry_count.min(16)));
        Duration::from_millis(base.min(self.max_delay_ms))
    }

    /// Decide whether a failed task gets another attempt.
    ///
    /// `retry_count` is the number of attempts already consumed; exceeding
    /// `max_retries` is a one-way transition to Failed.
    pub fn should_retry(&self, retry_count: u32, max_retries: u32, error: &TransferError) -> bool {
        retry_count < max_retries && error.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
        // 100 * 2^6 = 6400, capped
        assert_eq!(policy.delay_for_attempt(6), Duration::from_millis(5000));
        // Huge counts must not overflow
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_millis(5000));
    }

    #[test]
    fn retryable_error_within_budget() {
        let policy = RetryPolicy::default();
        let err = TransferError::timeout("connect");

        assert!(policy.should_retry(0, 3, &err));
        assert!(policy.should_retry(2, 3, &err));
        assert!(!policy.should_retry(3, 3, &err));
    }

    #[test]
    fn non_retryable_error_fails_immediately() {
        let policy = RetryPolicy::default();
        let err = TransferError::AuthFailed("530 login incorrect".into());

        assert!(!policy.should_retry(0, 3, &err));
    }
}
