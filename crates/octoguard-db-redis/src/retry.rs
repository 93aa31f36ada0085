//! Capped exponential backoff for transient Redis failures.

use std::time::Duration;

/// Hard ceiling on a single backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Default number of attempts before an operation gives up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default delay before the first retry.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Retry schedule: `base`, `2*base`, `4*base`, ... capped at `max_delay`,
/// for at most `max_attempts` attempts in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// Creates a policy with the standard 2s ceiling. At least one attempt is always made.
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_delay: MAX_BACKOFF,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Delay to wait before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max_delay)
    }

    /// Sum of every delay the policy can incur before giving up.
    pub fn worst_case_wait(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|retry| self.delay_for(retry))
            .sum()
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_BASE, DEFAULT_MAX_ATTEMPTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), 5);
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = BackoffPolicy::new(Duration::from_millis(500), 10);
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(9), MAX_BACKOFF);
        assert_eq!(policy.delay_for(64), MAX_BACKOFF);
    }

    #[test]
    fn test_at_least_one_attempt() {
        let policy = BackoffPolicy::new(Duration::from_millis(10), 0);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.worst_case_wait(), Duration::ZERO);
    }

    #[test]
    fn test_worst_case_wait() {
        let policy = BackoffPolicy::default();
        // 100 + 200 + 400 + 800
        assert_eq!(policy.worst_case_wait(), Duration::from_millis(1500));
    }
}
