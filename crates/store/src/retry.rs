//! Bounded exponential backoff policy.

use std::time::Duration;

/// Retry schedule for lock acquisition and objective retransmission:
/// attempt `i` waits `initial_delay * multiple^i`, for
/// `number_of_attempts` attempts total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts before giving up.
    pub number_of_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Backoff factor applied per attempt.
    pub multiple: u32,
}

impl RetryPolicy {
    /// Delay to wait after attempt `attempt` (zero-based) fails.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.initial_delay
            .saturating_mul(self.multiple.saturating_pow(attempt))
    }

    /// Total time the policy is willing to wait.
    pub fn total_delay(&self) -> Duration {
        (0..self.number_of_attempts)
            .map(|i| self.delay_for_attempt(i))
            .sum()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            number_of_attempts: 10,
            initial_delay: Duration::from_millis(50),
            multiple: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_schedule() {
        let policy = RetryPolicy {
            number_of_attempts: 4,
            initial_delay: Duration::from_millis(10),
            multiple: 2,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(10));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(20));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(80));
        assert_eq!(policy.total_delay(), Duration::from_millis(150));
    }

    #[test]
    fn test_flat_schedule() {
        let policy = RetryPolicy {
            number_of_attempts: 3,
            initial_delay: Duration::from_millis(50),
            multiple: 1,
        };
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(50));
        assert_eq!(policy.total_delay(), Duration::from_millis(150));
    }
}
