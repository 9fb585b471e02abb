//! Linear backoff retry policy.

use std::time::Duration;

/// Configuration for the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the first try).
    pub max_retries: u32,
    /// Delay added per attempt: the n-th retry waits `n * backoff_step`.
    pub backoff_step: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_step: Duration::from_secs(1),
        }
    }
}

/// Stateless retry policy. Computes the next delay from the attempt number.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the delay before the `attempt`-th retry (1-based).
    /// Returns `None` if `attempt` exceeds `max_retries`.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.config.max_retries {
            return None;
        }
        Some(self.config.backoff_step * attempt)
    }

    /// Total number of requests sent before giving up.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_retries + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_linearly() {
        let policy = RetryPolicy::new(RetryConfig::default());
        assert_eq!(policy.next_delay(1), Some(Duration::from_secs(1)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_secs(2)));
        assert_eq!(policy.next_delay(3), Some(Duration::from_secs(3)));
        assert_eq!(policy.next_delay(4), None);
        assert_eq!(policy.max_attempts(), 4);
    }

    #[test]
    fn zero_retries_never_waits() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: 0,
            ..Default::default()
        });
        assert_eq!(policy.next_delay(1), None);
        assert_eq!(policy.max_attempts(), 1);
    }
}
