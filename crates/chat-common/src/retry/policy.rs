//! Exponential backoff policy for transient failures
//!
//! Delays double per attempt up to a cap. Attempt counting is 0-based: the
//! first retry waits for the base delay.

use std::time::Duration;

/// Backoff strategy for retrying transient failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Cap applied to later retries
    pub max_delay: Duration,
    /// Retry budget; None retries forever
    pub max_attempts: Option<u32>,
    /// Jitter ratio (0.0..=1.0) applied symmetrically to each delay
    pub jitter_ratio: f64,
}

impl RetryPolicy {
    /// Policy for gateway socket connects: 0.5s doubling to a 10s cap,
    /// retrying until told to stop
    #[must_use]
    pub fn gateway_default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            max_attempts: None,
            jitter_ratio: 0.0,
        }
    }

    /// Policy for transient HTTP transport failures
    #[must_use]
    pub fn http_default() -> Self {
        Self {
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            max_attempts: Some(3),
            jitter_ratio: 0.2,
        }
    }

    /// Whether another retry is allowed after `attempt` failures
    #[must_use]
    pub fn allows_attempt(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }

    /// Backoff delay for the given 0-based attempt, jitter applied
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.min(31);
        let delay = self
            .base_delay
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        self.with_jitter(delay)
    }

    /// Apply the policy's jitter to a delay using a symmetric random range
    #[must_use]
    pub fn with_jitter(&self, delay: Duration) -> Duration {
        if self.jitter_ratio <= 0.0 {
            return delay;
        }
        let ratio = self.jitter_ratio.clamp(0.0, 1.0);
        let millis = delay.as_millis() as f64;
        let spread = millis * ratio;
        let low = (millis - spread).max(0.0);
        let high = millis + spread;
        let sampled = if high <= low {
            low
        } else {
            rand::random::<f64>() * (high - low) + low
        };
        Duration::from_millis(sampled.round() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            max_attempts: None,
            jitter_ratio: 0.0,
        };
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(500));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(4), Duration::from_secs(8));
        assert_eq!(policy.backoff_delay(5), Duration::from_secs(10));
        assert_eq!(policy.backoff_delay(60), Duration::from_secs(10));
    }

    #[test]
    fn test_gateway_default_is_unbounded() {
        let policy = RetryPolicy::gateway_default();
        assert!(policy.allows_attempt(0));
        assert!(policy.allows_attempt(1_000_000));
    }

    #[test]
    fn test_http_default_is_bounded() {
        let policy = RetryPolicy::http_default();
        assert!(policy.allows_attempt(0));
        assert!(policy.allows_attempt(2));
        assert!(!policy.allows_attempt(3));
    }

    #[test]
    fn test_jitter_stays_within_spread() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(10),
            max_attempts: None,
            jitter_ratio: 0.5,
        };
        for _ in 0..100 {
            let delay = policy.backoff_delay(0);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(1500));
        }
    }
}
