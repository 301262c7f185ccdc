//! Backoff schedule for transient failures.

use crate::client::ClientConfig;
use rand::Rng;
use std::time::Duration;

/// Longest single wait between two attempts
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// How many times, and how patiently, a transient failure is retried
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub jitter: bool,
}

impl RetryPolicy {
    /// Policy from the retry settings of `config`
    pub fn from_config(config: &ClientConfig) -> Self {
        RetryPolicy {
            max_retries: config.retry_count,
            backoff_base: config.backoff_base,
            jitter: config.jitter,
        }
    }

    /// Total attempts a retryable request may make
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Wait before retry number `attempt` (0 for the first retry): `base * 2^attempt`,
    /// capped at [`MAX_BACKOFF`]. With jitter the wait is drawn from `[delay/2, delay]`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        let delay = self.backoff_base.saturating_mul(factor).min(MAX_BACKOFF);
        if self.jitter && !delay.is_zero() {
            delay.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
        } else {
            delay
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: bool) -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            jitter,
        }
    }

    #[test]
    fn test_exponential_delays() {
        let p = policy(false);
        assert_eq!(p.delay_for(0), Duration::from_secs(1));
        assert_eq!(p.delay_for(1), Duration::from_secs(2));
        assert_eq!(p.delay_for(2), Duration::from_secs(4));
        assert_eq!(p.delay_for(10), MAX_BACKOFF);
        assert_eq!(p.delay_for(u32::MAX), MAX_BACKOFF);
        assert_eq!(p.max_attempts(), 4);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let p = policy(true);
        for _ in 0..50 {
            let d = p.delay_for(2);
            assert!(d >= Duration::from_secs(2) && d <= Duration::from_secs(4), "{:?}", d);
        }
    }
}
