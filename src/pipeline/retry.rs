use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::config::{BackoffKind, Config};

/// Upper bound for exponential delays
const MAX_BACKOFF: Duration = Duration::from_secs(300);
const BACKOFF_JITTER: f64 = 0.1;

/// Delay to wait after a failed attempt
pub trait BackoffStrategy: Send + Sync + fmt::Debug {
    /// `attempt` is the 1-based number of the attempt that just failed
    fn delay(&self, attempt: u32) -> Duration;

    /// Longest delay `delay` can return for `attempt`
    fn max_delay(&self, attempt: u32) -> Duration {
        self.delay(attempt)
    }
}

/// Same delay after every failure
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay(pub Duration);

impl BackoffStrategy for FixedDelay {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}

/// `base * 2^(attempt - 1)`, capped at `max`, randomized by ±`jitter`
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
    pub jitter: f64,
}

impl ExponentialBackoff {
    fn unjittered(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base.saturating_mul(1 << exponent).min(self.max)
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let delay = self.unjittered(attempt);

        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = 1.0 + rand::rng().random_range(-self.jitter..=self.jitter);
        delay.mul_f64(factor.max(0.0))
    }

    fn max_delay(&self, attempt: u32) -> Duration {
        self.unjittered(attempt).mul_f64(1.0 + self.jitter.max(0.0))
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Arc<dyn BackoffStrategy>,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Arc<dyn BackoffStrategy>) -> Self {
        Self {
            max_retries: max_retries.max(1),
            backoff,
        }
    }

    /// Fixed-delay policy
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self::new(max_retries, Arc::new(FixedDelay(delay)))
    }

    pub fn from_config(config: &Config) -> Self {
        let delay = Duration::from_secs(config.mail_retry_delay_seconds);
        let backoff: Arc<dyn BackoffStrategy> = match config.mail_retry_backoff {
            BackoffKind::Fixed => Arc::new(FixedDelay(delay)),
            BackoffKind::Exponential => Arc::new(ExponentialBackoff {
                base: delay,
                max: MAX_BACKOFF,
                jitter: BACKOFF_JITTER,
            }),
        };

        Self::new(config.mail_max_retries, backoff)
    }

    /// Total attempts per send, never below 1
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Longest a send can take when every attempt runs for `per_attempt`
    pub fn worst_case(&self, per_attempt: Duration) -> Duration {
        let delays: Duration = (1..self.max_retries)
            .map(|attempt| self.backoff.max_delay(attempt))
            .sum();
        per_attempt.saturating_mul(self.max_retries) + delays
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(3, Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fixed_delay() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.delay_after(1), Duration::from_secs(5));
        assert_eq!(policy.delay_after(2), Duration::from_secs(5));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_exponential_without_jitter() {
        let backoff = ExponentialBackoff {
            base: Duration::from_secs(2),
            max: Duration::from_secs(10),
            jitter: 0.0,
        };

        assert_eq!(backoff.delay(1), Duration::from_secs(2));
        assert_eq!(backoff.delay(2), Duration::from_secs(4));
        assert_eq!(backoff.delay(3), Duration::from_secs(8));
        assert_eq!(backoff.delay(4), Duration::from_secs(10));
        assert_eq!(backoff.delay(40), Duration::from_secs(10));
    }

    #[test]
    fn test_exponential_jitter_bounds() {
        let backoff = ExponentialBackoff {
            base: Duration::from_secs(10),
            max: Duration::from_secs(300),
            jitter: 0.1,
        };

        for _ in 0..50 {
            let delay = backoff.delay(1);
            assert!(delay >= Duration::from_secs(9));
            assert!(delay <= Duration::from_secs(11));
        }
    }

    #[test]
    fn test_at_least_one_attempt() {
        assert_eq!(RetryPolicy::fixed(0, Duration::ZERO).max_retries(), 1);
    }

    #[test]
    fn test_worst_case_fixed() {
        let policy = RetryPolicy::default();

        // three 60 s attempts and two 5 s delays
        assert_eq!(
            policy.worst_case(Duration::from_secs(60)),
            Duration::from_secs(190)
        );
    }

    #[test]
    fn test_worst_case_exponential_includes_jitter() {
        let policy = RetryPolicy::new(
            3,
            Arc::new(ExponentialBackoff {
                base: Duration::from_secs(10),
                max: Duration::from_secs(300),
                jitter: 0.1,
            }),
        );

        // 10 s + 20 s of delay, each stretched by 10%
        assert_eq!(
            policy.worst_case(Duration::from_secs(30)),
            Duration::from_secs(123)
        );
    }
}
