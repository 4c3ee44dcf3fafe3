use serde::Serialize;

use crate::error::Result;
use crate::rate_limit::RateLimiter;

/// Point-in-time view of the send rate limit
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub current: u64,
    pub max: u64,
    /// Seconds until the counter resets, 0 without an active window
    pub reset_in: u64,
    pub percent_used: f64,
}

#[derive(Clone)]
pub struct StatsReporter {
    rate_limiter: RateLimiter,
}

impl StatsReporter {
    pub fn new(rate_limiter: RateLimiter) -> Self {
        Self { rate_limiter }
    }

    pub async fn snapshot(&self) -> Result<StatsSnapshot> {
        let stats = self.rate_limiter.stats().await?;

        Ok(StatsSnapshot {
            current: stats.current,
            max: stats.max,
            reset_in: stats.reset_in,
            percent_used: percent_used(stats.current, stats.max),
        })
    }
}

/// `current / max` as a percentage rounded to two decimals
pub fn percent_used(current: u64, max: u64) -> f64 {
    if max == 0 {
        return 0.0;
    }
    let percent = current as f64 / max as f64 * 100.0;
    (percent * 100.0).round() / 100.0
}

/// Human-readable duration, e.g. "4 minutes 10 seconds"
pub fn format_seconds(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{} seconds", seconds);
    }

    format!("{} minutes {} seconds", seconds / 60, seconds % 60)
}
