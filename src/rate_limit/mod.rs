//! Global hourly send-rate ceiling.
//!
//! A single counter under a fixed key tracks how many messages went out recently.
//! Every counted send rewrites the counter with a full window as its expiry, so
//! the counter lapses one window after the last send.
//!
//! Admission and increment are separate store round-trips: concurrent senders
//! can all pass `admit` before any of them increments, so the ceiling is a
//! best-effort cap rather than a hard one.

pub mod memory;

pub use memory::MemoryCounterStore;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::{Config, RateLimitStoreKind};
use crate::error::Result;
use crate::redis::{create_pool, RedisCounterStore};

/// Key under which the shared send counter is stored
pub const RATE_LIMIT_KEY: &str = "email_rate_limit";

/// Key-value store holding expiring counters
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current value, `None` when absent or expired
    async fn get(&self, key: &str) -> Result<Option<u64>>;

    /// Store `value`, replacing any previous value and expiry
    async fn set(&self, key: &str, value: u64, ttl: Duration) -> Result<()>;

    /// Remaining time-to-live, `None` when absent or expired
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// Whether the backing store is reachable
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Rate limit state as reported to operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitStats {
    pub current: u64,
    pub max: u64,
    pub reset_in: u64,
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    key: String,
    max: u64,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, max: u64, window: Duration) -> Self {
        Self {
            store,
            key: RATE_LIMIT_KEY.to_string(),
            max,
            window,
        }
    }

    /// Create the limiter and its store from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let store: Arc<dyn CounterStore> = match config.rate_limit_store {
            RateLimitStoreKind::Redis => Arc::new(RedisCounterStore::new(create_pool(config)?)),
            RateLimitStoreKind::Memory => Arc::new(MemoryCounterStore::new()),
        };

        Ok(Self::new(
            store,
            config.rate_limit_max,
            Duration::from_secs(config.rate_limit_window_seconds),
        ))
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub async fn current_count(&self) -> Result<u64> {
        Ok(self.store.get(&self.key).await?.unwrap_or(0))
    }

    /// Whether one more send fits in the current window. Does not reserve it.
    pub async fn admit(&self) -> Result<bool> {
        Ok(self.current_count().await? < self.max)
    }

    /// Count one send and restart the window
    pub async fn increment(&self) -> Result<u64> {
        let count = self.current_count().await? + 1;
        self.store.set(&self.key, count, self.window).await?;

        tracing::debug!(key = %self.key, count, max = self.max, "Rate limit counter incremented");
        Ok(count)
    }

    pub async fn reset(&self) -> Result<()> {
        self.store.remove(&self.key).await?;
        tracing::info!(key = %self.key, "Rate limit counter reset");
        Ok(())
    }

    pub async fn stats(&self) -> Result<RateLimitStats> {
        let current = self.store.get(&self.key).await?;
        let reset_in = match current {
            Some(_) => self
                .store
                .ttl(&self.key)
                .await?
                .map(|ttl| ttl.as_secs())
                .unwrap_or(0),
            None => 0,
        };

        Ok(RateLimitStats {
            current: current.unwrap_or(0),
            max: self.max,
            reset_in,
        })
    }

    pub async fn health_check(&self) -> Result<bool> {
        self.store.health_check().await
    }
}
