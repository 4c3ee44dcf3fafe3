use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::AsyncCommands;

use crate::error::{AppError, Result};
use crate::rate_limit::CounterStore;

/// Counter store shared by every process pointed at the same Redis
#[derive(Clone)]
pub struct RedisCounterStore {
    pool: Pool,
}

impl RedisCounterStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get(&self, key: &str) -> Result<Option<u64>> {
        let mut conn = self.pool.get().await?;

        let value: Option<u64> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: u64, ttl: Duration) -> Result<()> {
        let mut conn = self.pool.get().await?;

        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<()>(&mut *conn)
            .await?;

        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.pool.get().await?;

        // -2: no such key, -1: key without expiry
        let ttl: i64 = conn.ttl(key).await?;
        Ok(u64::try_from(ttl).ok().map(Duration::from_secs))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut conn = self.pool.get().await?;

        conn.del::<_, ()>(key).await?;
        tracing::debug!(key = %key, "Counter removed");
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        let mut conn = self.pool.get().await?;

        let pong: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| AppError::RedisError(e.to_string()))?;

        Ok(pong == "PONG")
    }
}
