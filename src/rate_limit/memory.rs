use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::CounterStore;
use crate::error::Result;

#[derive(Debug, Clone, Copy)]
struct Entry {
    value: u64,
    expires_at: Instant,
}

/// In-process counter store. Only suitable when a single process sends mail.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    entries: DashMap<String, Entry>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_entry(&self, key: &str) -> Option<Entry> {
        let now = Instant::now();
        let entry = self.entries.get(key).map(|e| *e.value())?;
        if entry.expires_at > now {
            return Some(entry);
        }

        self.entries.remove_if(key, |_, e| e.expires_at <= now);
        None
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<u64>> {
        Ok(self.live_entry(key).map(|e| e.value))
    }

    async fn set(&self, key: &str, value: u64, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        Ok(self
            .live_entry(key)
            .map(|e| e.expires_at.saturating_duration_since(Instant::now())))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time;

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires() {
        let store = MemoryCounterStore::new();
        store.set("k", 7, Duration::from_secs(10)).await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), Some(7));
        assert_eq!(store.ttl("k").await.unwrap(), Some(Duration::from_secs(10)));

        time::advance(Duration::from_secs(10)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.ttl("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_replaces_expiry() {
        let store = MemoryCounterStore::new();
        store.set("k", 1, Duration::from_secs(5)).await.unwrap();
        time::advance(Duration::from_secs(4)).await;

        store.set("k", 2, Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), Some(2));
        assert_eq!(store.ttl("k").await.unwrap(), Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_remove() {
        let store = MemoryCounterStore::new();
        store.set("k", 3, Duration::from_secs(60)).await.unwrap();

        tokio_test::assert_ok!(store.remove("k").await);
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
