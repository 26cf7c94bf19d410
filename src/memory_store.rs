//! In-process store backed by Moka
//!
//! Behaves like the Redis store for a single process: per-entry TTL,
//! namespace-wide deletion and an atomic counter. Useful for tests and for
//! deployments where the cache is not shared between processes.

use async_trait::async_trait;
use moka::Expiry;
use moka::future::Cache;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{CacheError, CacheStore};

const DEFAULT_MAX_CAPACITY: u64 = 100_000;

type EntryKey = (String, String);

#[derive(Clone)]
struct Entry {
    value: String,
    ttl: Option<Duration>,
}

/// Each write restarts the entry's own TTL.
struct EntryExpiry;

impl Expiry<EntryKey, Entry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &EntryKey,
        entry: &Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        entry.ttl
    }

    fn expire_after_update(
        &self,
        _key: &EntryKey,
        entry: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        entry.ttl
    }
}

/// Store client keeping entries in local memory.
#[derive(Clone)]
pub struct MemoryStore {
    entries: Cache<EntryKey, Entry>,
    counters: Arc<Mutex<HashMap<String, i64>>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_CAPACITY)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding at most `max_capacity` entries.
    pub fn with_capacity(max_capacity: u64) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryExpiry)
            .build();

        Self {
            entries,
            counters: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn entry_key(namespace: &str, key: &str) -> EntryKey {
        (namespace.to_owned(), key.to_owned())
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self
            .entries
            .get(&Self::entry_key(namespace, key))
            .await
            .map(|entry| entry.value))
    }

    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.entries
            .insert(Self::entry_key(namespace, key), Entry { value, ttl })
            .await;
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<(), CacheError> {
        self.entries
            .invalidate(&Self::entry_key(namespace, key))
            .await;
        Ok(())
    }

    async fn delete_all(&self, namespace: &str) -> Result<(), CacheError> {
        let keys: Vec<Arc<EntryKey>> = self
            .entries
            .iter()
            .filter(|(key, _)| key.0 == namespace)
            .map(|(key, _)| key)
            .collect();

        debug!(
            "Deleting {} in-memory entries in namespace {}",
            keys.len(),
            namespace
        );
        for key in keys {
            self.entries.invalidate(key.as_ref()).await;
        }
        Ok(())
    }

    async fn exists(&self, namespace: &str, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.contains_key(&Self::entry_key(namespace, key)))
    }

    async fn next_counter(&self, counter_key: &str) -> Result<i64, CacheError> {
        let mut counters = self.counters.lock().await;
        let counter = counters.entry(counter_key.to_owned()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();
        store
            .set("orders", "1", "\"a\"".to_owned(), None)
            .await
            .unwrap();

        assert_eq!(
            store.get("orders", "1").await.unwrap().as_deref(),
            Some("\"a\"")
        );
        assert!(store.exists("orders", "1").await.unwrap());
        assert!(store.get("customers", "1").await.unwrap().is_none());

        store.delete("orders", "1").await.unwrap();
        assert!(store.get("orders", "1").await.unwrap().is_none());
        assert!(!store.exists("orders", "1").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_all_is_scoped_to_namespace() {
        let store = MemoryStore::new();
        for key in ["1", "2", "3"] {
            store
                .set("orders", key, "1".to_owned(), None)
                .await
                .unwrap();
        }
        store
            .set("customers", "1", "1".to_owned(), None)
            .await
            .unwrap();

        store.delete_all("orders").await.unwrap();

        for key in ["1", "2", "3"] {
            assert!(store.get("orders", key).await.unwrap().is_none());
        }
        assert!(store.get("customers", "1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let store = MemoryStore::new();
        store
            .set(
                "orders",
                "1",
                "1".to_owned(),
                Some(Duration::from_millis(50)),
            )
            .await
            .unwrap();
        assert!(store.get("orders", "1").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(store.get("orders", "1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_counters_are_independent() {
        let store = MemoryStore::new();
        assert_eq!(store.next_counter("a").await.unwrap(), 1);
        assert_eq!(store.next_counter("a").await.unwrap(), 2);
        assert_eq!(store.next_counter("b").await.unwrap(), 1);
    }
}
