//! Cache regions
//!
//! A region is a named namespace in the shared store with its own expiry.
//! Two shapes exist:
//! - [`TransactionalRegion`]: entity, collection and natural-id data, where
//!   removal doubles as the soft-lock primitive of the access strategies
//! - [`GeneralRegion`]: query results and update timestamps
//!
//! Every store failure is swallowed here. Reads degrade to a miss, writes and
//! evictions to a logged no-op, so cache trouble never fails the caller's
//! database transaction.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::store::encode_key;
use crate::{CacheError, CacheKey, CacheStore, Cacheable, KeyNamespace};

/// Kind of data a region holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionKind {
    Entity,
    Collection,
    NaturalId,
    QueryResults,
    Timestamps,
}

impl RegionKind {
    /// Whether the region backs an access strategy.
    pub fn is_transactional(self) -> bool {
        matches!(
            self,
            RegionKind::Entity | RegionKind::Collection | RegionKind::NaturalId
        )
    }
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegionKind::Entity => "entity",
            RegionKind::Collection => "collection",
            RegionKind::NaturalId => "natural-id",
            RegionKind::QueryResults => "query-results",
            RegionKind::Timestamps => "timestamps",
        };
        f.write_str(name)
    }
}

struct RegionCore {
    name: String,
    kind: RegionKind,
    expiry_in_seconds: u64,
    store: Arc<dyn CacheStore>,
    namespace: Arc<dyn KeyNamespace>,
}

impl RegionCore {
    fn ttl(&self) -> Option<Duration> {
        (self.expiry_in_seconds > 0).then(|| Duration::from_secs(self.expiry_in_seconds))
    }

    fn encode<K: CacheKey>(&self, key: &K) -> Option<String> {
        match encode_key(key) {
            Ok(encoded) => Some(encoded),
            Err(e) => {
                warn!(
                    "Fail to encode cache key {:?} for region {}: {}",
                    key, self.name, e
                );
                None
            }
        }
    }

    async fn get<K: CacheKey, V: Cacheable>(&self, key: &K) -> Option<V> {
        let encoded = self.encode(key)?;
        let namespace = self.namespace.resolve(&self.name);

        let cached = match self.store.get(&namespace, &encoded).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!(
                    "Fail to get cache item from region {} for key {:?} ({}). Treating as miss.",
                    self.name, key, e
                );
                return None;
            }
        };

        let Some(json) = cached else {
            trace!("Cache miss in region {} for key {:?}", self.name, key);
            return None;
        };

        match serde_json::from_str::<V>(&json) {
            Ok(value) => {
                trace!("Cache hit in region {} for key {:?}", self.name, key);
                Some(value)
            }
            Err(e) => {
                warn!(
                    "Failed to deserialize cached value in region {} for key {:?}: {}. Deleting corrupt entry.",
                    self.name, key, e
                );
                if let Err(del_err) = self.store.delete(&namespace, &encoded).await {
                    warn!(
                        "Failed to delete corrupt entry in region {} for key {:?}: {}",
                        self.name, key, del_err
                    );
                }
                None
            }
        }
    }

    async fn contains<K: CacheKey>(&self, key: &K) -> bool {
        let Some(encoded) = self.encode(key) else {
            return false;
        };
        let namespace = self.namespace.resolve(&self.name);
        match self.store.exists(&namespace, &encoded).await {
            Ok(found) => found,
            Err(e) => {
                warn!(
                    "Fail to check cache item in region {} for key {:?} ({}). Treating as absent.",
                    self.name, key, e
                );
                false
            }
        }
    }

    async fn put<K: CacheKey, V: Cacheable>(&self, key: &K, value: &V) {
        let Some(encoded) = self.encode(key) else {
            return;
        };
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                warn!(
                    "Fail to serialize cache item for region {} key {:?}: {}. Skipping put.",
                    self.name, key, e
                );
                return;
            }
        };

        let namespace = self.namespace.resolve(&self.name);
        match self.store.set(&namespace, &encoded, json, self.ttl()).await {
            Ok(()) => trace!("Put cache item in region {} for key {:?}", self.name, key),
            Err(e) => warn!(
                "Fail to put cache item in region {} for key {:?}: {}. Continuing.",
                self.name, key, e
            ),
        }
    }

    async fn remove<K: CacheKey>(&self, key: &K) {
        let Some(encoded) = self.encode(key) else {
            return;
        };
        let namespace = self.namespace.resolve(&self.name);
        match self.store.delete(&namespace, &encoded).await {
            Ok(()) => trace!("Removed cache item in region {} for key {:?}", self.name, key),
            Err(e) => warn!(
                "Fail to remove cache item in region {} for key {:?}: {}. Continuing.",
                self.name, key, e
            ),
        }
    }

    async fn clear(&self) {
        let namespace = self.namespace.resolve(&self.name);
        match self.store.delete_all(&namespace).await {
            Ok(()) => debug!("Cleared region {} (namespace {})", self.name, namespace),
            Err(e) => warn!(
                "Fail to remove cache items in region {}: {}. Continuing.",
                self.name, e
            ),
        }
    }
}

fn build_core(
    name: String,
    kind: RegionKind,
    transactional: bool,
    expiry_in_seconds: u64,
    store: Arc<dyn CacheStore>,
    namespace: Arc<dyn KeyNamespace>,
) -> Result<Arc<RegionCore>, CacheError> {
    if kind.is_transactional() != transactional {
        return Err(CacheError::InvalidConfiguration(format!(
            "region {name} of kind {kind} cannot be built as a {} region",
            if transactional { "transactional" } else { "general" }
        )));
    }
    debug!(
        "Building {} region {} (expiry {}s)",
        kind, name, expiry_in_seconds
    );
    Ok(Arc::new(RegionCore {
        name,
        kind,
        expiry_in_seconds,
        store,
        namespace,
    }))
}

/// Region holding entity, collection or natural-id data.
pub struct TransactionalRegion<K, V> {
    core: Arc<RegionCore>,
    _marker: PhantomData<fn(K) -> V>,
}

impl<K, V> Clone for TransactionalRegion<K, V> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            _marker: PhantomData,
        }
    }
}

impl<K: CacheKey, V: Cacheable> TransactionalRegion<K, V> {
    /// Create a region of kind entity, collection or natural-id.
    pub fn new(
        name: impl Into<String>,
        kind: RegionKind,
        expiry_in_seconds: u64,
        store: Arc<dyn CacheStore>,
        namespace: Arc<dyn KeyNamespace>,
    ) -> Result<Self, CacheError> {
        Ok(Self {
            core: build_core(name.into(), kind, true, expiry_in_seconds, store, namespace)?,
            _marker: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn kind(&self) -> RegionKind {
        self.core.kind
    }

    /// Expiry of every entry written to this region; 0 means none.
    pub fn expiry_in_seconds(&self) -> u64 {
        self.core.expiry_in_seconds
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        self.core.get(key).await
    }

    /// Unconditionally overwrite the cached value.
    pub async fn put(&self, key: &K, value: &V) {
        self.core.put(key, value).await
    }

    /// Drop the cached value. Also serves as the soft lock.
    pub async fn remove(&self, key: &K) {
        self.core.remove(key).await
    }

    pub async fn contains(&self, key: &K) -> bool {
        self.core.contains(key).await
    }

    pub async fn evict_all(&self) {
        self.core.clear().await
    }

    /// Release the region, clearing its namespace first when `clear` is set.
    pub async fn destroy(&self, clear: bool) {
        if clear {
            self.core.clear().await;
        }
        debug!("Destroyed region {}", self.core.name);
    }
}

/// Region holding query results or update timestamps.
pub struct GeneralRegion<K, V> {
    core: Arc<RegionCore>,
    _marker: PhantomData<fn(K) -> V>,
}

impl<K, V> Clone for GeneralRegion<K, V> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            _marker: PhantomData,
        }
    }
}

impl<K: CacheKey, V: Cacheable> GeneralRegion<K, V> {
    /// Create a region of kind query-results or timestamps.
    pub fn new(
        name: impl Into<String>,
        kind: RegionKind,
        expiry_in_seconds: u64,
        store: Arc<dyn CacheStore>,
        namespace: Arc<dyn KeyNamespace>,
    ) -> Result<Self, CacheError> {
        Ok(Self {
            core: build_core(name.into(), kind, false, expiry_in_seconds, store, namespace)?,
            _marker: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn kind(&self) -> RegionKind {
        self.core.kind
    }

    pub fn expiry_in_seconds(&self) -> u64 {
        self.core.expiry_in_seconds
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        self.core.get(key).await
    }

    pub async fn put(&self, key: &K, value: &V) {
        self.core.put(key, value).await
    }

    pub async fn evict(&self, key: &K) {
        self.core.remove(key).await
    }

    pub async fn evict_all(&self) {
        self.core.clear().await
    }

    pub async fn destroy(&self, clear: bool) {
        if clear {
            self.core.clear().await;
        }
        debug!("Destroyed region {}", self.core.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryStore, PrefixedNamespace, RegionNamespace};
    use async_trait::async_trait;
    use redis::ErrorKind;

    /// Store whose every operation fails like an unreachable server.
    struct UnreachableStore;

    fn refused() -> CacheError {
        CacheError::Redis((ErrorKind::IoError, "connection refused").into())
    }

    #[async_trait]
    impl CacheStore for UnreachableStore {
        async fn get(&self, _: &str, _: &str) -> Result<Option<String>, CacheError> {
            Err(refused())
        }
        async fn set(
            &self,
            _: &str,
            _: &str,
            _: String,
            _: Option<Duration>,
        ) -> Result<(), CacheError> {
            Err(refused())
        }
        async fn delete(&self, _: &str, _: &str) -> Result<(), CacheError> {
            Err(refused())
        }
        async fn delete_all(&self, _: &str) -> Result<(), CacheError> {
            Err(refused())
        }
        async fn next_counter(&self, _: &str) -> Result<i64, CacheError> {
            Err(refused())
        }
    }

    fn entity_region(store: Arc<dyn CacheStore>) -> TransactionalRegion<u64, String> {
        TransactionalRegion::new(
            "com.shop.Order",
            RegionKind::Entity,
            0,
            store,
            Arc::new(RegionNamespace),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_put_get_remove() {
        let region = entity_region(Arc::new(MemoryStore::new()));
        assert_eq!(region.get(&1).await, None);
        assert!(!region.contains(&1).await);

        region.put(&1, &"first".to_owned()).await;
        region.put(&1, &"second".to_owned()).await;
        assert_eq!(region.get(&1).await.as_deref(), Some("second"));
        assert!(region.contains(&1).await);

        region.remove(&1).await;
        assert_eq!(region.get(&1).await, None);
    }

    #[tokio::test]
    async fn test_evict_all_clears_only_this_region() {
        let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
        let orders = entity_region(Arc::clone(&store));
        let queries: GeneralRegion<String, Vec<u64>> = GeneralRegion::new(
            "query.orders",
            RegionKind::QueryResults,
            0,
            Arc::clone(&store),
            Arc::new(RegionNamespace),
        )
        .unwrap();

        for id in 1..=5 {
            orders.put(&id, &format!("order-{id}")).await;
        }
        queries.put(&"open".to_owned(), &vec![1, 2]).await;

        orders.evict_all().await;

        for id in 1..=5 {
            assert_eq!(orders.get(&id).await, None);
        }
        assert_eq!(queries.get(&"open".to_owned()).await, Some(vec![1, 2]));

        queries.evict(&"open".to_owned()).await;
        assert_eq!(queries.get(&"open".to_owned()).await, None);
    }

    #[tokio::test]
    async fn test_store_failures_fail_open() {
        let region = entity_region(Arc::new(UnreachableStore));

        region.put(&1, &"value".to_owned()).await;
        assert_eq!(region.get(&1).await, None);
        assert!(!region.contains(&1).await);
        region.remove(&1).await;
        region.evict_all().await;
        region.destroy(true).await;
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_deleted() {
        let store = Arc::new(MemoryStore::new());
        let region = entity_region(store.clone());
        store
            .set("com.shop.Order", "7", "not json".to_owned(), None)
            .await
            .unwrap();

        assert_eq!(region.get(&7).await, None);
        assert!(store.get("com.shop.Order", "7").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_namespace_separates_regions() {
        let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
        let plain = entity_region(Arc::clone(&store));
        let prefixed: TransactionalRegion<u64, String> = TransactionalRegion::new(
            "com.shop.Order",
            RegionKind::Entity,
            0,
            Arc::clone(&store),
            Arc::new(PrefixedNamespace::new("tenant-b")),
        )
        .unwrap();

        plain.put(&1, &"a".to_owned()).await;
        assert_eq!(prefixed.get(&1).await, None);

        prefixed.put(&1, &"b".to_owned()).await;
        plain.evict_all().await;
        assert_eq!(prefixed.get(&1).await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_expiry_applies_to_entries() {
        let region: GeneralRegion<String, i64> = GeneralRegion::new(
            "timestamps",
            RegionKind::Timestamps,
            1,
            Arc::new(MemoryStore::new()),
            Arc::new(RegionNamespace),
        )
        .unwrap();
        assert_eq!(region.expiry_in_seconds(), 1);

        region.put(&"orders".to_owned(), &42).await;
        assert_eq!(region.get(&"orders".to_owned()).await, Some(42));

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(region.get(&"orders".to_owned()).await, None);
    }

    #[test]
    fn test_kind_must_match_region_shape() {
        let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
        let wrong = TransactionalRegion::<u64, String>::new(
            "query",
            RegionKind::QueryResults,
            0,
            Arc::clone(&store),
            Arc::new(RegionNamespace),
        );
        assert!(matches!(wrong, Err(CacheError::InvalidConfiguration(_))));

        let wrong = GeneralRegion::<u64, String>::new(
            "orders",
            RegionKind::Entity,
            0,
            store,
            Arc::new(RegionNamespace),
        );
        assert!(wrong.is_err());
    }
}
