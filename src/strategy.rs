//! Access strategies
//!
//! The consistency protocol between the persistence engine and a
//! transactional region. Each concurrency strategy is a combination of two
//! policies over the same read path:
//! - when writes made during a unit of work become visible ([`WriteVisibility`])
//! - what signalling write intent does to the cached value ([`LockPolicy`])
//!
//! There are no owned locks or leases. A soft lock is an eviction: while a
//! writer holds it the key is simply absent, so readers fall through to the
//! database. Two writers may both lock and both write afterwards; the last
//! write wins.
//!
//! | strategy             | lock        | insert / update | after_insert / after_update |
//! |----------------------|-------------|-----------------|-----------------------------|
//! | read-only            | no-op       | no-op / error   | put / error                 |
//! | read-write           | evict       | no-op           | put                         |
//! | nonstrict-read-write | no-op       | no-op / evict   | no-op / evict               |
//! | transactional        | evict       | put             | no-op                       |

use std::fmt;
use std::str::FromStr;
use tracing::{debug, trace};

use crate::{CacheError, CacheKey, Cacheable, RegionKind, TransactionalRegion};

const READ_ONLY_UPDATE: &str = "Can't write to a readonly object";

/// Marker for a held soft lock
///
/// Carries nothing: the lock is the absence of the key from the region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SoftLock;

/// Concurrency strategies a region can be configured with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessType {
    ReadOnly,
    ReadWrite,
    NonstrictReadWrite,
    Transactional,
}

impl FromStr for AccessType {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "read-only" => Ok(AccessType::ReadOnly),
            "read-write" => Ok(AccessType::ReadWrite),
            "nonstrict-read-write" => Ok(AccessType::NonstrictReadWrite),
            "transactional" => Ok(AccessType::Transactional),
            other => Err(CacheError::InvalidConfiguration(format!(
                "unknown cache concurrency strategy '{other}'"
            ))),
        }
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccessType::ReadOnly => "read-only",
            AccessType::ReadWrite => "read-write",
            AccessType::NonstrictReadWrite => "nonstrict-read-write",
            AccessType::Transactional => "transactional",
        };
        f.write_str(name)
    }
}

/// When values written by a unit of work reach the region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteVisibility {
    /// Only inserts, and only after commit. Updates are contract violations.
    Immutable,
    /// Inserts and updates are put after commit.
    AfterCommit,
    /// Inserts and updates are put immediately; the store's own rollback
    /// is trusted to undo them.
    Immediate,
    /// Nothing is put; updates evict instead.
    Invalidate,
}

/// What `lock_item` does to the cached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockPolicy {
    Noop,
    Evict,
}

impl AccessType {
    pub fn write_visibility(self) -> WriteVisibility {
        match self {
            AccessType::ReadOnly => WriteVisibility::Immutable,
            AccessType::ReadWrite => WriteVisibility::AfterCommit,
            AccessType::NonstrictReadWrite => WriteVisibility::Invalidate,
            AccessType::Transactional => WriteVisibility::Immediate,
        }
    }

    pub fn lock_policy(self) -> LockPolicy {
        match self {
            AccessType::ReadOnly | AccessType::NonstrictReadWrite => LockPolicy::Noop,
            AccessType::ReadWrite | AccessType::Transactional => LockPolicy::Evict,
        }
    }
}

/// Consistency protocol bound to one transactional region.
///
/// Stateless apart from the region handle; cheap to clone and share across
/// sessions. Only [`update`](Self::update) and
/// [`after_update`](Self::after_update) can fail, and only on read-only data.
///
/// The `bool` the write operations return says whether the protocol chose
/// to put the value. It does not say the store accepted it: store failures
/// are logged and swallowed, so `true` may come back with nothing cached.
pub struct AccessStrategy<K, V> {
    region: TransactionalRegion<K, V>,
    access_type: AccessType,
    visibility: WriteVisibility,
    lock_policy: LockPolicy,
}

impl<K, V> Clone for AccessStrategy<K, V> {
    fn clone(&self) -> Self {
        Self {
            region: self.region.clone(),
            access_type: self.access_type,
            visibility: self.visibility,
            lock_policy: self.lock_policy,
        }
    }
}

impl<K: CacheKey, V: Cacheable> AccessStrategy<K, V> {
    /// Bind the strategy for `access_type` to a region.
    pub fn new(region: TransactionalRegion<K, V>, access_type: AccessType) -> Self {
        debug!(
            "Creating {} access strategy for {} region {}",
            access_type,
            region.kind(),
            region.name()
        );
        Self {
            region,
            access_type,
            visibility: access_type.write_visibility(),
            lock_policy: access_type.lock_policy(),
        }
    }

    pub fn read_only(region: TransactionalRegion<K, V>) -> Self {
        Self::new(region, AccessType::ReadOnly)
    }

    pub fn read_write(region: TransactionalRegion<K, V>) -> Self {
        Self::new(region, AccessType::ReadWrite)
    }

    pub fn nonstrict_read_write(region: TransactionalRegion<K, V>) -> Self {
        Self::new(region, AccessType::NonstrictReadWrite)
    }

    pub fn transactional(region: TransactionalRegion<K, V>) -> Self {
        Self::new(region, AccessType::Transactional)
    }

    pub fn region(&self) -> &TransactionalRegion<K, V> {
        &self.region
    }

    pub fn access_type(&self) -> AccessType {
        self.access_type
    }

    pub fn region_kind(&self) -> RegionKind {
        self.region.kind()
    }

    /// Read the cached value. No version or timestamp check is made.
    pub async fn get(&self, key: &K) -> Option<V> {
        self.region.get(key).await
    }

    /// Cache a value just loaded from the database.
    ///
    /// With `minimal_put` set, an already cached key is left alone and the
    /// call reports `false`. `true` means a put was attempted.
    pub async fn put_from_load(&self, key: &K, value: &V, minimal_put: bool) -> bool {
        if minimal_put && self.region.contains(key).await {
            trace!(
                "Minimal put skipped in region {} for key {:?}",
                self.region.name(),
                key
            );
            return false;
        }
        self.region.put(key, value).await;
        true
    }

    /// Signal intent to write `key`.
    pub async fn lock_item(&self, key: &K) -> SoftLock {
        if self.lock_policy == LockPolicy::Evict {
            self.region.remove(key).await;
        }
        SoftLock
    }

    /// Release a soft lock. Always evicts, dropping anything written while
    /// the lock was held.
    pub async fn unlock_item(&self, key: &K, _lock: SoftLock) {
        self.region.remove(key).await;
    }

    /// Called before the inserting transaction commits.
    pub async fn insert(&self, key: &K, value: &V) -> bool {
        match self.visibility {
            WriteVisibility::Immediate => {
                self.region.put(key, value).await;
                true
            }
            WriteVisibility::Immutable
            | WriteVisibility::AfterCommit
            | WriteVisibility::Invalidate => false,
        }
    }

    /// Called after the inserting transaction committed.
    pub async fn after_insert(&self, key: &K, value: &V) -> bool {
        match self.visibility {
            WriteVisibility::Immutable | WriteVisibility::AfterCommit => {
                self.region.put(key, value).await;
                true
            }
            WriteVisibility::Immediate | WriteVisibility::Invalidate => false,
        }
    }

    /// Called before the updating transaction commits.
    pub async fn update(&self, key: &K, value: &V) -> Result<bool, CacheError> {
        match self.visibility {
            WriteVisibility::Immutable => Err(CacheError::UnsupportedOperation(READ_ONLY_UPDATE)),
            WriteVisibility::Immediate => {
                self.region.put(key, value).await;
                Ok(true)
            }
            WriteVisibility::Invalidate => {
                self.region.remove(key).await;
                Ok(false)
            }
            WriteVisibility::AfterCommit => Ok(false),
        }
    }

    /// Called after the updating transaction committed.
    pub async fn after_update(
        &self,
        key: &K,
        value: &V,
        _lock: SoftLock,
    ) -> Result<bool, CacheError> {
        match self.visibility {
            WriteVisibility::Immutable => Err(CacheError::UnsupportedOperation(READ_ONLY_UPDATE)),
            WriteVisibility::AfterCommit => {
                self.region.put(key, value).await;
                Ok(true)
            }
            WriteVisibility::Invalidate => {
                self.region.remove(key).await;
                Ok(false)
            }
            WriteVisibility::Immediate => Ok(false),
        }
    }

    /// Invalidate `key` outside the insert/update path.
    pub async fn remove(&self, key: &K) {
        self.region.remove(key).await
    }

    pub async fn remove_all(&self) {
        self.region.evict_all().await
    }

    pub async fn evict(&self, key: &K) {
        self.region.remove(key).await
    }

    pub async fn evict_all(&self) {
        self.region.evict_all().await
    }

    /// Soft-lock the whole region by clearing it.
    pub async fn lock_region(&self) -> SoftLock {
        self.region.evict_all().await;
        SoftLock
    }

    pub async fn unlock_region(&self, _lock: SoftLock) {
        self.region.evict_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CacheStore, MemoryStore, RegionNamespace};
    use std::sync::Arc;

    fn strategy(access_type: AccessType) -> AccessStrategy<u64, String> {
        let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
        let region = TransactionalRegion::new(
            "com.shop.Product",
            RegionKind::Entity,
            0,
            store,
            Arc::new(RegionNamespace),
        )
        .unwrap();
        AccessStrategy::new(region, access_type)
    }

    fn v(s: &str) -> String {
        s.to_owned()
    }

    #[test]
    fn test_access_type_from_str() {
        assert_eq!("read-only".parse::<AccessType>().unwrap(), AccessType::ReadOnly);
        assert_eq!("READ_WRITE".parse::<AccessType>().unwrap(), AccessType::ReadWrite);
        assert_eq!(
            "nonstrict-read-write".parse::<AccessType>().unwrap(),
            AccessType::NonstrictReadWrite
        );
        assert_eq!(
            "transactional".parse::<AccessType>().unwrap(),
            AccessType::Transactional
        );
        assert!("write-behind".parse::<AccessType>().is_err());
    }

    #[test]
    fn test_display_round_trips() {
        for access_type in [
            AccessType::ReadOnly,
            AccessType::ReadWrite,
            AccessType::NonstrictReadWrite,
            AccessType::Transactional,
        ] {
            assert_eq!(
                access_type.to_string().parse::<AccessType>().unwrap(),
                access_type
            );
        }
    }

    #[tokio::test]
    async fn test_minimal_put() {
        for access_type in [
            AccessType::ReadOnly,
            AccessType::ReadWrite,
            AccessType::NonstrictReadWrite,
            AccessType::Transactional,
        ] {
            let strategy = strategy(access_type);
            assert!(strategy.put_from_load(&1, &v("loaded"), true).await);
            assert!(!strategy.put_from_load(&1, &v("again"), true).await);
            assert_eq!(strategy.get(&1).await.as_deref(), Some("loaded"));

            assert!(strategy.put_from_load(&1, &v("forced"), false).await);
            assert_eq!(strategy.get(&1).await.as_deref(), Some("forced"));
        }
    }

    #[tokio::test]
    async fn test_read_only() {
        let strategy = strategy(AccessType::ReadOnly);

        assert!(!strategy.insert(&1, &v("row")).await);
        assert_eq!(strategy.get(&1).await, None);
        assert!(strategy.after_insert(&1, &v("row")).await);
        assert_eq!(strategy.get(&1).await.as_deref(), Some("row"));

        let lock = strategy.lock_item(&1).await;
        assert_eq!(strategy.get(&1).await.as_deref(), Some("row"));

        let err = strategy.update(&1, &v("changed")).await.unwrap_err();
        assert!(err.is_unsupported());
        let err = strategy.after_update(&1, &v("changed"), lock).await.unwrap_err();
        assert!(matches!(err, CacheError::UnsupportedOperation(_)));
        assert_eq!(strategy.get(&1).await.as_deref(), Some("row"));

        strategy.unlock_item(&1, lock).await;
        assert_eq!(strategy.get(&1).await, None);
    }

    #[tokio::test]
    async fn test_read_write() {
        let strategy = strategy(AccessType::ReadWrite);

        assert!(!strategy.insert(&1, &v("new")).await);
        assert_eq!(strategy.get(&1).await, None);
        assert!(strategy.after_insert(&1, &v("new")).await);
        assert_eq!(strategy.get(&1).await.as_deref(), Some("new"));

        let lock = strategy.lock_item(&1).await;
        assert_eq!(strategy.get(&1).await, None);
        assert!(!strategy.update(&1, &v("changed")).await.unwrap());
        assert_eq!(strategy.get(&1).await, None);
        assert!(strategy.after_update(&1, &v("changed"), lock).await.unwrap());
        assert_eq!(strategy.get(&1).await.as_deref(), Some("changed"));

        assert!(strategy.after_update(&1, &v("again"), SoftLock).await.unwrap());
        assert_eq!(strategy.get(&1).await.as_deref(), Some("again"));

        strategy.unlock_item(&1, lock).await;
        assert_eq!(strategy.get(&1).await, None);
    }

    #[tokio::test]
    async fn test_nonstrict_read_write() {
        let strategy = strategy(AccessType::NonstrictReadWrite);

        assert!(!strategy.insert(&1, &v("new")).await);
        assert!(!strategy.after_insert(&1, &v("new")).await);
        assert_eq!(strategy.get(&1).await, None);

        strategy.put_from_load(&1, &v("loaded"), false).await;
        let lock = strategy.lock_item(&1).await;
        assert_eq!(strategy.get(&1).await.as_deref(), Some("loaded"));

        assert!(!strategy.update(&1, &v("changed")).await.unwrap());
        assert_eq!(strategy.get(&1).await, None);

        strategy.put_from_load(&1, &v("stale"), false).await;
        assert!(!strategy.after_update(&1, &v("changed"), lock).await.unwrap());
        assert_eq!(strategy.get(&1).await, None);
    }

    #[tokio::test]
    async fn test_transactional() {
        let strategy = strategy(AccessType::Transactional);

        assert!(strategy.insert(&1, &v("new")).await);
        assert_eq!(strategy.get(&1).await.as_deref(), Some("new"));
        assert!(!strategy.after_insert(&1, &v("other")).await);
        assert_eq!(strategy.get(&1).await.as_deref(), Some("new"));

        assert!(strategy.update(&1, &v("changed")).await.unwrap());
        assert_eq!(strategy.get(&1).await.as_deref(), Some("changed"));
        assert!(!strategy.after_update(&1, &v("other"), SoftLock).await.unwrap());
        assert_eq!(strategy.get(&1).await.as_deref(), Some("changed"));

        let lock = strategy.lock_item(&1).await;
        assert_eq!(strategy.get(&1).await, None);
        strategy.insert(&1, &v("rewritten")).await;
        strategy.unlock_item(&1, lock).await;
        assert_eq!(strategy.get(&1).await, None);

        strategy.insert(&2, &v("two")).await;
        strategy.remove(&2).await;
        assert_eq!(strategy.get(&2).await, None);
    }

    #[tokio::test]
    async fn test_lock_region() {
        let strategy = strategy(AccessType::ReadWrite);
        for id in 1..=3 {
            strategy.put_from_load(&id, &v("row"), false).await;
        }

        let lock = strategy.lock_region().await;
        for id in 1..=3 {
            assert_eq!(strategy.get(&id).await, None);
        }

        strategy.put_from_load(&1, &v("row"), false).await;
        strategy.unlock_region(lock).await;
        assert_eq!(strategy.get(&1).await, None);
    }
}
