//! Remote key-value store seam
//!
//! Regions talk to the shared store only through [`CacheStore`]. Keys arrive
//! already namespaced per region and encoded; values are JSON strings.

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use std::{fmt::Debug, hash::Hash, time::Duration};

use crate::CacheError;

/// Trait for types that can be cached
pub trait Cacheable: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}
impl<T> Cacheable for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Trait for cache key types
///
/// Keys are opaque to the cache; their serialized form is what identifies an
/// entry in the remote store, so equality must agree with serialization.
pub trait CacheKey: Serialize + Debug + Hash + Eq + Clone + Send + Sync + 'static {}
impl<T> CacheKey for T where T: Serialize + Debug + Hash + Eq + Clone + Send + Sync + 'static {}

/// Encode a cache key into the string used by the store.
pub(crate) fn encode_key<K: CacheKey>(key: &K) -> Result<String, serde_json::Error> {
    serde_json::to_string(key)
}

/// Client operations the cache needs from the remote store.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Read a value, `None` when absent or expired.
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, CacheError>;

    /// Overwrite a value; `None` keeps it until evicted.
    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>;

    async fn delete(&self, namespace: &str, key: &str) -> Result<(), CacheError>;

    /// Remove every entry in a namespace.
    async fn delete_all(&self, namespace: &str) -> Result<(), CacheError>;

    async fn exists(&self, namespace: &str, key: &str) -> Result<bool, CacheError> {
        Ok(self.get(namespace, key).await?.is_some())
    }

    /// Atomically increment a counter shared by every client of the store.
    async fn next_counter(&self, counter_key: &str) -> Result<i64, CacheError>;
}
