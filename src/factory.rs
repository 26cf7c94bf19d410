//! Region factory
//!
//! The context object the persistence engine owns for the lifetime of its
//! cache: it holds the store connection, the timestamp source and the key
//! namespacing strategy, builds regions and binds access strategies to them.
//! Dropping it (or calling [`RegionFactory::stop`]) releases the connection.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::namespace::NamespaceKind;
use crate::timestamp::{Timestamp, TimestamperKind};
use crate::{
    AccessStrategy, AccessType, CacheConfig, CacheError, CacheKey, CacheStore, Cacheable,
    GeneralRegion, KeyNamespace, RedisStore, RegionKind, Timestamper, TransactionalRegion,
};

/// Wraps the namespace handed to regions and remembers every namespace
/// they resolved, so a tenant-scoped region is cleared for each tenant
/// that touched it.
struct TrackedNamespace {
    inner: Arc<dyn KeyNamespace>,
    resolved: Arc<Mutex<BTreeSet<String>>>,
}

impl KeyNamespace for TrackedNamespace {
    fn resolve(&self, region_name: &str) -> String {
        let namespace = self.inner.resolve(region_name);
        let mut resolved = self.resolved.lock().unwrap_or_else(|e| e.into_inner());
        if !resolved.contains(&namespace) {
            resolved.insert(namespace.clone());
        }
        namespace
    }
}

struct RegisteredRegion {
    kind: RegionKind,
    namespace: Arc<dyn KeyNamespace>,
}

/// Owns the shared cache state for one persistence unit.
pub struct RegionFactory {
    config: CacheConfig,
    store: Arc<dyn CacheStore>,
    timestamper: Arc<dyn Timestamper>,
    namespace: Arc<dyn KeyNamespace>,
    resolved: Arc<Mutex<BTreeSet<String>>>,
    regions: RwLock<HashMap<String, RegisteredRegion>>,
}

impl RegionFactory {
    /// Connect to Redis and resolve the configured strategies.
    ///
    /// Any failure is fatal and reported as [`CacheError::Startup`].
    pub async fn start(config: CacheConfig) -> Result<Self, CacheError> {
        info!("Starting region factory...");
        let store = match RedisStore::connect(&config.redis).await {
            Ok(store) => store,
            Err(e) => {
                error!("Fail to start region factory: {}", e);
                return Err(CacheError::startup(e));
            }
        };
        Self::start_with_store(config, Arc::new(store)).await
    }

    /// Start on top of an already connected store.
    pub async fn start_with_store(
        config: CacheConfig,
        store: Arc<dyn CacheStore>,
    ) -> Result<Self, CacheError> {
        let factory = Self::resolve(config, store).map_err(|e| {
            error!("Fail to start region factory: {}", e);
            CacheError::startup(e)
        })?;
        info!(
            "Region factory started (timestamper: {}, namespace: {})",
            factory.config.timestamper, factory.config.namespace
        );
        Ok(factory)
    }

    fn resolve(config: CacheConfig, store: Arc<dyn CacheStore>) -> Result<Self, CacheError> {
        let timestamper = config
            .timestamper
            .parse::<TimestamperKind>()?
            .build(Arc::clone(&store), &config.timestamp_counter_key());
        let namespace = config
            .namespace
            .parse::<NamespaceKind>()?
            .build(config.region_prefix.as_deref())?;

        let resolved = Arc::new(Mutex::new(BTreeSet::new()));
        Ok(Self {
            config,
            store,
            timestamper,
            namespace: Self::tracked(namespace, &resolved),
            resolved,
            regions: RwLock::new(HashMap::new()),
        })
    }

    /// Replace the key namespacing strategy, e.g. with a tenant resolver.
    ///
    /// Only regions built afterwards use it.
    pub fn with_namespace(mut self, namespace: Arc<dyn KeyNamespace>) -> Self {
        self.namespace = Self::tracked(namespace, &self.resolved);
        self
    }

    fn tracked(
        namespace: Arc<dyn KeyNamespace>,
        resolved: &Arc<Mutex<BTreeSet<String>>>,
    ) -> Arc<dyn KeyNamespace> {
        Arc::new(TrackedNamespace {
            inner: namespace,
            resolved: Arc::clone(resolved),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Next timestamp from the configured source.
    pub async fn next_timestamp(&self) -> Result<Timestamp, CacheError> {
        self.timestamper.next().await
    }

    pub async fn entity_region<K: CacheKey, V: Cacheable>(
        &self,
        name: &str,
    ) -> Result<TransactionalRegion<K, V>, CacheError> {
        self.transactional_region(name, RegionKind::Entity).await
    }

    pub async fn collection_region<K: CacheKey, V: Cacheable>(
        &self,
        name: &str,
    ) -> Result<TransactionalRegion<K, V>, CacheError> {
        self.transactional_region(name, RegionKind::Collection).await
    }

    pub async fn natural_id_region<K: CacheKey, V: Cacheable>(
        &self,
        name: &str,
    ) -> Result<TransactionalRegion<K, V>, CacheError> {
        self.transactional_region(name, RegionKind::NaturalId).await
    }

    pub async fn query_results_region<K: CacheKey, V: Cacheable>(
        &self,
        name: &str,
    ) -> Result<GeneralRegion<K, V>, CacheError> {
        self.general_region(name, RegionKind::QueryResults).await
    }

    pub async fn timestamps_region<K: CacheKey, V: Cacheable>(
        &self,
        name: &str,
    ) -> Result<GeneralRegion<K, V>, CacheError> {
        self.general_region(name, RegionKind::Timestamps).await
    }

    /// Bind the named concurrency strategy to a region.
    pub fn access_strategy<K: CacheKey, V: Cacheable>(
        &self,
        region: TransactionalRegion<K, V>,
        strategy_name: &str,
    ) -> Result<AccessStrategy<K, V>, CacheError> {
        let access_type = strategy_name.parse::<AccessType>()?;
        Ok(AccessStrategy::new(region, access_type))
    }

    async fn transactional_region<K: CacheKey, V: Cacheable>(
        &self,
        name: &str,
        kind: RegionKind,
    ) -> Result<TransactionalRegion<K, V>, CacheError> {
        let region = TransactionalRegion::new(
            name,
            kind,
            self.config.expiry_for(name),
            Arc::clone(&self.store),
            Arc::clone(&self.namespace),
        )?;
        self.register(name, kind).await;
        Ok(region)
    }

    async fn general_region<K: CacheKey, V: Cacheable>(
        &self,
        name: &str,
        kind: RegionKind,
    ) -> Result<GeneralRegion<K, V>, CacheError> {
        let region = GeneralRegion::new(
            name,
            kind,
            self.config.expiry_for(name),
            Arc::clone(&self.store),
            Arc::clone(&self.namespace),
        )?;
        self.register(name, kind).await;
        Ok(region)
    }

    async fn register(&self, name: &str, kind: RegionKind) {
        let registered = RegisteredRegion {
            kind,
            namespace: Arc::clone(&self.namespace),
        };
        let mut regions = self.regions.write().await;
        if let Some(previous) = regions.insert(name.to_owned(), registered)
            && previous.kind != kind
        {
            debug!("Region {} rebuilt as {} (was {})", name, kind, previous.kind);
        }
    }

    /// Names of every region built so far.
    pub async fn region_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.regions.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every namespace a built region resolved, plus each region's current one.
    async fn namespaces_to_clear(&self) -> BTreeSet<String> {
        let regions = self.regions.read().await;
        for (name, region) in regions.iter() {
            region.namespace.resolve(name);
        }
        self.resolved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Shut down, clearing every built region first when configured to.
    pub async fn stop(self) {
        debug!("Stopping region factory...");
        if self.config.clear_on_stop {
            let namespaces = self.namespaces_to_clear().await;
            let clears = namespaces.into_iter().map(|namespace| {
                let store = Arc::clone(&self.store);
                async move {
                    if let Err(e) = store.delete_all(&namespace).await {
                        warn!(
                            "Fail to clear region {} on stop: {}. Continuing.",
                            namespace, e
                        );
                    }
                }
            });
            futures::future::join_all(clears).await;
        }
        info!("Region factory stopped");
    }
}
