//! Redis implementation of the store seam
//!
//! Entries live at `<namespace>:<encoded key>` so a whole region can be
//! dropped with a cursor `SCAN MATCH <namespace>:*`. `KEYS` is never used.
//! Colons inside the namespace are backslash-escaped.

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::sentinel::{Sentinel, SentinelNodeConnectionInfo};
use redis::{AsyncCommands, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::RedisSettings;
use crate::{CacheError, CacheStore};

const SCAN_BATCH: usize = 500;

/// Store client backed by a multiplexed, auto-reconnecting Redis connection.
#[derive(Clone)]
pub struct RedisStore {
    redis: ConnectionManager,
}

impl RedisStore {
    /// Connect using the configured topology and verify the server answers.
    pub async fn connect(settings: &RedisSettings) -> Result<Self, CacheError> {
        let client = Self::client(settings).await?;
        let redis =
            ConnectionManager::new_with_config(client, Self::manager_config(settings)).await?;

        let store = Self { redis };
        store.ping().await?;
        info!(
            "Connected to Redis cache store (database {})",
            settings.database
        );
        Ok(store)
    }

    /// Retry budget for the manager: a refused connection fails after
    /// `connect_retries` attempts, none of them waiting longer than `timeout_ms`.
    fn manager_config(settings: &RedisSettings) -> ConnectionManagerConfig {
        ConnectionManagerConfig::new()
            .set_connection_timeout(settings.timeout())
            .set_response_timeout(settings.timeout())
            .set_number_of_retries(settings.connect_retries)
            .set_factor(2)
            .set_max_delay(settings.timeout_ms)
    }

    /// Wrap an already configured client, e.g. one built from a URL.
    pub async fn from_client(client: redis::Client) -> Result<Self, CacheError> {
        let redis = ConnectionManager::new(client).await?;
        Ok(Self { redis })
    }

    pub async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.redis.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    async fn client(settings: &RedisSettings) -> Result<redis::Client, CacheError> {
        let redis_info = RedisConnectionInfo {
            db: settings.database,
            password: settings.password.clone(),
            ..Default::default()
        };

        if let Some((sentinels, master_name)) = settings.sentinel() {
            info!(
                "Resolving Redis master {} through sentinels {:?}",
                master_name, sentinels
            );
            let urls: Vec<String> = sentinels
                .iter()
                .map(|addr| format!("redis://{addr}"))
                .collect();
            let mut sentinel = Sentinel::build(urls)?;
            let node_info = SentinelNodeConnectionInfo {
                redis_connection_info: Some(redis_info),
                ..Default::default()
            };
            return Ok(sentinel
                .async_master_for(master_name, Some(&node_info))
                .await?);
        }

        info!(
            "Creating Redis client for {}:{}",
            settings.host, settings.port
        );
        Ok(redis::Client::open(ConnectionInfo {
            addr: ConnectionAddr::Tcp(settings.host.clone(), settings.port),
            redis: redis_info,
        })?)
    }

    /// `:` separates namespace from key, so it is escaped inside the namespace.
    fn escape_namespace(namespace: &str) -> String {
        let mut escaped = String::with_capacity(namespace.len());
        for c in namespace.chars() {
            if matches!(c, ':' | '\\') {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        escaped
    }

    fn entry_key(namespace: &str, key: &str) -> String {
        format!("{}:{key}", Self::escape_namespace(namespace))
    }

    fn namespace_pattern(namespace: &str) -> String {
        let escaped = Self::escape_namespace(namespace);
        let mut pattern = String::with_capacity(escaped.len() + 2);
        for c in escaped.chars() {
            if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push_str(":*");
        pattern
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.redis.clone();
        Ok(conn
            .get::<_, Option<String>>(Self::entry_key(namespace, key))
            .await?)
    }

    async fn set(
        &self,
        namespace: &str,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let mut conn = self.redis.clone();
        let redis_key = Self::entry_key(namespace, key);
        match ttl.map(|ttl| ttl.as_secs().max(1)) {
            Some(seconds) => conn.set_ex::<_, _, ()>(redis_key, value, seconds).await?,
            None => conn.set::<_, _, ()>(redis_key, value).await?,
        }
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<(), CacheError> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(Self::entry_key(namespace, key)).await?;
        Ok(())
    }

    async fn delete_all(&self, namespace: &str) -> Result<(), CacheError> {
        let mut conn = self.redis.clone();
        let pattern = Self::namespace_pattern(namespace);
        let mut cursor: u64 = 0;
        let mut deleted = 0usize;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                deleted += keys.len();
                conn.del::<_, ()>(keys).await?;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!("Deleted {} Redis keys in namespace {}", deleted, namespace);
        Ok(())
    }

    async fn exists(&self, namespace: &str, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.redis.clone();
        Ok(conn
            .exists::<_, bool>(Self::entry_key(namespace, key))
            .await?)
    }

    async fn next_counter(&self, counter_key: &str) -> Result<i64, CacheError> {
        let mut conn = self.redis.clone();
        Ok(conn.incr::<_, _, i64>(counter_key, 1).await?)
    }
}
