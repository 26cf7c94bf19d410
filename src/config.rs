//! Cache configuration
//!
//! Settings are read from an optional file and from `L2CACHE_`-prefixed
//! environment variables, e.g. `L2CACHE_REDIS__HOST` or
//! `L2CACHE_REGION_EXPIRY__ORDERS=600`. Names that select an implementation
//! (`timestamper`, `namespace`) stay strings here and are resolved when the
//! region factory starts, so a typo fails start-up instead of loading.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;
use tracing::debug;

use crate::CacheError;

const ENV_PREFIX: &str = "L2CACHE";
const DEFAULT_EXPIRY_IN_SECONDS: u64 = 120;
const DEFAULT_REDIS_PORT: u16 = 6379;
const DEFAULT_REDIS_TIMEOUT_MS: u64 = 2000;
const DEFAULT_REDIS_CONNECT_RETRIES: usize = 1;

/// Connection settings for the remote Redis store
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub database: i64,
    /// Connect and response timeout enforced by the client, in milliseconds
    pub timeout_ms: u64,
    /// Reconnect attempts after a failed connect, each delayed by at most `timeout_ms`
    pub connect_retries: usize,
    /// Sentinel addresses as `host:port`
    pub sentinels: Vec<String>,
    /// Name of the monitored master; sentinel mode needs both this and `sentinels`
    pub master_name: Option<String>,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: DEFAULT_REDIS_PORT,
            password: None,
            database: 0,
            timeout_ms: DEFAULT_REDIS_TIMEOUT_MS,
            connect_retries: DEFAULT_REDIS_CONNECT_RETRIES,
            sentinels: Vec::new(),
            master_name: None,
        }
    }
}

impl RedisSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Sentinel topology, when one is fully configured.
    pub fn sentinel(&self) -> Option<(&[String], &str)> {
        match &self.master_name {
            Some(master) if !self.sentinels.is_empty() => {
                Some((self.sentinels.as_slice(), master.as_str()))
            }
            _ => None,
        }
    }
}

/// Configuration for the region factory and everything it builds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub redis: RedisSettings,
    /// Expiry applied to regions without an override; 0 disables expiry
    pub default_expiry_in_seconds: u64,
    /// Per-region expiry overrides keyed by region name
    pub region_expiry: HashMap<String, u64>,
    /// Timestamp source: `clock` or `store`
    pub timestamper: String,
    /// Key namespacing: `region` or `prefixed`
    pub namespace: String,
    pub region_prefix: Option<String>,
    /// Clear every region built by the factory when it stops
    pub clear_on_stop: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis: RedisSettings::default(),
            default_expiry_in_seconds: DEFAULT_EXPIRY_IN_SECONDS,
            region_expiry: HashMap::new(),
            timestamper: "clock".to_owned(),
            namespace: "region".to_owned(),
            region_prefix: None,
            clear_on_stop: false,
        }
    }
}

impl CacheConfig {
    /// Load configuration from an optional file, overridden by environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, CacheError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("redis.sentinels")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Expiry for the named region, honouring per-region overrides.
    pub fn expiry_for(&self, region_name: &str) -> u64 {
        let expiry = self
            .region_expiry
            .get(region_name)
            .copied()
            .unwrap_or(self.default_expiry_in_seconds);
        debug!("Expiry for region {}: {}s", region_name, expiry);
        expiry
    }

    /// Counter key used by the store-backed timestamp source.
    pub fn timestamp_counter_key(&self) -> String {
        match self.region_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}.timestamp"),
            _ => "timestamp".to_owned(),
        }
    }
}
