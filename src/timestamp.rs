//! Timestamp sources
//!
//! The persistence engine orders cache writes against transaction
//! boundaries with these timestamps. Two sources exist:
//! - [`ClockTimestamper`]: wall-clock milliseconds, ordered only within one process
//! - [`StoreTimestamper`]: an atomic counter in the shared store, strictly
//!   increasing across every process using that store, one round trip per call

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};

use crate::{CacheError, CacheStore};

/// 64-bit monotonically non-decreasing value
pub type Timestamp = i64;

/// Source of timestamps; sequential calls from one caller never go backwards.
#[async_trait]
pub trait Timestamper: Send + Sync + 'static {
    async fn next(&self) -> Result<Timestamp, CacheError>;
}

/// Process-local timestamps derived from the system clock.
///
/// Values may repeat within a millisecond and across processes. A clock
/// stepping backwards is absorbed by holding the last value returned.
#[derive(Debug, Default)]
pub struct ClockTimestamper {
    last: AtomicI64,
}

impl ClockTimestamper {
    pub fn new() -> Self {
        Self::default()
    }

    fn now_millis() -> Timestamp {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as Timestamp)
            .unwrap_or(0)
    }
}

#[async_trait]
impl Timestamper for ClockTimestamper {
    async fn next(&self) -> Result<Timestamp, CacheError> {
        let now = Self::now_millis();
        let previous = self.last.fetch_max(now, Ordering::AcqRel);
        let next = previous.max(now);
        trace!("Clock timestamper next: {}", next);
        Ok(next)
    }
}

/// Cluster-wide timestamps from an atomic increment in the shared store.
pub struct StoreTimestamper {
    store: Arc<dyn CacheStore>,
    counter_key: String,
}

impl StoreTimestamper {
    pub fn new(store: Arc<dyn CacheStore>, counter_key: impl Into<String>) -> Self {
        let counter_key = counter_key.into();
        debug!("Store timestamper using counter key {}", counter_key);
        Self { store, counter_key }
    }

    pub fn counter_key(&self) -> &str {
        &self.counter_key
    }
}

#[async_trait]
impl Timestamper for StoreTimestamper {
    async fn next(&self) -> Result<Timestamp, CacheError> {
        let next = self.store.next_counter(&self.counter_key).await?;
        debug!("Store timestamper key {} next: {}", self.counter_key, next);
        Ok(next)
    }
}

/// Timestamp sources selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestamperKind {
    Clock,
    Store,
}

impl FromStr for TimestamperKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clock" | "local" => Ok(TimestamperKind::Clock),
            "store" | "redis" => Ok(TimestamperKind::Store),
            other => Err(CacheError::InvalidConfiguration(format!(
                "unknown timestamper '{other}'"
            ))),
        }
    }
}

impl fmt::Display for TimestamperKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestamperKind::Clock => f.write_str("clock"),
            TimestamperKind::Store => f.write_str("store"),
        }
    }
}

impl TimestamperKind {
    pub fn build(self, store: Arc<dyn CacheStore>, counter_key: &str) -> Arc<dyn Timestamper> {
        match self {
            TimestamperKind::Clock => Arc::new(ClockTimestamper::new()),
            TimestamperKind::Store => Arc::new(StoreTimestamper::new(store, counter_key)),
        }
    }
}
