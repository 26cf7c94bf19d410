//! l2cache - Redis-backed second-level cache for persistence engines
//!
//! This library keeps entities, collections, natural-id lookups and query
//! results cached in a shared Redis store acceptably consistent with the
//! transactional database behind them:
//! - Access strategies (read-only, read-write, nonstrict-read-write,
//!   transactional) decide when a value may be read, written or invalidated
//! - Soft locks are evictions, not leases: a key being written is simply absent
//! - Timestamps come from the local clock or from a cluster-wide counter
//!
//! The cache fails open. Store errors during reads become misses and errors
//! during writes or evictions are logged and ignored; only contract
//! violations (updating read-only data) and start-up failures reach callers.

mod config;
mod error;
mod factory;
mod memory_store;
mod namespace;
mod redis_store;
mod region;
mod store;
mod strategy;
mod timestamp;

pub use crate::config::{CacheConfig, RedisSettings};
pub use error::CacheError;
pub use factory::RegionFactory;
pub use memory_store::MemoryStore;
pub use namespace::{
    KeyNamespace, NamespaceKind, PrefixedNamespace, RegionNamespace, TenantNamespace,
};
pub use redis_store::RedisStore;
pub use region::{GeneralRegion, RegionKind, TransactionalRegion};
pub use store::{CacheKey, CacheStore, Cacheable};
pub use strategy::{AccessStrategy, AccessType, LockPolicy, SoftLock, WriteVisibility};
pub use timestamp::{
    ClockTimestamper, StoreTimestamper, Timestamp, Timestamper, TimestamperKind,
};

// Re-export async_trait for convenience
pub use async_trait::async_trait;
