//! Cache error types

use redis::RedisError;

/// Cache-related errors
///
/// Remote-store and serialization failures only reach callers from
/// operations that are not fail-open (start-up, timestamps, raw store
/// access). Region and access-strategy operations swallow them.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    #[error("Failed to start cache region factory: {0}")]
    Startup(#[source] Box<CacheError>),
}

impl CacheError {
    /// Wrap an error raised while the region factory was starting.
    pub(crate) fn startup(err: CacheError) -> Self {
        match err {
            CacheError::Startup(_) => err,
            other => CacheError::Startup(Box::new(other)),
        }
    }

    /// Whether this error reports a programming-contract violation rather
    /// than a runtime condition.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, CacheError::UnsupportedOperation(_))
    }
}
