//! Region key namespacing
//!
//! Maps a region name to the namespace its entries occupy in the shared
//! store. Multi-tenant deployments that share one store can scope every
//! region by the active tenant.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::CacheError;

/// Strategy that resolves the store namespace of a region.
pub trait KeyNamespace: Send + Sync + 'static {
    fn resolve(&self, region_name: &str) -> String;
}

/// Uses the region name unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegionNamespace;

impl KeyNamespace for RegionNamespace {
    fn resolve(&self, region_name: &str) -> String {
        region_name.to_owned()
    }
}

/// Prepends a fixed prefix: `<prefix>.<region>`.
#[derive(Debug, Clone)]
pub struct PrefixedNamespace {
    prefix: String,
}

impl PrefixedNamespace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl KeyNamespace for PrefixedNamespace {
    fn resolve(&self, region_name: &str) -> String {
        format!("{}.{}", self.prefix, region_name)
    }
}

/// Scopes regions by the tenant returned from a host-supplied resolver.
///
/// The resolver is called on every cache operation; when it yields `None`
/// the region name is used as-is.
pub struct TenantNamespace<F> {
    resolver: F,
}

impl<F> TenantNamespace<F>
where
    F: Fn() -> Option<String> + Send + Sync + 'static,
{
    pub fn new(resolver: F) -> Self {
        Self { resolver }
    }
}

impl<F> KeyNamespace for TenantNamespace<F>
where
    F: Fn() -> Option<String> + Send + Sync + 'static,
{
    fn resolve(&self, region_name: &str) -> String {
        match (self.resolver)() {
            Some(tenant) => format!("{tenant}.{region_name}"),
            None => region_name.to_owned(),
        }
    }
}

/// Namespacing strategies selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceKind {
    Region,
    Prefixed,
}

impl FromStr for NamespaceKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "region" | "none" => Ok(NamespaceKind::Region),
            "prefixed" | "prefix" => Ok(NamespaceKind::Prefixed),
            other => Err(CacheError::InvalidConfiguration(format!(
                "unknown key namespace strategy '{other}'"
            ))),
        }
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamespaceKind::Region => f.write_str("region"),
            NamespaceKind::Prefixed => f.write_str("prefixed"),
        }
    }
}

impl NamespaceKind {
    pub fn build(self, prefix: Option<&str>) -> Result<Arc<dyn KeyNamespace>, CacheError> {
        match self {
            NamespaceKind::Region => Ok(Arc::new(RegionNamespace)),
            NamespaceKind::Prefixed => match prefix {
                Some(prefix) if !prefix.is_empty() => Ok(Arc::new(PrefixedNamespace::new(prefix))),
                _ => Err(CacheError::InvalidConfiguration(
                    "prefixed key namespace requires region_prefix".to_owned(),
                )),
            },
        }
    }
}
