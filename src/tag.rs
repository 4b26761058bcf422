//! Named extractors that derive tag values from a request.
//!
//! Policies select method rules through [`TagCondition`]s; each condition names a
//! provider registered in a [`TagProviderRegistry`]. Providers are total: when a request
//! does not expose an attribute they return `None`, never an error.

use crate::request::{RequestKind, ServiceRequest};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::warn;

/// Name of the built-in client ip provider.
pub const TAG_CLIENT_IP: &str = "clientIp";

/// Derives tag values from a request.
pub trait TagProvider: Send + Sync {
    fn values(&self, request: &dyn ServiceRequest) -> Option<Vec<String>>;
}

impl<F> TagProvider for F
where
    F: Fn(&dyn ServiceRequest) -> Option<Vec<String>> + Send + Sync,
{
    fn values(&self, request: &dyn ServiceRequest) -> Option<Vec<String>> {
        self(request)
    }
}

/// Client address of inbound requests. Outbound requests yield `None`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClientIpTagProvider;

impl TagProvider for ClientIpTagProvider {
    fn values(&self, request: &dyn ServiceRequest) -> Option<Vec<String>> {
        match request.kind() {
            RequestKind::Inbound => request.client_ip().map(|ip| vec![ip.to_string()]),
            RequestKind::Outbound => None,
        }
    }
}

/// Value of a named request header.
#[derive(Debug, Clone)]
pub struct HeaderTagProvider {
    header: String,
}

impl HeaderTagProvider {
    pub fn new(header: impl Into<String>) -> Self {
        Self { header: header.into() }
    }
}

impl TagProvider for HeaderTagProvider {
    fn values(&self, request: &dyn ServiceRequest) -> Option<Vec<String>> {
        request.header(&self.header).map(|v| vec![v.to_string()])
    }
}

/// Providers looked up by name.
#[derive(Clone)]
pub struct TagProviderRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<dyn TagProvider>>>>,
}

impl std::fmt::Debug for TagProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagProviderRegistry").field("names", &self.names()).finish()
    }
}

impl Default for TagProviderRegistry {
    /// Registry preloaded with the system providers.
    fn default() -> Self {
        let registry = Self::empty();
        registry.register(TAG_CLIENT_IP, ClientIpTagProvider);
        registry
    }
}

impl TagProviderRegistry {
    /// Registry with no providers.
    pub fn empty() -> Self {
        Self { inner: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Register a provider; the last registration for a name wins.
    pub fn register<P>(&self, name: impl Into<String>, provider: P)
    where
        P: TagProvider + 'static,
    {
        let name = name.into();
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if map.contains_key(&name) {
            warn!(target: "lanegov::tag", name = %name, "tag provider replaced; last registration wins");
        }
        map.insert(name, Arc::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TagProvider>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).get(name).cloned()
    }

    /// Values produced by the named provider, `None` when it is missing or has no value.
    pub fn values(&self, name: &str, request: &dyn ServiceRequest) -> Option<Vec<String>> {
        self.get(name).and_then(|provider| provider.values(request))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.inner.read().unwrap_or_else(|e| e.into_inner()).keys().cloned().collect();
        names.sort();
        names
    }
}

/// Comparison applied by a [`TagCondition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub enum MatchOp {
    #[default]
    Equal,
    NotEqual,
    In,
    NotIn,
    Prefix,
}

/// Predicate over the values of one tag provider.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct TagCondition {
    /// Provider name.
    pub key: String,
    #[cfg_attr(feature = "serde", serde(rename = "opType"))]
    pub op: MatchOp,
    pub values: Vec<String>,
}

impl TagCondition {
    pub fn new(key: impl Into<String>, op: MatchOp, values: &[&str]) -> Self {
        Self { key: key.into(), op, values: values.iter().map(|v| v.to_string()).collect() }
    }

    /// Evaluate against a request. A missing provider or `None` counts as no values.
    pub fn matches(&self, request: &dyn ServiceRequest, tags: &TagProviderRegistry) -> bool {
        let actual = tags.values(&self.key, request).unwrap_or_default();
        self.test(&actual)
    }

    fn test(&self, actual: &[String]) -> bool {
        let contains = || actual.iter().any(|v| self.values.contains(v));
        match self.op {
            MatchOp::Equal => match (actual.first(), self.values.first()) {
                (Some(value), Some(expected)) => value == expected,
                _ => false,
            },
            MatchOp::NotEqual => match (actual.first(), self.values.first()) {
                (Some(value), Some(expected)) => value != expected,
                _ => true,
            },
            MatchOp::In => contains(),
            MatchOp::NotIn => !contains(),
            MatchOp::Prefix => {
                actual.iter().any(|v| self.values.iter().any(|prefix| v.starts_with(prefix.as_str())))
            }
        }
    }
}
