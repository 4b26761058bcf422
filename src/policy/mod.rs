//! Governance policy identity and inheritance.
//!
//! Every policy object carries a [`PolicyId`]: a canonical `uri`, a CRC32 `id` derived
//! from it, and a tag map. Policies at narrower scopes (method) inherit unset fields from
//! broader scopes (service, registry defaults) through [`PolicyInherit`]. Merging happens
//! once, when a policy is published, never on the call path.
//!
//! ```rust
//! use lanegov::policy::{FailoverPolicy, PolicyInherit};
//!
//! let mut method = FailoverPolicy { retry: None, timeout_in_milliseconds: Some(500), ..Default::default() };
//! let service = FailoverPolicy { retry: Some(3), timeout_in_milliseconds: Some(1000), ..Default::default() };
//! method.supplement(Some(&service));
//! assert_eq!(method.retry, Some(3));
//! assert_eq!(method.timeout_in_milliseconds, Some(500));
//! ```

pub mod failover;
pub mod registry;
pub mod retry;
pub mod service;

pub use failover::FailoverPolicy;
pub use registry::PolicyRegistry;
pub use retry::RetryPolicy;
pub use service::{MethodPolicy, ServicePolicy};

use std::collections::HashMap;

pub const KEY_SERVICE_NAME: &str = "service.name";
pub const KEY_SERVICE_GROUP: &str = "service.group";
pub const KEY_SERVICE_PATH: &str = "service.path";
pub const KEY_SERVICE_METHOD: &str = "service.method";
pub const KEY_SERVICE_VARIABLE: &str = "service.variable";
pub const KEY_SERVICE_LANE_SPACE_ID: &str = "service.laneSpaceId";
pub const KEY_SERVICE_CONCURRENCY_LIMIT: &str = "service.concurrencyLimit";
pub const KEY_SERVICE_RATE_LIMIT: &str = "service.rateLimit";
pub const KEY_SERVICE_ROUTE: &str = "service.route";
pub const KEY_SERVICE_CIRCUIT_BREAKER: &str = "service.circuitBreaker";

/// Group name that is omitted from service uris.
pub const DEFAULT_GROUP: &str = "default";

/// CRC32 of the UTF-8 bytes of `value`, as a non-negative id.
pub fn crc_id(value: &str) -> u64 {
    u64::from(crc32fast::hash(value.as_bytes()))
}

/// Identity of a policy object: derived id, canonical uri and tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PolicyId {
    id: Option<u64>,
    #[cfg_attr(feature = "serde", serde(skip))]
    uri: Option<String>,
    tags: Option<HashMap<String, String>>,
}

impl PolicyId {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity whose uri is already known; the id is derived immediately.
    pub fn with_uri(uri: impl Into<String>) -> Self {
        let mut id = Self::default();
        id.supplement(|| uri.into(), None);
        id
    }

    pub fn id(&self) -> Option<u64> {
        self.id
    }

    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    pub fn tags(&self) -> Option<&HashMap<String, String>> {
        self.tags.as_ref()
    }

    /// Fill in `uri` (first writer wins), derive `id` once the uri is known, and
    /// replace `tags` wholesale (last writer wins).
    pub fn supplement<F>(&mut self, uri: F, tags: Option<HashMap<String, String>>)
    where
        F: FnOnce() -> String,
    {
        if self.uri.is_none() {
            self.uri = Some(uri());
        }
        if self.id.is_none() {
            self.id = self.uri.as_deref().map(crc_id);
        }
        self.tags = tags;
    }

    /// Derive a secondary id for a sub-resource keyed off this policy.
    ///
    /// Hashes `uri + extra` (or `extra` alone when no uri is set); an empty combined
    /// string yields 0.
    pub fn generate_id(&self, extra: &str) -> u64 {
        let combined = match &self.uri {
            Some(uri) => format!("{uri}{extra}"),
            None => extra.to_string(),
        };
        if combined.is_empty() {
            0
        } else {
            crc_id(&combined)
        }
    }

    /// Tag value for `key`.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.as_ref().and_then(|tags| tags.get(key)).map(String::as_str)
    }

    /// Copy of the tags extended with `pairs`; later pairs override existing keys.
    pub fn supplement_tags(&self, pairs: &[(&str, &str)]) -> HashMap<String, String> {
        let mut result = self.tags.clone().unwrap_or_default();
        for (key, value) in pairs {
            result.insert((*key).to_string(), (*value).to_string());
        }
        result
    }
}

/// Inherit unset fields from a broader-scope policy.
///
/// `target.supplement(Some(&source))` fills every `None` field of `target` from
/// `source` and leaves every set field untouched.
pub trait PolicyInherit {
    fn supplement(&mut self, source: Option<&Self>);
}

/// Implement [`PolicyInherit`] by coalescing the listed `Option` fields.
macro_rules! inherit_fields {
    ($ty:ty { $($field:ident),+ $(,)? }) => {
        impl $crate::policy::PolicyInherit for $ty {
            fn supplement(&mut self, source: Option<&Self>) {
                let Some(source) = source else {
                    return;
                };
                $(
                    if self.$field.is_none() {
                        self.$field = source.$field.clone();
                    }
                )+
            }
        }
    };
}

pub(crate) use inherit_fields;

/// Merge an optional sub-policy from a broader scope into `target`.
///
/// A missing target takes a copy of the source; a present one inherits field by field.
pub(crate) fn inherit_option<P>(target: &mut Option<P>, source: Option<&P>)
where
    P: PolicyInherit + Clone,
{
    match (target.as_mut(), source) {
        (Some(policy), source) => policy.supplement(source),
        (None, Some(source)) => *target = Some(source.clone()),
        (None, None) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_crc32_of_uri() {
        let uri = "service://order-service/placeOrder";
        let mut policy = PolicyId::new();
        policy.supplement(|| uri.to_string(), None);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(uri.as_bytes());
        assert_eq!(policy.id(), Some(u64::from(hasher.finalize())));
        assert_eq!(policy.uri(), Some(uri));
    }

    #[test]
    fn supplement_is_idempotent_and_first_writer_wins() {
        let mut policy = PolicyId::new();
        policy.supplement(|| "service://a".to_string(), None);
        let first = policy.id();

        policy.supplement(|| "service://a".to_string(), None);
        assert_eq!(policy.id(), first);

        policy.supplement(|| "service://b".to_string(), None);
        assert_eq!(policy.uri(), Some("service://a"));
        assert_eq!(policy.id(), first);
    }

    #[test]
    fn supplement_replaces_tags_wholesale() {
        let mut policy = PolicyId::new();
        let mut tags = HashMap::new();
        tags.insert(KEY_SERVICE_NAME.to_string(), "order".to_string());
        policy.supplement(|| "service://order".into(), Some(tags));
        assert_eq!(policy.tag(KEY_SERVICE_NAME), Some("order"));

        policy.supplement(|| unreachable!("uri already set"), None);
        assert_eq!(policy.tag(KEY_SERVICE_NAME), None);
    }

    #[test]
    fn generate_id_combines_uri_and_extra() {
        let policy = PolicyId::with_uri("service://order");
        assert_eq!(policy.generate_id("/placeOrder"), crc_id("service://order/placeOrder"));
        assert_ne!(policy.generate_id("/a"), policy.generate_id("/b"));

        let bare = PolicyId::new();
        assert_eq!(bare.generate_id("/x"), crc_id("/x"));
        assert_eq!(bare.generate_id(""), 0);
    }

    #[test]
    fn supplement_tags_extends_copy() {
        let mut policy = PolicyId::new();
        policy.supplement(
            || "service://order".into(),
            Some(HashMap::from([(KEY_SERVICE_NAME.to_string(), "order".to_string())])),
        );
        let tags = policy.supplement_tags(&[(KEY_SERVICE_METHOD, "placeOrder")]);
        assert_eq!(tags.len(), 2);
        assert_eq!(policy.tags().map(HashMap::len), Some(1));
    }

    #[test]
    fn inherit_option_copies_or_merges() {
        let source = FailoverPolicy { retry: Some(2), ..Default::default() };
        let mut missing: Option<FailoverPolicy> = None;
        inherit_option(&mut missing, Some(&source));
        assert_eq!(missing.as_ref().and_then(|p| p.retry), Some(2));

        let mut partial =
            Some(FailoverPolicy { timeout_in_milliseconds: Some(10), ..Default::default() });
        inherit_option(&mut partial, Some(&source));
        let partial = partial.unwrap();
        assert_eq!(partial.retry, Some(2));
        assert_eq!(partial.timeout_in_milliseconds, Some(10));
    }
}
