//! Published policies with lock-free reads.
//!
//! Writers replace the whole snapshot; readers load an `Arc` without locking. Merging
//! across scopes happens at publish time so resolution on the call path is a lookup plus
//! tag condition checks.

use crate::error::GovernanceError;
use crate::policy::service::{MethodPolicy, PolicyDefaults, ServicePolicy};
use crate::request::ServiceRequest;
use crate::tag::TagProviderRegistry;
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug)]
struct ResolvedService {
    policy: Arc<ServicePolicy>,
    scope: Arc<MethodPolicy>,
    methods: Vec<Arc<MethodPolicy>>,
}

impl ResolvedService {
    fn new(declared: ServicePolicy, defaults: &PolicyDefaults) -> Self {
        let policy = declared.resolve(defaults);
        let scope = Arc::new(policy.scope());
        let methods = policy.methods.iter().cloned().map(Arc::new).collect();
        Self { policy: Arc::new(policy), scope, methods }
    }

    /// Exact method rules first, then wildcard rules, then the service scope.
    fn select(&self, request: &dyn ServiceRequest, tags: &TagProviderRegistry) -> Arc<MethodPolicy> {
        let method = request.method();
        let exact = self
            .methods
            .iter()
            .filter(|m| !m.is_wildcard() && Some(m.name.as_str()) == method)
            .find(|m| m.matches(request, tags));
        let chosen = exact.or_else(|| {
            self.methods.iter().filter(|m| m.is_wildcard()).find(|m| m.matches(request, tags))
        });
        chosen.cloned().unwrap_or_else(|| self.scope.clone())
    }
}

#[derive(Debug, Default, Clone)]
struct PolicySnapshot {
    defaults: PolicyDefaults,
    declared: HashMap<String, ServicePolicy>,
    services: HashMap<String, Arc<ResolvedService>>,
}

/// Registry of service policies keyed by service uri.
#[derive(Debug, Clone)]
pub struct PolicyRegistry {
    inner: Arc<ArcSwap<PolicySnapshot>>,
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self { inner: Arc::new(ArcSwap::from_pointee(PolicySnapshot::default())) }
    }
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose services inherit from `defaults`.
    pub fn with_defaults(defaults: PolicyDefaults) -> Self {
        let registry = Self::default();
        registry.set_defaults(defaults);
        registry
    }

    /// Publish or replace a service policy. Returns the merged policy.
    pub fn publish(&self, policy: ServicePolicy) -> Arc<ServicePolicy> {
        let key = policy.key();
        let previous = self.inner.rcu(|current| {
            let mut next = PolicySnapshot::clone(current);
            let resolved = ResolvedService::new(policy.clone(), &next.defaults);
            next.declared.insert(key.clone(), policy.clone());
            next.services.insert(key.clone(), Arc::new(resolved));
            next
        });
        let replaced = previous.services.contains_key(&key);
        tracing::info!(target: "lanegov::policy", uri = %key, replaced, "service policy published");
        self.inner
            .load()
            .services
            .get(&key)
            .map(|resolved| resolved.policy.clone())
            .unwrap_or_else(|| Arc::new(policy.resolve(&PolicyDefaults::default())))
    }

    /// Replace the registry defaults and re-merge every published service.
    pub fn set_defaults(&self, defaults: PolicyDefaults) {
        self.inner.rcu(|current| {
            let services = current
                .declared
                .iter()
                .map(|(key, declared)| {
                    (key.clone(), Arc::new(ResolvedService::new(declared.clone(), &defaults)))
                })
                .collect();
            PolicySnapshot { defaults: defaults.clone(), declared: current.declared.clone(), services }
        });
        tracing::debug!(target: "lanegov::policy", "policy defaults replaced");
    }

    pub fn defaults(&self) -> PolicyDefaults {
        self.inner.load().defaults.clone()
    }

    /// Remove a service policy, returning the merged policy that was published.
    pub fn remove(&self, service: &str, group: Option<&str>) -> Option<Arc<ServicePolicy>> {
        let key = ServicePolicy::uri(service, group);
        let previous = self.inner.rcu(|current| {
            let mut next = PolicySnapshot::clone(current);
            next.declared.remove(&key);
            next.services.remove(&key);
            next
        });
        previous.services.get(&key).map(|resolved| resolved.policy.clone())
    }

    /// Merged policy of a service.
    pub fn get(&self, service: &str, group: Option<&str>) -> Option<Arc<ServicePolicy>> {
        let key = ServicePolicy::uri(service, group);
        self.inner.load().services.get(&key).map(|resolved| resolved.policy.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.load().services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Policy that applies to `request`.
    ///
    /// # Errors
    ///
    /// [`GovernanceError::PolicyNotFound`] when no policy is published for the
    /// request's service and group.
    pub fn resolve(
        &self,
        request: &dyn ServiceRequest,
        tags: &TagProviderRegistry,
    ) -> Result<Arc<MethodPolicy>, GovernanceError> {
        let key = ServicePolicy::uri(request.service(), request.group());
        let snapshot = self.inner.load();
        match snapshot.services.get(&key) {
            Some(resolved) => Ok(resolved.select(request, tags)),
            None => Err(GovernanceError::PolicyNotFound { uri: key }),
        }
    }
}
