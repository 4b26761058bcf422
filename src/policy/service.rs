//! Service and method scoped governance policies.
//!
//! A [`ServicePolicy`] carries service-wide sub-policies and an ordered list of
//! [`MethodPolicy`] rules. When published, every method rule inherits unset fields from
//! its service, and the service inherits from the registry [`PolicyDefaults`].
//!
//! Attempt and time limits declared on a scope's [`RetryPolicy`] are folded into that
//! scope's [`FailoverPolicy`] before inheriting, so the closest scope wins regardless
//! of which sub-policy carried the limit.

use crate::circuit_breaker::CircuitBreakerPolicy;
use crate::policy::{
    inherit_option, FailoverPolicy, PolicyId, RetryPolicy, DEFAULT_GROUP, KEY_SERVICE_GROUP,
    KEY_SERVICE_METHOD, KEY_SERVICE_NAME,
};
use crate::request::ServiceRequest;
use crate::tag::{TagCondition, TagProviderRegistry};
use std::collections::HashMap;
use std::time::Duration;

/// Method name that matches every method of a service.
pub const WILDCARD_METHOD: &str = "*";

const SUFFIX_FAILOVER: &str = "#failover";
const SUFFIX_RETRY: &str = "#retry";
const SUFFIX_CIRCUIT_BREAKER: &str = "#circuitBreaker";

/// Registry-wide fallbacks applied beneath every service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct PolicyDefaults {
    pub failover: Option<FailoverPolicy>,
    pub retry: Option<RetryPolicy>,
    pub circuit_breaker: Option<CircuitBreakerPolicy>,
}

/// Policy for one method (or every method, when named `*`), optionally narrowed by tag
/// conditions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct MethodPolicy {
    pub name: String,
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub id: PolicyId,
    /// All conditions must hold for the rule to apply.
    pub conditions: Vec<TagCondition>,
    pub failover: Option<FailoverPolicy>,
    pub retry: Option<RetryPolicy>,
    pub circuit_breaker: Option<CircuitBreakerPolicy>,
}

impl MethodPolicy {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    /// Rule for every method of a service.
    pub fn wildcard() -> Self {
        Self::new(WILDCARD_METHOD)
    }

    pub fn with_condition(mut self, condition: TagCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_failover(mut self, failover: FailoverPolicy) -> Self {
        self.failover = Some(failover);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreakerPolicy) -> Self {
        self.circuit_breaker = Some(circuit_breaker);
        self
    }

    pub fn is_wildcard(&self) -> bool {
        self.name == WILDCARD_METHOD
    }

    /// Whether every tag condition holds for `request`.
    pub fn matches(&self, request: &dyn ServiceRequest, tags: &TagProviderRegistry) -> bool {
        self.conditions.iter().all(|condition| condition.matches(request, tags))
    }

    /// Additional attempts allowed. Within one scope failover wins over the retry
    /// policy; unset means 0.
    pub fn max_retries(&self) -> u32 {
        self.failover
            .as_ref()
            .and_then(|f| f.retry)
            .or_else(|| self.retry.as_ref().and_then(|r| r.retry))
            .unwrap_or(0)
    }

    /// Total wall-clock budget across attempts.
    pub fn timeout(&self) -> Option<Duration> {
        self.failover
            .as_ref()
            .and_then(FailoverPolicy::timeout)
            .or_else(|| self.retry.as_ref().and_then(|r| r.timeout).map(Duration::from_millis))
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry.as_ref().map(RetryPolicy::interval).unwrap_or_default()
    }

    pub fn uri(&self) -> Option<&str> {
        self.id.uri()
    }

    fn inherit(&mut self, service: &ServicePolicy) {
        inherit_option(&mut self.failover, service.failover.as_ref());
        inherit_option(&mut self.retry, service.retry.as_ref());
        inherit_option(&mut self.circuit_breaker, service.circuit_breaker.as_ref());
    }
}

/// Policy for one service (and group).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct ServicePolicy {
    pub name: String,
    pub group: Option<String>,
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub id: PolicyId,
    pub failover: Option<FailoverPolicy>,
    pub retry: Option<RetryPolicy>,
    pub circuit_breaker: Option<CircuitBreakerPolicy>,
    /// Method rules, evaluated in order.
    pub methods: Vec<MethodPolicy>,
}

impl ServicePolicy {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_failover(mut self, failover: FailoverPolicy) -> Self {
        self.failover = Some(failover);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreakerPolicy) -> Self {
        self.circuit_breaker = Some(circuit_breaker);
        self
    }

    pub fn with_method(mut self, method: MethodPolicy) -> Self {
        self.methods.push(method);
        self
    }

    /// Canonical service uri; the default group is omitted.
    pub fn uri(name: &str, group: Option<&str>) -> String {
        match group.filter(|g| !g.is_empty() && *g != DEFAULT_GROUP) {
            Some(group) => format!("service://{name}?group={group}"),
            None => format!("service://{name}"),
        }
    }

    /// Canonical uri of one method of this service.
    pub fn method_uri(&self, method: &str) -> String {
        match self.effective_group() {
            Some(group) => format!("service://{}/{method}?group={group}", self.name),
            None => format!("service://{}/{method}", self.name),
        }
    }

    /// Registry key of this service.
    pub fn key(&self) -> String {
        Self::uri(&self.name, self.group.as_deref())
    }

    fn effective_group(&self) -> Option<&str> {
        self.group.as_deref().filter(|g| !g.is_empty() && *g != DEFAULT_GROUP)
    }

    /// Merge defaults into the service and the service into each method, assigning
    /// uris, ids and tags along the way.
    pub(crate) fn resolve(mut self, defaults: &PolicyDefaults) -> Self {
        let uri = self.key();
        let mut tags = HashMap::from([(KEY_SERVICE_NAME.to_string(), self.name.clone())]);
        if let Some(group) = self.effective_group() {
            tags.insert(KEY_SERVICE_GROUP.to_string(), group.to_string());
        }
        let declared = self.id.tags().cloned().unwrap_or_default();
        tags.extend(declared);
        self.id.supplement(|| uri, Some(tags));

        let mut defaults = defaults.clone();
        fold_limits(&mut defaults.failover, defaults.retry.as_ref());
        fold_limits(&mut self.failover, self.retry.as_ref());
        inherit_option(&mut self.failover, defaults.failover.as_ref());
        inherit_option(&mut self.retry, defaults.retry.as_ref());
        inherit_option(&mut self.circuit_breaker, defaults.circuit_breaker.as_ref());
        assign_sub_ids(&self.id, &mut self.failover, &mut self.retry, &mut self.circuit_breaker);

        let mut methods = std::mem::take(&mut self.methods);
        for method in &mut methods {
            let uri = self.method_uri(&method.name);
            let pairs = [(KEY_SERVICE_METHOD, method.name.as_str())];
            let mut tags = self.id.supplement_tags(&pairs);
            tags.extend(method.id.tags().cloned().unwrap_or_default());
            method.id.supplement(|| uri, Some(tags));
            fold_limits(&mut method.failover, method.retry.as_ref());
            method.inherit(&self);
            assign_sub_ids(&method.id, &mut method.failover, &mut method.retry, &mut method.circuit_breaker);
        }
        self.methods = methods;
        self
    }

    /// Service-scope rule used when no method rule applies.
    pub(crate) fn scope(&self) -> MethodPolicy {
        MethodPolicy {
            name: WILDCARD_METHOD.to_string(),
            id: self.id.clone(),
            conditions: Vec::new(),
            failover: self.failover.clone(),
            retry: self.retry.clone(),
            circuit_breaker: self.circuit_breaker.clone(),
        }
    }
}

/// Copy limits declared on `retry` into the same scope's failover policy.
fn fold_limits(failover: &mut Option<FailoverPolicy>, retry: Option<&RetryPolicy>) {
    let Some(retry) = retry.filter(|r| r.retry.is_some() || r.timeout.is_some()) else {
        return;
    };
    let failover = failover.get_or_insert_with(FailoverPolicy::default);
    if failover.retry.is_none() {
        failover.retry = retry.retry;
    }
    if failover.timeout_in_milliseconds.is_none() {
        failover.timeout_in_milliseconds = retry.timeout;
    }
}

fn assign_sub_ids(
    owner: &PolicyId,
    failover: &mut Option<FailoverPolicy>,
    retry: &mut Option<RetryPolicy>,
    circuit_breaker: &mut Option<CircuitBreakerPolicy>,
) {
    if let Some(policy) = failover.as_mut() {
        policy.id.get_or_insert_with(|| owner.generate_id(SUFFIX_FAILOVER));
    }
    if let Some(policy) = retry.as_mut() {
        policy.id.get_or_insert_with(|| owner.generate_id(SUFFIX_RETRY));
    }
    if let Some(policy) = circuit_breaker.as_mut() {
        policy.id.get_or_insert_with(|| owner.generate_id(SUFFIX_CIRCUIT_BREAKER));
    }
}
