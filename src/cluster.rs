//! Retry and failover orchestration.
//!
//! A [`ClusterInvoker`] drives one governed call through
//! `Electing → Invoking → Classifying → {Done | Retrying}`:
//!
//! - **Electing** asks the [`Cluster`] adapter for its current candidates, applies the
//!   route chain, drops endpoints with open circuits, prefers endpoints not tried yet in
//!   this call, and lets the [`Picker`] choose.
//! - **Invoking** awaits [`Cluster::invoke`]; transport failures come back inside the
//!   [`ClusterResponse`].
//! - **Classifying** ends on success or on a non-retryable failure.
//! - **Retrying** continues while attempts remain (`retry` extra attempts) and the
//!   elapsed time plus the retry interval fits the timeout.
//!
//! When the budget is spent the last response is returned verbatim, so callers see the
//! same shape they would with retries disabled. Configuration errors (route failure,
//! empty pool, policy missing) end the call at once.
//!
//! ```rust
//! use async_trait::async_trait;
//! use lanegov::cluster::{Cluster, ClusterInvoker};
//! use lanegov::endpoint::{EndpointRef, SimpleEndpoint};
//! use lanegov::error::GovernanceError;
//! use lanegov::location::Location;
//! use lanegov::policy::{FailoverPolicy, MethodPolicy};
//! use lanegov::request::SimpleRequest;
//! use lanegov::response::ClusterResponse;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Cluster for Echo {
//!     type Request = SimpleRequest;
//!     type Output = String;
//!
//!     async fn route(&self, _request: &SimpleRequest) -> Result<Vec<EndpointRef>, GovernanceError> {
//!         Ok(vec![SimpleEndpoint::new("10.0.0.1", 8080).shared()])
//!     }
//!
//!     async fn invoke(&self, _request: &SimpleRequest, endpoint: &EndpointRef) -> ClusterResponse<String> {
//!         ClusterResponse::success(endpoint.address())
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let invoker = ClusterInvoker::builder().location(Location::default()).build().unwrap();
//! let policy = MethodPolicy::wildcard().with_failover(FailoverPolicy { retry: Some(2), ..Default::default() });
//! let response = invoker.invoke(&Echo, &SimpleRequest::outbound("echo"), &policy, None).await;
//! assert_eq!(response.result().map(String::as_str), Some("10.0.0.1:8080"));
//! # }
//! ```

use crate::balancer::LoadBalancer;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerPolicy, CircuitBreakerRegistry, CircuitPermit};
use crate::endpoint::EndpointRef;
use crate::error::{BuildError, GovernanceError, ServiceError};
use crate::location::Location;
use crate::picker::{AdviceFailureMode, ElectionAdvice, Picker};
use crate::policy::{MethodPolicy, RetryPolicy};
use crate::request::ServiceRequest;
use crate::response::ClusterResponse;
use crate::route::{RouteChain, RouteContext};
use crate::telemetry::{
    emit_best_effort, ElectionEvent, GovernanceEvent, NullSink, RequestOutcome, RetryEvent, TelemetrySink,
};
use crate::time::{Clock, MonotonicClock, Sleeper, TokioSleeper};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// Adapter seam between the orchestrator and a concrete transport.
#[async_trait]
pub trait Cluster: Send + Sync {
    type Request: ServiceRequest;
    type Output: Send;

    /// Current candidate snapshot. Return [`GovernanceError::Route`] when the adapter
    /// cannot produce one.
    async fn route(&self, request: &Self::Request) -> Result<Vec<EndpointRef>, GovernanceError>;

    /// One attempt against `endpoint`. Failures are captured in the response.
    async fn invoke(&self, request: &Self::Request, endpoint: &EndpointRef) -> ClusterResponse<Self::Output>;

    fn is_retryable(&self, response: &ClusterResponse<Self::Output>, policy: Option<&RetryPolicy>) -> bool {
        response.is_retryable(policy)
    }

    fn on_success(&self, _request: &Self::Request, _endpoint: &EndpointRef) {}

    fn on_failure(&self, _request: &Self::Request, _endpoint: &EndpointRef, _error: &ServiceError) {}
}

struct Elected {
    endpoint: EndpointRef,
    breaker: Option<CircuitBreaker>,
}

/// Retry/failover orchestrator. Cheap to share behind an `Arc`.
#[derive(Debug, Clone)]
pub struct ClusterInvoker<S = NullSink> {
    location: Arc<Location>,
    routes: RouteChain,
    picker: Picker,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    breakers: Option<CircuitBreakerRegistry>,
    sink: S,
}

impl ClusterInvoker<NullSink> {
    pub fn builder() -> ClusterInvokerBuilder<NullSink> {
        ClusterInvokerBuilder::new()
    }
}

impl<S> ClusterInvoker<S> {
    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn picker(&self) -> &Picker {
        &self.picker
    }

    pub fn circuit_breakers(&self) -> Option<&CircuitBreakerRegistry> {
        self.breakers.as_ref()
    }
}

impl<S> ClusterInvoker<S>
where
    S: TelemetrySink,
    S::Future: Send + 'static,
{
    /// Run one governed call under `policy`.
    ///
    /// Always yields a terminal response; dropping the future abandons the call without
    /// further attempts.
    pub async fn invoke<C>(
        &self,
        cluster: &C,
        request: &C::Request,
        policy: &MethodPolicy,
        advice: Option<&dyn ElectionAdvice>,
    ) -> ClusterResponse<C::Output>
    where
        C: Cluster,
    {
        let budget = Budget::new(policy, self.clock.now_millis());
        let breaker_policy = policy.circuit_breaker.as_ref();

        let mut tried: Vec<String> = Vec::new();
        let mut last: Option<ClusterResponse<C::Output>> = None;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let elected = match self.elect(cluster, request, advice, &tried, breaker_policy).await {
                Ok(elected) => elected,
                Err(err) => {
                    let response = match last.take() {
                        Some(previous) => {
                            tracing::debug!(
                                service = request.service(),
                                attempt,
                                error = %err,
                                "election failed on retry; returning last failure"
                            );
                            previous
                        }
                        None => {
                            tracing::warn!(service = request.service(), error = %err, "election failed");
                            ClusterResponse::failure(err)
                        }
                    };
                    let attempts = attempt.saturating_sub(1).max(1);
                    return self.finish(response, budget.started, attempts, false).await;
                }
            };

            let endpoint = elected.endpoint;
            let address = endpoint.address();
            if !tried.contains(&address) {
                tried.push(address.clone());
            }
            self.emit(GovernanceEvent::Election(ElectionEvent::Elected {
                service: request.service().to_string(),
                endpoint: address.clone(),
                attempt,
            }))
            .await;

            let (response, permit) = match elected.breaker.as_ref().map(CircuitBreaker::try_acquire).transpose() {
                // Raced with the breaker opening; classified like any other failure.
                Err(rejected) => (ClusterResponse::failure(rejected), None),
                Ok(permit) => {
                    let span =
                        tracing::debug_span!("attempt", service = request.service(), attempt, endpoint = %address);
                    let response = cluster.invoke(request, &endpoint).instrument(span).await;
                    if response.is_success() {
                        if let Some(permit) = permit {
                            permit.success();
                        }
                        cluster.on_success(request, &endpoint);
                        return self.finish(response, budget.started, attempt, false).await;
                    }
                    (response, permit)
                }
            };

            let retryable = cluster.is_retryable(&response, policy.retry.as_ref());
            record(permit, retryable);
            if let Some(error) = response.error() {
                cluster.on_failure(request, &endpoint, error);
                tracing::debug!(
                    service = request.service(),
                    attempt,
                    endpoint = %address,
                    retryable,
                    error = %error,
                    "attempt failed"
                );
            }

            if !retryable {
                return self.finish(response, budget.started, attempt, false).await;
            }
            if !budget.allows_retry(attempt, self.clock.now_millis()) {
                let exhausted = budget.max_retries > 0;
                return self.finish(response, budget.started, attempt, exhausted).await;
            }
            self.emit(GovernanceEvent::Retry(RetryEvent::Attempt { attempt, delay: budget.interval })).await;
            if !budget.interval.is_zero() {
                self.sleeper.sleep(budget.interval).await;
            }
            last = Some(response);
        }
    }

    async fn elect<C>(
        &self,
        cluster: &C,
        request: &C::Request,
        advice: Option<&dyn ElectionAdvice>,
        tried: &[String],
        breaker_policy: Option<&CircuitBreakerPolicy>,
    ) -> Result<Elected, GovernanceError>
    where
        C: Cluster,
    {
        let snapshot = cluster.route(request).await?;
        let ctx = RouteContext::new(&self.location, request);
        let routed = self.routes.apply(&ctx, &snapshot);
        if routed.is_empty() {
            return Err(GovernanceError::NoEndpoint { service: request.service().to_string() });
        }

        let available: Vec<EndpointRef> = routed
            .iter()
            .filter(|e| !self.is_open(request.service(), e, breaker_policy))
            .cloned()
            .collect();
        if available.is_empty() {
            return Err(GovernanceError::CircuitOpen { key: request.service().to_string() });
        }

        let fresh: Vec<EndpointRef> =
            available.iter().filter(|e| !tried.contains(&e.address())).cloned().collect();
        let candidates = if fresh.is_empty() { available } else { fresh };

        let (result, advice_failure) = self.picker.elect(request, &candidates, advice);
        if let Some(err) = advice_failure {
            self.emit(GovernanceEvent::Election(ElectionEvent::AdviceFailed { message: err.message().to_string() }))
                .await;
        }
        let endpoint = result.into_result()?;
        let breaker = self.breaker_for(request.service(), &endpoint, breaker_policy, &snapshot);
        Ok(Elected { endpoint, breaker })
    }

    /// Whether an existing breaker currently rejects `endpoint`. Endpoints without a
    /// breaker yet count as available.
    fn is_open(&self, service: &str, endpoint: &EndpointRef, policy: Option<&CircuitBreakerPolicy>) -> bool {
        match (self.breakers.as_ref(), policy) {
            (Some(registry), Some(_)) => registry
                .get(&CircuitBreakerRegistry::key(service, &endpoint.address()))
                .is_some_and(|breaker| !breaker.is_available()),
            _ => false,
        }
    }

    /// Breaker of the elected endpoint, created on first election. Creating one drops
    /// the service's breakers for endpoints missing from `snapshot`.
    fn breaker_for(
        &self,
        service: &str,
        endpoint: &EndpointRef,
        policy: Option<&CircuitBreakerPolicy>,
        snapshot: &[EndpointRef],
    ) -> Option<CircuitBreaker> {
        let (registry, policy) = (self.breakers.as_ref()?, policy?);
        let key = CircuitBreakerRegistry::key(service, &endpoint.address());
        if let Some(existing) = registry.get(&key) {
            return Some(existing);
        }
        match registry.breaker(&key, policy) {
            Ok(breaker) => {
                let live: Vec<String> = snapshot.iter().map(|e| e.address()).collect();
                let pruned = registry.prune(service, &live);
                if pruned > 0 {
                    tracing::debug!(service, pruned, "dropped circuit breakers of departed endpoints");
                }
                Some(breaker)
            }
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "invalid circuit breaker policy; breaking disabled");
                None
            }
        }
    }

    async fn finish<T>(
        &self,
        response: ClusterResponse<T>,
        started: u64,
        attempts: u32,
        exhausted: bool,
    ) -> ClusterResponse<T> {
        let duration = Duration::from_millis(self.clock.now_millis().saturating_sub(started));
        let outcome = if response.is_success() {
            RequestOutcome::Success { duration, attempts }
        } else {
            if exhausted {
                self.emit(GovernanceEvent::Retry(RetryEvent::Exhausted {
                    total_attempts: attempts,
                    total_duration: duration,
                }))
                .await;
            }
            RequestOutcome::Failure { duration, attempts }
        };
        self.emit(GovernanceEvent::Request(outcome)).await;
        response
    }

    async fn emit(&self, event: GovernanceEvent) {
        emit_best_effort(self.sink.clone(), event).await;
    }
}

/// Attempt and time limits of one call.
#[derive(Debug, Clone, Copy)]
struct Budget {
    started: u64,
    max_retries: u32,
    timeout: Option<u64>,
    interval: Duration,
}

impl Budget {
    fn new(policy: &MethodPolicy, started: u64) -> Self {
        Self {
            started,
            max_retries: policy.max_retries(),
            timeout: policy.timeout().map(millis),
            interval: policy.retry_interval(),
        }
    }

    /// Another attempt is allowed while `attempt <= retry` and the elapsed time plus the
    /// interval stays under the timeout.
    fn allows_retry(&self, attempt: u32, now: u64) -> bool {
        if attempt > self.max_retries {
            return false;
        }
        let elapsed = now.saturating_sub(self.started);
        match self.timeout {
            Some(timeout) if elapsed.saturating_add(millis(self.interval)) >= timeout => {
                tracing::debug!(attempt, elapsed, timeout, "retry budget exhausted by timeout");
                false
            }
            _ => true,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// An answered but non-retryable failure still shows the endpoint is reachable.
fn record(permit: Option<CircuitPermit>, retryable: bool) {
    if let Some(permit) = permit {
        if retryable {
            permit.failure();
        } else {
            permit.success();
        }
    }
}

/// Builder for [`ClusterInvoker`].
#[derive(Debug)]
pub struct ClusterInvokerBuilder<S> {
    location: Option<Arc<Location>>,
    routes: RouteChain,
    balancer: Option<Arc<dyn LoadBalancer>>,
    advice_failure_mode: AdviceFailureMode,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    breakers: Option<CircuitBreakerRegistry>,
    sink: S,
}

impl ClusterInvokerBuilder<NullSink> {
    pub fn new() -> Self {
        Self {
            location: None,
            routes: RouteChain::standard(),
            balancer: None,
            advice_failure_mode: AdviceFailureMode::default(),
            clock: Arc::new(MonotonicClock::default()),
            sleeper: Arc::new(TokioSleeper),
            breakers: None,
            sink: NullSink,
        }
    }
}

impl Default for ClusterInvokerBuilder<NullSink> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> ClusterInvokerBuilder<S> {
    /// Self-description of the local node. Required.
    pub fn location(mut self, location: impl Into<Arc<Location>>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Route filters; defaults to [`RouteChain::standard`].
    pub fn routes(mut self, routes: RouteChain) -> Self {
        self.routes = routes;
        self
    }

    /// Fallback balancer; defaults to round robin.
    pub fn balancer<B: LoadBalancer + 'static>(mut self, balancer: B) -> Self {
        self.balancer = Some(Arc::new(balancer));
        self
    }

    pub fn advice_failure_mode(mut self, mode: AdviceFailureMode) -> Self {
        self.advice_failure_mode = mode;
        self
    }

    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn sleeper<Z: Sleeper + 'static>(mut self, sleeper: Z) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Enable per-endpoint circuit breaking for policies that carry a breaker policy.
    pub fn circuit_breakers(mut self, registry: CircuitBreakerRegistry) -> Self {
        self.breakers = Some(registry);
        self
    }

    /// Telemetry sink receiving governance events.
    pub fn sink<T>(self, sink: T) -> ClusterInvokerBuilder<T>
    where
        T: TelemetrySink,
    {
        ClusterInvokerBuilder {
            location: self.location,
            routes: self.routes,
            balancer: self.balancer,
            advice_failure_mode: self.advice_failure_mode,
            clock: self.clock,
            sleeper: self.sleeper,
            breakers: self.breakers,
            sink,
        }
    }

    pub fn build(self) -> Result<ClusterInvoker<S>, BuildError> {
        let location = self.location.ok_or(BuildError::Missing("location"))?;
        let picker = match self.balancer {
            Some(balancer) => Picker::from_shared(balancer),
            None => Picker::default(),
        }
        .with_failure_mode(self.advice_failure_mode);
        Ok(ClusterInvoker {
            location,
            routes: self.routes,
            picker,
            clock: self.clock,
            sleeper: self.sleeper,
            breakers: self.breakers,
            sink: self.sink,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::SimpleEndpoint;
    use crate::policy::FailoverPolicy;
    use crate::request::SimpleRequest;
    use crate::telemetry::MemorySink;
    use crate::time::{ClockSleeper, ManualClock, TrackingSleeper};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct MockCluster {
        endpoints: Vec<EndpointRef>,
        failing: HashSet<String>,
        retryable: bool,
        calls: AtomicU32,
        invoked: Mutex<Vec<String>>,
    }

    impl MockCluster {
        fn new(hosts: &[&str]) -> Self {
            Self {
                endpoints: hosts.iter().map(|h| SimpleEndpoint::new(*h, 80).shared()).collect(),
                retryable: true,
                ..Default::default()
            }
        }

        fn failing(mut self, hosts: &[&str]) -> Self {
            self.failing = hosts.iter().map(|h| h.to_string()).collect();
            self
        }

        fn non_retryable(mut self) -> Self {
            self.retryable = false;
            self
        }

        fn invoked(&self) -> Vec<String> {
            self.invoked.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Cluster for MockCluster {
        type Request = SimpleRequest;
        type Output = String;

        async fn route(&self, _request: &SimpleRequest) -> Result<Vec<EndpointRef>, GovernanceError> {
            Ok(self.endpoints.clone())
        }

        async fn invoke(&self, _request: &SimpleRequest, endpoint: &EndpointRef) -> ClusterResponse<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.invoked.lock().unwrap().push(endpoint.host().to_string());
            if self.failing.contains(endpoint.host()) {
                ClusterResponse::failure(
                    ServiceError::new(format!("attempt {n} failed")).retryable(self.retryable).with_code("503"),
                )
            } else {
                ClusterResponse::success(format!("ok from {}", endpoint.host()))
            }
        }
    }

    fn invoker() -> ClusterInvoker {
        ClusterInvoker::builder()
            .location(Location::default())
            .sleeper(TrackingSleeper::new())
            .build()
            .unwrap()
    }

    fn policy(retry: u32) -> MethodPolicy {
        MethodPolicy::wildcard().with_failover(FailoverPolicy { retry: Some(retry), ..Default::default() })
    }

    #[test]
    fn builder_requires_location() {
        let err = ClusterInvoker::builder().build().unwrap_err();
        assert_eq!(err, BuildError::Missing("location"));
    }

    #[tokio::test]
    async fn exhausts_retries_and_returns_last_failure() {
        let cluster = MockCluster::new(&["a", "b"]).failing(&["a", "b"]);
        let response = invoker().invoke(&cluster, &SimpleRequest::outbound("order"), &policy(2), None).await;

        assert_eq!(cluster.calls.load(Ordering::SeqCst), 3);
        let error = response.error().expect("failure");
        assert_eq!(error.message(), "attempt 3 failed");
        assert_eq!(error.code(), Some("503"));
    }

    #[tokio::test]
    async fn fails_over_to_untried_endpoint() {
        let cluster = MockCluster::new(&["a", "b"]).failing(&["a"]);
        let response = invoker().invoke(&cluster, &SimpleRequest::outbound("order"), &policy(3), None).await;

        assert_eq!(response.result().map(String::as_str), Some("ok from b"));
        assert_eq!(cluster.invoked(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn non_retryable_failure_returns_immediately() {
        let cluster = MockCluster::new(&["a", "b"]).failing(&["a", "b"]).non_retryable();
        let response = invoker().invoke(&cluster, &SimpleRequest::outbound("order"), &policy(5), None).await;

        assert_eq!(cluster.calls.load(Ordering::SeqCst), 1);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn no_endpoints_is_fatal() {
        let cluster = MockCluster::new(&[]);
        let response = invoker().invoke(&cluster, &SimpleRequest::outbound("order"), &policy(3), None).await;

        assert_eq!(cluster.calls.load(Ordering::SeqCst), 0);
        let error = response.error().expect("failure");
        assert!(error.is_configuration());
        assert_eq!(error.governance(), Some(&GovernanceError::NoEndpoint { service: "order".into() }));
    }

    #[tokio::test]
    async fn timeout_bounds_total_attempts() {
        let clock = ManualClock::new();
        let invoker = ClusterInvoker::builder()
            .location(Location::default())
            .clock(clock.clone())
            .sleeper(ClockSleeper::new(clock.clone()))
            .build()
            .unwrap();
        let policy = MethodPolicy::wildcard()
            .with_failover(FailoverPolicy {
                retry: Some(10),
                timeout_in_milliseconds: Some(100),
                ..Default::default()
            })
            .with_retry(RetryPolicy { retry_interval: Some(40), ..Default::default() });
        let cluster = MockCluster::new(&["a"]).failing(&["a"]);

        let response = invoker.invoke(&cluster, &SimpleRequest::outbound("order"), &policy, None).await;

        // t=0 and t=40 continue; at t=80 another 40ms would reach the 100ms budget.
        assert_eq!(cluster.calls.load(Ordering::SeqCst), 3);
        assert_eq!(clock.now_millis(), 80);
        assert_eq!(response.error().map(ServiceError::message), Some("attempt 3 failed"));
    }

    #[tokio::test]
    async fn retry_interval_is_slept_between_attempts() {
        let sleeper = TrackingSleeper::new();
        let invoker = ClusterInvoker::builder()
            .location(Location::default())
            .sleeper(sleeper.clone())
            .build()
            .unwrap();
        let policy = policy(2).with_retry(RetryPolicy { retry_interval: Some(15), ..Default::default() });
        let cluster = MockCluster::new(&["a"]).failing(&["a"]);

        invoker.invoke(&cluster, &SimpleRequest::outbound("order"), &policy, None).await;
        assert_eq!(sleeper.calls(), vec![Duration::from_millis(15); 2]);
    }

    #[tokio::test]
    async fn open_circuit_removes_endpoint_from_election() {
        let clock = ManualClock::new();
        let registry = CircuitBreakerRegistry::with_clock(Arc::new(clock.clone()));
        let invoker = ClusterInvoker::builder()
            .location(Location::default())
            .clock(clock)
            .sleeper(TrackingSleeper::new())
            .circuit_breakers(registry.clone())
            .build()
            .unwrap();
        let policy = MethodPolicy::wildcard()
            .with_circuit_breaker(CircuitBreakerPolicy { failure_threshold: Some(1), ..Default::default() });
        let cluster = MockCluster::new(&["a", "b"]).failing(&["a"]);
        let request = SimpleRequest::outbound("order");

        let first = invoker.invoke(&cluster, &request, &policy, None).await;
        assert!(!first.is_success());
        assert!(!registry.get("order@a:80").unwrap().is_available());

        for _ in 0..3 {
            let response = invoker.invoke(&cluster, &request, &policy, None).await;
            assert_eq!(response.result().map(String::as_str), Some("ok from b"));
        }
        assert_eq!(cluster.invoked(), vec!["a", "b", "b", "b"]);
    }

    #[tokio::test]
    async fn all_circuits_open_is_fatal() {
        let clock = ManualClock::new();
        let registry = CircuitBreakerRegistry::with_clock(Arc::new(clock.clone()));
        let invoker = ClusterInvoker::builder()
            .location(Location::default())
            .clock(clock)
            .circuit_breakers(registry)
            .build()
            .unwrap();
        let policy = MethodPolicy::wildcard()
            .with_circuit_breaker(CircuitBreakerPolicy { failure_threshold: Some(1), ..Default::default() });
        let cluster = MockCluster::new(&["a"]).failing(&["a"]);
        let request = SimpleRequest::outbound("order");

        invoker.invoke(&cluster, &request, &policy, None).await;
        let response = invoker.invoke(&cluster, &request, &policy, None).await;
        assert_eq!(cluster.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            response.error().and_then(ServiceError::governance),
            Some(GovernanceError::CircuitOpen { .. })
        ));
    }

    #[tokio::test]
    async fn departed_endpoints_lose_their_breakers() {
        let registry = CircuitBreakerRegistry::new();
        let invoker = ClusterInvoker::builder()
            .location(Location::default())
            .sleeper(TrackingSleeper::new())
            .circuit_breakers(registry.clone())
            .build()
            .unwrap();
        let policy = MethodPolicy::wildcard().with_circuit_breaker(CircuitBreakerPolicy::default());
        let billing = MockCluster::new(&["b"]);
        invoker.invoke(&billing, &SimpleRequest::outbound("billing"), &policy, None).await;

        let request = SimpleRequest::outbound("order");
        for generation in 0..10 {
            let host = format!("h{generation}");
            let cluster = MockCluster::new(&[host.as_str()]);
            invoker.invoke(&cluster, &request, &policy, None).await;
        }

        let keys: Vec<String> = registry.snapshot().into_iter().map(|(key, _)| key).collect();
        assert_eq!(keys, vec!["billing@b:80".to_string(), "order@h9:80".to_string()]);
    }

    #[tokio::test]
    async fn non_retryable_failure_is_not_reported_as_exhausted() {
        struct Degrading {
            endpoints: Vec<EndpointRef>,
            calls: AtomicU32,
        }

        #[async_trait]
        impl Cluster for Degrading {
            type Request = SimpleRequest;
            type Output = ();

            async fn route(&self, _request: &SimpleRequest) -> Result<Vec<EndpointRef>, GovernanceError> {
                Ok(self.endpoints.clone())
            }

            async fn invoke(&self, _request: &SimpleRequest, _endpoint: &EndpointRef) -> ClusterResponse<()> {
                let first = self.calls.fetch_add(1, Ordering::SeqCst) == 0;
                ClusterResponse::failure(ServiceError::new("rejected").retryable(first))
            }
        }

        let sink = MemorySink::new();
        let invoker = ClusterInvoker::builder()
            .location(Location::default())
            .sleeper(TrackingSleeper::new())
            .sink(sink.clone())
            .build()
            .unwrap();
        let cluster = Degrading {
            endpoints: vec![SimpleEndpoint::new("a", 80).shared(), SimpleEndpoint::new("b", 80).shared()],
            calls: AtomicU32::new(0),
        };

        invoker.invoke(&cluster, &SimpleRequest::outbound("order"), &policy(3), None).await;

        let events = sink.events();
        assert_eq!(cluster.calls.load(Ordering::SeqCst), 2);
        assert!(!events.iter().any(|e| matches!(e, GovernanceEvent::Retry(RetryEvent::Exhausted { .. }))));
        assert!(matches!(
            events.last(),
            Some(GovernanceEvent::Request(RequestOutcome::Failure { attempts: 2, .. }))
        ));
    }

    #[tokio::test]
    async fn emits_election_retry_and_outcome_events() {
        let sink = MemorySink::new();
        let invoker = ClusterInvoker::builder()
            .location(Location::default())
            .sleeper(TrackingSleeper::new())
            .sink(sink.clone())
            .build()
            .unwrap();
        let cluster = MockCluster::new(&["a", "b"]).failing(&["a"]);

        invoker.invoke(&cluster, &SimpleRequest::outbound("order"), &policy(1), None).await;

        let events = sink.events();
        assert_eq!(events.len(), 4);
        assert!(matches!(&events[0], GovernanceEvent::Election(ElectionEvent::Elected { attempt: 1, .. })));
        assert!(matches!(&events[1], GovernanceEvent::Retry(RetryEvent::Attempt { attempt: 1, .. })));
        assert!(matches!(&events[2], GovernanceEvent::Election(ElectionEvent::Elected { attempt: 2, .. })));
        assert!(matches!(&events[3], GovernanceEvent::Request(RequestOutcome::Success { attempts: 2, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_future_stops_the_call() {
        struct Hangs {
            calls: AtomicU32,
        }

        #[async_trait]
        impl Cluster for Hangs {
            type Request = SimpleRequest;
            type Output = ();

            async fn route(&self, _request: &SimpleRequest) -> Result<Vec<EndpointRef>, GovernanceError> {
                Ok(vec![SimpleEndpoint::new("slow", 1).shared()])
            }

            async fn invoke(&self, _request: &SimpleRequest, _endpoint: &EndpointRef) -> ClusterResponse<()> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(3600)).await;
                ClusterResponse::success(())
            }
        }

        let cluster = Hangs { calls: AtomicU32::new(0) };
        let invoker = invoker();
        let request = SimpleRequest::outbound("order");
        let policy = policy(3);
        let call = invoker.invoke(&cluster, &request, &policy, None);
        let outcome = tokio::time::timeout(Duration::from_millis(50), call).await;

        assert!(outcome.is_err());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(cluster.calls.load(Ordering::SeqCst), 1);
    }
}
