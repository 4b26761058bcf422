//! Entry point tying policy resolution to the invoker.

use crate::cluster::{Cluster, ClusterInvoker};
use crate::picker::{ElectionAdvice, StickySessionAdvice};
use crate::policy::PolicyRegistry;
use crate::request::ServiceRequest;
use crate::response::ClusterResponse;
use crate::tag::TagProviderRegistry;
use crate::telemetry::{NullSink, TelemetrySink};

/// Resolves the policy for each call and runs it through a [`ClusterInvoker`].
#[derive(Debug, Clone)]
pub struct Governor<S = NullSink> {
    policies: PolicyRegistry,
    tags: TagProviderRegistry,
    invoker: ClusterInvoker<S>,
}

impl<S> Governor<S> {
    pub fn new(policies: PolicyRegistry, tags: TagProviderRegistry, invoker: ClusterInvoker<S>) -> Self {
        Self { policies, tags, invoker }
    }

    pub fn policies(&self) -> &PolicyRegistry {
        &self.policies
    }

    pub fn tags(&self) -> &TagProviderRegistry {
        &self.tags
    }

    pub fn invoker(&self) -> &ClusterInvoker<S> {
        &self.invoker
    }
}

impl<S> Governor<S>
where
    S: TelemetrySink,
    S::Future: Send + 'static,
{
    /// Govern one call.
    ///
    /// A missing policy ends the call with [`GovernanceError::PolicyNotFound`]. Without
    /// explicit advice, a request carrying a sticky id gets [`StickySessionAdvice`].
    ///
    /// [`GovernanceError::PolicyNotFound`]: crate::error::GovernanceError::PolicyNotFound
    pub async fn call<C>(
        &self,
        cluster: &C,
        request: &C::Request,
        advice: Option<&dyn ElectionAdvice>,
    ) -> ClusterResponse<C::Output>
    where
        C: Cluster,
    {
        let policy = match self.policies.resolve(request, &self.tags) {
            Ok(policy) => policy,
            Err(err) => {
                tracing::warn!(service = request.service(), error = %err, "no governance policy");
                return ClusterResponse::failure(err);
            }
        };
        let sticky = match advice {
            Some(_) => None,
            None => StickySessionAdvice::from_request(request),
        };
        let advice = advice.or(sticky.as_ref().map(|s| s as &dyn ElectionAdvice));
        self.invoker.invoke(cluster, request, &policy, advice).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{EndpointRef, SimpleEndpoint};
    use crate::error::{GovernanceError, ServiceError};
    use crate::location::Location;
    use crate::policy::{FailoverPolicy, MethodPolicy, ServicePolicy};
    use crate::request::SimpleRequest;
    use crate::time::InstantSleeper;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        calls: AtomicU32,
        endpoints: Vec<EndpointRef>,
    }

    impl Flaky {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
                endpoints: (1..=3).map(|i| SimpleEndpoint::new(format!("10.0.0.{i}"), 80).shared()).collect(),
            }
        }
    }

    #[async_trait]
    impl Cluster for Flaky {
        type Request = SimpleRequest;
        type Output = String;

        async fn route(&self, _request: &SimpleRequest) -> Result<Vec<EndpointRef>, GovernanceError> {
            Ok(self.endpoints.clone())
        }

        async fn invoke(&self, _request: &SimpleRequest, endpoint: &EndpointRef) -> ClusterResponse<String> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                ClusterResponse::failure(ServiceError::new("reset").retryable(true))
            } else {
                ClusterResponse::success(endpoint.host().to_string())
            }
        }
    }

    fn governor() -> Governor {
        let policies = PolicyRegistry::new();
        policies.publish(ServicePolicy::new("order").with_method(
            MethodPolicy::new("place").with_failover(FailoverPolicy { retry: Some(1), ..Default::default() }),
        ));
        let invoker = ClusterInvoker::builder()
            .location(Location::default())
            .sleeper(InstantSleeper)
            .build()
            .unwrap();
        Governor::new(policies, TagProviderRegistry::default(), invoker)
    }

    #[tokio::test]
    async fn resolves_method_policy_and_retries() {
        let cluster = Flaky::new();
        let request = SimpleRequest::outbound("order").with_method("place");
        let response = governor().call(&cluster, &request, None).await;
        assert!(response.is_success());
        assert_eq!(cluster.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn service_scope_without_retry_fails_once() {
        let cluster = Flaky::new();
        let request = SimpleRequest::outbound("order").with_method("list");
        let response = governor().call(&cluster, &request, None).await;
        assert!(!response.is_success());
        assert_eq!(cluster.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_policy_fails_without_invoking() {
        let cluster = Flaky::new();
        let request = SimpleRequest::outbound("billing");
        let response = governor().call(&cluster, &request, None).await;
        assert_eq!(cluster.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            response.error().and_then(ServiceError::governance),
            Some(&GovernanceError::PolicyNotFound { uri: "service://billing".into() })
        );
    }

    #[tokio::test]
    async fn sticky_id_pins_the_endpoint() {
        let cluster = Flaky::new();
        cluster.calls.store(1, Ordering::SeqCst);
        let governor = governor();
        let request = SimpleRequest::outbound("order").with_method("place").with_sticky_id("10.0.0.3:80");
        for _ in 0..3 {
            let response = governor.call(&cluster, &request, None).await;
            assert_eq!(response.result().map(String::as_str), Some("10.0.0.3"));
        }
    }
}
