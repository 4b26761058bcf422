//! Convenient re-exports for common lanegov types.
pub use crate::{
    balancer::{LoadBalancer, RandomWeightBalancer, RoundRobinBalancer},
    circuit_breaker::{CircuitBreakerPolicy, CircuitBreakerRegistry, CircuitState},
    cluster::{Cluster, ClusterInvoker},
    endpoint::{Endpoint, EndpointRef, EndpointState, SimpleEndpoint},
    error::{AdviceError, BuildError, GovernanceError, ServiceError},
    governor::Governor,
    location::Location,
    picker::{AdviceFailureMode, ElectionAdvice, LaneAffinityAdvice, Picker, StickySessionAdvice},
    policy::{
        FailoverPolicy, MethodPolicy, PolicyId, PolicyInherit, PolicyRegistry, RetryPolicy, ServicePolicy,
    },
    request::{ServiceRequest, SimpleRequest},
    response::ClusterResponse,
    route::RouteChain,
    tag::{MatchOp, TagCondition, TagProvider, TagProviderRegistry},
};
