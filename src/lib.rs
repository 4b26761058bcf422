#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # lanegov
//!
//! Protocol-agnostic traffic-governance decisions for service calls: which policy
//! applies, which endpoints are eligible, which one to call, and what to do when the
//! call fails.
//!
//! ## Features
//!
//! - **Policy identity** with CRC32 ids and field-wise inheritance (method ← service ←
//!   defaults), merged once at publish time
//! - **Routing filters** for health, live unit/cell, lane and zone affinity
//! - **Election** with caller advice (sticky session, lane affinity) and lock-free
//!   round robin or weighted random fallback
//! - **Retry and failover** bounded by attempt count and wall-clock budget
//! - **Per-endpoint circuit breakers** built on atomics
//! - **Telemetry** as `tower::Service` sinks
//!
//! Adapters for concrete RPC stacks implement [`Cluster`](cluster::Cluster) and
//! [`Endpoint`](endpoint::Endpoint); everything else is provided here.
//!
//! ## Quick Start
//!
//! ```rust
//! use lanegov::prelude::*;
//! use async_trait::async_trait;
//!
//! struct Orders {
//!     endpoints: Vec<EndpointRef>,
//! }
//!
//! #[async_trait]
//! impl Cluster for Orders {
//!     type Request = SimpleRequest;
//!     type Output = String;
//!
//!     async fn route(&self, _request: &SimpleRequest) -> Result<Vec<EndpointRef>, GovernanceError> {
//!         Ok(self.endpoints.clone())
//!     }
//!
//!     async fn invoke(&self, _request: &SimpleRequest, endpoint: &EndpointRef) -> ClusterResponse<String> {
//!         ClusterResponse::success(format!("placed via {}", endpoint.address()))
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() {
//! let policies = PolicyRegistry::new();
//! policies.publish(
//!     ServicePolicy::new("order")
//!         .with_failover(FailoverPolicy { retry: Some(2), timeout_in_milliseconds: Some(3_000), ..Default::default() }),
//! );
//!
//! let location = Location::builder().region("eu").zone("eu-1").build();
//! let invoker = ClusterInvoker::builder().location(location).build().unwrap();
//! let governor = Governor::new(policies, TagProviderRegistry::default(), invoker);
//!
//! let cluster = Orders {
//!     endpoints: vec![
//!         SimpleEndpoint::new("10.0.0.1", 8080).with_label("zone", "eu-1").shared(),
//!         SimpleEndpoint::new("10.0.0.2", 8080).with_label("zone", "eu-2").shared(),
//!     ],
//! };
//! let request = SimpleRequest::outbound("order").with_method("place");
//! let response = governor.call(&cluster, &request, None).await;
//! assert_eq!(response.result().map(String::as_str), Some("placed via 10.0.0.1:8080"));
//! # }
//! ```

pub mod balancer;
pub mod circuit_breaker;
pub mod cluster;
pub mod endpoint;
pub mod error;
pub mod governor;
pub mod location;
pub mod picker;
pub mod policy;
pub mod prelude;
pub mod request;
pub mod response;
pub mod route;
pub mod tag;
pub mod telemetry;
pub mod time;

pub use cluster::{Cluster, ClusterInvoker, ClusterInvokerBuilder};
pub use error::{GovernanceError, ServiceError};
pub use governor::Governor;
pub use time::{Clock, ManualClock, MonotonicClock, Sleeper, TokioSleeper};
