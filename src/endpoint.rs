//! Transport-neutral view over a remote service instance.
//!
//! Adapters wrap their native instance descriptor (a Dubbo invoker, a gRPC subchannel,
//! a Spring `ServiceInstance`) and expose it through [`Endpoint`]. The governance core
//! only reads endpoints through this trait and never inspects the concrete type.

use crate::request::ServiceRequest;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Shared handle to an endpoint inside a candidate snapshot.
pub type EndpointRef = Arc<dyn Endpoint>;

pub const LABEL_REGION: &str = "region";
pub const LABEL_ZONE: &str = "zone";
pub const LABEL_LIVE_SPACE_ID: &str = "liveSpaceId";
pub const LABEL_UNIT: &str = "unit";
pub const LABEL_CELL: &str = "cell";
pub const LABEL_LANE_SPACE_ID: &str = "laneSpaceId";
pub const LABEL_LANE: &str = "lane";
pub const LABEL_WEIGHT: &str = "weight";
pub const LABEL_TIMESTAMP: &str = "timestamp";
/// Alternate timestamp label reported by some registries.
pub const LABEL_REMOTE_TIMESTAMP: &str = "remote.timestamp";
/// Warm-up duration in milliseconds.
pub const LABEL_WARMUP: &str = "warmup";
pub const LABEL_INSTANCE_ID: &str = "instanceId";

pub const DEFAULT_WEIGHT: u32 = 100;

/// Health state reported by the adapter's registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndpointState {
    #[default]
    Healthy,
    /// Recently started; accepts traffic with a reduced weight.
    Warmup,
    /// Temporarily removed from rotation.
    Suspend,
    /// Coming back from suspension.
    Recover,
    Disable,
    Closing,
}

impl EndpointState {
    /// Whether the endpoint may receive traffic.
    pub fn is_accessible(self) -> bool {
        matches!(self, Self::Healthy | Self::Warmup | Self::Recover)
    }
}

/// Capability set every transport endpoint exposes.
pub trait Endpoint: Send + Sync + fmt::Debug {
    fn host(&self) -> &str;

    fn port(&self) -> u16;

    /// Metadata label.
    fn label(&self, key: &str) -> Option<&str>;

    fn state(&self) -> EndpointState {
        EndpointState::Healthy
    }

    /// Registration time in epoch milliseconds.
    fn timestamp(&self) -> Option<u64> {
        self.label(LABEL_REMOTE_TIMESTAMP)
            .filter(|v| !v.is_empty())
            .or_else(|| self.label(LABEL_TIMESTAMP))
            .and_then(|v| v.parse().ok())
    }

    /// Configured weight; a method-scoped `<method>.weight` label wins over `weight`.
    fn origin_weight(&self, request: &dyn ServiceRequest) -> u32 {
        let scoped = request
            .method()
            .and_then(|method| self.label(&format!("{method}.{LABEL_WEIGHT}")).map(str::to_string));
        scoped
            .as_deref()
            .or_else(|| self.label(LABEL_WEIGHT))
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(DEFAULT_WEIGHT)
    }

    /// Effective weight now.
    fn weight(&self, request: &dyn ServiceRequest) -> u32 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        self.weight_at(request, now)
    }

    /// Effective weight at `now_millis`, scaled down linearly while warming up.
    fn weight_at(&self, request: &dyn ServiceRequest, now_millis: u64) -> u32 {
        let weight = self.origin_weight(request);
        let warmup = self.label(LABEL_WARMUP).and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
        match self.timestamp() {
            Some(started) if weight > 0 && warmup > 0 => {
                let uptime = now_millis.saturating_sub(started);
                if uptime >= warmup {
                    weight
                } else {
                    let scaled = u128::from(weight) * u128::from(uptime) / u128::from(warmup);
                    u32::try_from(scaled).unwrap_or(weight).clamp(1, weight)
                }
            }
            _ => weight,
        }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host(), self.port())
    }

    /// Instance id label, falling back to the address.
    fn id(&self) -> String {
        self.label(LABEL_INSTANCE_ID).map(str::to_string).unwrap_or_else(|| self.address())
    }

    fn is_accessible(&self) -> bool {
        self.state().is_accessible()
    }

    fn region(&self) -> Option<&str> {
        self.label(LABEL_REGION)
    }

    fn zone(&self) -> Option<&str> {
        self.label(LABEL_ZONE)
    }

    fn unit(&self) -> Option<&str> {
        self.label(LABEL_UNIT)
    }

    fn cell(&self) -> Option<&str> {
        self.label(LABEL_CELL)
    }

    fn lane(&self) -> Option<&str> {
        self.label(LABEL_LANE)
    }
}

/// Owned endpoint with a label map.
#[derive(Debug, Clone)]
pub struct SimpleEndpoint {
    host: String,
    port: u16,
    state: EndpointState,
    labels: HashMap<String, String>,
}

impl SimpleEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port, state: EndpointState::Healthy, labels: HashMap::new() }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_state(mut self, state: EndpointState) -> Self {
        self.state = state;
        self
    }

    pub fn with_weight(self, weight: u32) -> Self {
        self.with_label(LABEL_WEIGHT, weight.to_string())
    }

    /// Wrap into a shared handle.
    pub fn shared(self) -> EndpointRef {
        Arc::new(self)
    }
}

impl Endpoint for SimpleEndpoint {
    fn host(&self) -> &str {
        &self.host
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    fn state(&self) -> EndpointState {
        self.state
    }
}
