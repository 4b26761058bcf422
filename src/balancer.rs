//! Load balancers used when no election advice picks an endpoint.

use crate::endpoint::EndpointRef;
use crate::request::ServiceRequest;
use rand::Rng;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

/// Chooses one endpoint from a non-empty candidate list.
pub trait LoadBalancer: Send + Sync + fmt::Debug {
    /// Returns `None` only when `candidates` is empty.
    fn choose(&self, request: &dyn ServiceRequest, candidates: &[EndpointRef]) -> Option<EndpointRef>;
}

/// Unweighted round robin over a shared counter.
///
/// Concurrent callers may observe the same index around the overflow reset; that is
/// tolerated, the counter itself never blocks.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    counter: AtomicI64,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Balancer whose counter starts at `value`.
    pub fn with_counter(value: i64) -> Self {
        Self { counter: AtomicI64::new(value) }
    }

    fn next(&self) -> i64 {
        let mut value = self.counter.fetch_add(1, Ordering::Relaxed);
        if value < 0 {
            self.counter.store(0, Ordering::Relaxed);
            value = self.counter.fetch_add(1, Ordering::Relaxed);
        }
        value
    }
}

impl LoadBalancer for RoundRobinBalancer {
    fn choose(&self, _request: &dyn ServiceRequest, candidates: &[EndpointRef]) -> Option<EndpointRef> {
        if candidates.is_empty() {
            return None;
        }
        let len = i64::try_from(candidates.len()).unwrap_or(i64::MAX);
        // rem_euclid keeps the index in range if a racing reset left a negative value.
        let index = usize::try_from(self.next().rem_euclid(len)).unwrap_or(0);
        candidates.get(index).cloned()
    }
}

/// Weighted random by [`Endpoint::weight`](crate::endpoint::Endpoint::weight); uniform
/// when every weight is zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomWeightBalancer;

impl LoadBalancer for RandomWeightBalancer {
    fn choose(&self, request: &dyn ServiceRequest, candidates: &[EndpointRef]) -> Option<EndpointRef> {
        if candidates.is_empty() {
            return None;
        }
        let weights: Vec<u64> = candidates.iter().map(|e| u64::from(e.weight(request))).collect();
        let total: u64 = weights.iter().sum();
        let mut rng = rand::rng();
        if total == 0 {
            return candidates.get(rng.random_range(0..candidates.len())).cloned();
        }
        let mut point = rng.random_range(0..total);
        for (endpoint, weight) in candidates.iter().zip(weights) {
            if point < weight {
                return Some(endpoint.clone());
            }
            point -= weight;
        }
        candidates.last().cloned()
    }
}
