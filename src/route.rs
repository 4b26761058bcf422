//! Routing filters that narrow a candidate snapshot to endpoints consistent with the
//! caller's routing context.
//!
//! Filters take ownership of a `Vec` of shared endpoint handles and return a new one;
//! the adapter's snapshot is never mutated. Preference filters fall back to their input
//! when nothing matches, so routing degrades instead of failing.

use crate::endpoint::{Endpoint, EndpointRef};
use crate::location::Location;
use crate::request::{ServiceRequest, HEADER_LANE, HEADER_UNIT};
use std::fmt;
use std::sync::Arc;

/// What a filter may look at.
#[derive(Clone, Copy)]
pub struct RouteContext<'a> {
    pub location: &'a Location,
    pub request: &'a dyn ServiceRequest,
}

impl<'a> RouteContext<'a> {
    pub fn new(location: &'a Location, request: &'a dyn ServiceRequest) -> Self {
        Self { location, request }
    }

    /// Target unit: the request header overrides the local unit.
    pub fn unit(&self) -> Option<&'a str> {
        self.request.header(HEADER_UNIT).filter(|v| !v.is_empty()).or(self.location.unit())
    }

    /// Target lane: the request header overrides the local lane.
    pub fn lane(&self) -> Option<&'a str> {
        self.request.header(HEADER_LANE).filter(|v| !v.is_empty()).or(self.location.lane())
    }
}

/// One routing step.
pub trait RouteFilter: Send + Sync + fmt::Debug {
    fn filter(&self, ctx: &RouteContext<'_>, endpoints: Vec<EndpointRef>) -> Vec<EndpointRef>;
}

fn prefer<F>(endpoints: Vec<EndpointRef>, keep: F) -> Vec<EndpointRef>
where
    F: Fn(&dyn Endpoint) -> bool,
{
    let matched: Vec<EndpointRef> = endpoints.iter().filter(|e| keep(e.as_ref())).cloned().collect();
    if matched.is_empty() {
        endpoints
    } else {
        matched
    }
}

/// Drops endpoints whose state does not accept traffic.
#[derive(Debug, Default, Clone, Copy)]
pub struct HealthFilter;

impl RouteFilter for HealthFilter {
    fn filter(&self, _ctx: &RouteContext<'_>, endpoints: Vec<EndpointRef>) -> Vec<EndpointRef> {
        endpoints.into_iter().filter(|e| e.is_accessible()).collect()
    }
}

/// Keeps traffic inside the caller's live unit, preferring its cell.
#[derive(Debug, Default, Clone, Copy)]
pub struct LiveFilter;

impl RouteFilter for LiveFilter {
    fn filter(&self, ctx: &RouteContext<'_>, endpoints: Vec<EndpointRef>) -> Vec<EndpointRef> {
        let Some(unit) = ctx.unit() else {
            return endpoints;
        };
        let in_unit = prefer(endpoints, |e| e.unit() == Some(unit));
        match ctx.location.cell() {
            // The local cell only makes sense when routing inside the local unit.
            Some(cell) if ctx.location.unit() == Some(unit) => {
                prefer(in_unit, |e| e.cell() == Some(cell))
            }
            _ => in_unit,
        }
    }
}

/// Routes to the target lane, then to lane-less endpoints.
#[derive(Debug, Default, Clone, Copy)]
pub struct LaneFilter;

impl RouteFilter for LaneFilter {
    fn filter(&self, ctx: &RouteContext<'_>, endpoints: Vec<EndpointRef>) -> Vec<EndpointRef> {
        let target = ctx.lane();
        let matched: Vec<EndpointRef> = match target {
            Some(lane) => endpoints.iter().filter(|e| e.lane() == Some(lane)).cloned().collect(),
            None => Vec::new(),
        };
        if !matched.is_empty() {
            return matched;
        }
        prefer(endpoints, |e| e.lane().is_none_or(str::is_empty))
    }
}

/// Prefers the caller's zone, then its region.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZonePreferenceFilter;

impl RouteFilter for ZonePreferenceFilter {
    fn filter(&self, ctx: &RouteContext<'_>, endpoints: Vec<EndpointRef>) -> Vec<EndpointRef> {
        if let Some(zone) = ctx.location.zone() {
            if endpoints.iter().any(|e| e.zone() == Some(zone)) {
                return endpoints.into_iter().filter(|e| e.zone() == Some(zone)).collect();
            }
        }
        match ctx.location.region() {
            Some(region) => prefer(endpoints, |e| e.region() == Some(region)),
            None => endpoints,
        }
    }
}

/// Ordered list of filters.
#[derive(Debug, Clone, Default)]
pub struct RouteChain {
    filters: Vec<Arc<dyn RouteFilter>>,
}

impl RouteChain {
    /// Chain with no filters; passes candidates through.
    pub fn new() -> Self {
        Self::default()
    }

    /// Health, live unit, lane, then zone preference.
    pub fn standard() -> Self {
        Self::new()
            .with(HealthFilter)
            .with(LiveFilter)
            .with(LaneFilter)
            .with(ZonePreferenceFilter)
    }

    pub fn with<F: RouteFilter + 'static>(mut self, filter: F) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run every filter in order.
    pub fn apply(&self, ctx: &RouteContext<'_>, endpoints: &[EndpointRef]) -> Vec<EndpointRef> {
        self.filters
            .iter()
            .fold(endpoints.to_vec(), |candidates, filter| filter.filter(ctx, candidates))
    }
}
