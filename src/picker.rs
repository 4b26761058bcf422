//! Endpoint election.
//!
//! The [`Picker`] consults an optional caller-supplied [`ElectionAdvice`] first and
//! falls back to its [`LoadBalancer`]. Advice failures never escape as panics: they are
//! logged and either degrade to the balancer or become an error [`PickResult`],
//! depending on the [`AdviceFailureMode`].

use crate::balancer::{LoadBalancer, RoundRobinBalancer};
use crate::endpoint::EndpointRef;
use crate::error::{AdviceError, GovernanceError};
use crate::request::ServiceRequest;
use std::fmt;
use std::sync::Arc;

/// Caller hint that may elect an endpoint directly.
pub trait ElectionAdvice: Send + Sync {
    /// `Ok(None)` defers to the balancer.
    fn elect(&self, candidates: &[EndpointRef]) -> Result<Option<EndpointRef>, AdviceError>;
}

impl<F> ElectionAdvice for F
where
    F: Fn(&[EndpointRef]) -> Result<Option<EndpointRef>, AdviceError> + Send + Sync,
{
    fn elect(&self, candidates: &[EndpointRef]) -> Result<Option<EndpointRef>, AdviceError> {
        self(candidates)
    }
}

/// Pins a session to the endpoint whose id or address equals the sticky id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StickySessionAdvice {
    sticky_id: String,
}

impl StickySessionAdvice {
    pub fn new(sticky_id: impl Into<String>) -> Self {
        Self { sticky_id: sticky_id.into() }
    }

    /// Advice for the request's sticky id, if it carries one.
    pub fn from_request(request: &dyn ServiceRequest) -> Option<Self> {
        request.sticky_id().filter(|id| !id.is_empty()).map(Self::new)
    }

    pub fn sticky_id(&self) -> &str {
        &self.sticky_id
    }
}

impl ElectionAdvice for StickySessionAdvice {
    fn elect(&self, candidates: &[EndpointRef]) -> Result<Option<EndpointRef>, AdviceError> {
        Ok(candidates
            .iter()
            .find(|e| e.id() == self.sticky_id || e.address() == self.sticky_id)
            .cloned())
    }
}

/// Elects the first endpoint in the given lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneAffinityAdvice {
    lane: String,
}

impl LaneAffinityAdvice {
    pub fn new(lane: impl Into<String>) -> Self {
        Self { lane: lane.into() }
    }
}

impl ElectionAdvice for LaneAffinityAdvice {
    fn elect(&self, candidates: &[EndpointRef]) -> Result<Option<EndpointRef>, AdviceError> {
        Ok(candidates.iter().find(|e| e.lane() == Some(self.lane.as_str())).cloned())
    }
}

/// What to do when an advice returns an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdviceFailureMode {
    /// Log and fall back to the balancer.
    #[default]
    Degrade,
    /// Log and fail the pick with [`GovernanceError::Advice`].
    Fail,
}

/// Outcome of an election.
#[derive(Debug, Clone)]
pub enum PickResult {
    Endpoint(EndpointRef),
    Error(GovernanceError),
}

impl PickResult {
    pub fn endpoint(&self) -> Option<&EndpointRef> {
        match self {
            PickResult::Endpoint(endpoint) => Some(endpoint),
            PickResult::Error(_) => None,
        }
    }

    pub fn into_result(self) -> Result<EndpointRef, GovernanceError> {
        match self {
            PickResult::Endpoint(endpoint) => Ok(endpoint),
            PickResult::Error(err) => Err(err),
        }
    }
}

/// Election over a candidate list. One picker owns one balancer counter.
#[derive(Clone)]
pub struct Picker {
    balancer: Arc<dyn LoadBalancer>,
    mode: AdviceFailureMode,
}

impl fmt::Debug for Picker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Picker").field("balancer", &self.balancer).field("mode", &self.mode).finish()
    }
}

impl Default for Picker {
    fn default() -> Self {
        Self::new(RoundRobinBalancer::new())
    }
}

impl Picker {
    pub fn new<B: LoadBalancer + 'static>(balancer: B) -> Self {
        Self::from_shared(Arc::new(balancer))
    }

    pub fn from_shared(balancer: Arc<dyn LoadBalancer>) -> Self {
        Self { balancer, mode: AdviceFailureMode::default() }
    }

    pub fn with_failure_mode(mut self, mode: AdviceFailureMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn failure_mode(&self) -> AdviceFailureMode {
        self.mode
    }

    /// Elect one endpoint for `request`.
    pub fn pick(
        &self,
        request: &dyn ServiceRequest,
        candidates: &[EndpointRef],
        advice: Option<&dyn ElectionAdvice>,
    ) -> PickResult {
        self.pick_with(None, request, candidates, advice)
    }

    /// Like [`pick`](Self::pick), but a precomputed `terminal` result is returned as is.
    pub fn pick_with(
        &self,
        terminal: Option<PickResult>,
        request: &dyn ServiceRequest,
        candidates: &[EndpointRef],
        advice: Option<&dyn ElectionAdvice>,
    ) -> PickResult {
        match terminal {
            Some(result) => result,
            None => self.elect(request, candidates, advice).0,
        }
    }

    /// Election that also reports a failed advice.
    pub(crate) fn elect(
        &self,
        request: &dyn ServiceRequest,
        candidates: &[EndpointRef],
        advice: Option<&dyn ElectionAdvice>,
    ) -> (PickResult, Option<AdviceError>) {
        if candidates.is_empty() {
            let err = GovernanceError::NoEndpoint { service: request.service().to_string() };
            return (PickResult::Error(err), None);
        }

        let mut failure = None;
        if let Some(advice) = advice {
            match advice.elect(candidates) {
                Ok(Some(endpoint)) => return (PickResult::Endpoint(endpoint), None),
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(
                        target: "lanegov::picker",
                        service = request.service(),
                        error = %err,
                        mode = ?self.mode,
                        "election advice failed"
                    );
                    if self.mode == AdviceFailureMode::Fail {
                        return (PickResult::Error(GovernanceError::Advice(err.clone())), Some(err));
                    }
                    failure = Some(err);
                }
            }
        }

        let result = match self.balancer.choose(request, candidates) {
            Some(endpoint) => PickResult::Endpoint(endpoint),
            None => PickResult::Error(GovernanceError::NoEndpoint {
                service: request.service().to_string(),
            }),
        };
        (result, failure)
    }
}
