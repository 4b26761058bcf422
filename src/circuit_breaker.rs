//! Per-endpoint circuit breaking with lock-free atomics.
//!
//! The invoker keeps one [`CircuitBreaker`] per `service@host:port` in a
//! [`CircuitBreakerRegistry`]. Before an attempt it acquires a [`CircuitPermit`]; after
//! classification the permit records success or failure. Open breakers make their
//! endpoint unavailable for election until the recovery timeout elapses, then a limited
//! number of half-open probes decide whether the circuit closes again.

use crate::error::GovernanceError;
use crate::policy::PolicyInherit;
use crate::time::{Clock, MonotonicClock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_RECOVERY_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_HALF_OPEN_MAX_CALLS: u32 = 1;

/// Current state of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Rejecting calls until the recovery timeout elapses.
    Open,
    /// Letting a limited number of probes through.
    HalfOpen,
}

impl CircuitState {
    fn from_u8(v: u8) -> Self {
        match v {
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Declarative breaker settings carried by a service or method policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct CircuitBreakerPolicy {
    pub id: Option<u64>,
    /// Consecutive failures that open the circuit.
    pub failure_threshold: Option<u32>,
    pub recovery_timeout_ms: Option<u64>,
    pub half_open_max_calls: Option<u32>,
}

crate::policy::inherit_fields!(CircuitBreakerPolicy {
    failure_threshold,
    recovery_timeout_ms,
    half_open_max_calls,
});

impl CircuitBreakerPolicy {
    /// Validated runtime config, defaulting unset fields.
    pub fn config(&self) -> Result<CircuitBreakerConfig, CircuitBreakerError> {
        CircuitBreakerConfig::new(
            self.failure_threshold.unwrap_or(DEFAULT_FAILURE_THRESHOLD) as usize,
            Duration::from_millis(self.recovery_timeout_ms.unwrap_or(DEFAULT_RECOVERY_TIMEOUT_MS)),
            self.half_open_max_calls.unwrap_or(DEFAULT_HALF_OPEN_MAX_CALLS) as usize,
        )
    }

    /// Inherit from `source`, keeping the declared id.
    pub fn inherit(mut self, source: &CircuitBreakerPolicy) -> Self {
        self.supplement(Some(source));
        self
    }
}

/// Validated configuration for a circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    failure_threshold: usize,
    recovery_timeout: Duration,
    half_open_max_calls: usize,
}

/// Errors produced when validating breaker configuration or looking breakers up.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CircuitBreakerError {
    #[error("failure_threshold must be > 0 (got {provided})")]
    InvalidFailureThreshold { provided: usize },
    #[error("recovery_timeout must be > 0 (got {0:?})")]
    InvalidRecoveryTimeout(Duration),
    #[error("half_open_max_calls must be > 0 (got {provided})")]
    InvalidHalfOpenLimit { provided: usize },
    #[error("circuit breaker '{key}' not found")]
    NotFound { key: String },
}

impl CircuitBreakerConfig {
    pub fn new(
        failure_threshold: usize,
        recovery_timeout: Duration,
        half_open_max_calls: usize,
    ) -> Result<Self, CircuitBreakerError> {
        if failure_threshold == 0 {
            return Err(CircuitBreakerError::InvalidFailureThreshold { provided: 0 });
        }
        if half_open_max_calls == 0 {
            return Err(CircuitBreakerError::InvalidHalfOpenLimit { provided: 0 });
        }
        if recovery_timeout.is_zero() {
            return Err(CircuitBreakerError::InvalidRecoveryTimeout(recovery_timeout));
        }
        Ok(Self { failure_threshold, recovery_timeout, half_open_max_calls })
    }

    pub fn failure_threshold(&self) -> usize {
        self.failure_threshold
    }

    pub fn recovery_timeout(&self) -> Duration {
        self.recovery_timeout
    }

    pub fn half_open_max_calls(&self) -> usize {
        self.half_open_max_calls
    }
}

#[derive(Debug)]
struct BreakerState {
    state: AtomicU8,
    failure_count: AtomicUsize,
    opened_at_millis: AtomicU64,
    half_open_calls: AtomicUsize,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_CLOSED),
            failure_count: AtomicUsize::new(0),
            opened_at_millis: AtomicU64::new(0),
            half_open_calls: AtomicUsize::new(0),
        }
    }
}

/// Circuit breaker guarding one endpoint. Clones share state.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    key: Arc<str>,
    state: Arc<BreakerState>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(key: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(key, config, Arc::new(MonotonicClock::default()))
    }

    pub fn with_clock(key: impl Into<String>, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let key: String = key.into();
        Self { key: Arc::from(key), state: Arc::new(BreakerState::new()), config, clock }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Stored state; an open circuit whose timeout elapsed still reports `Open` until a
    /// probe is admitted.
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.state.load(Ordering::Acquire))
    }

    pub fn failure_count(&self) -> usize {
        self.state.failure_count.load(Ordering::Acquire)
    }

    /// Whether [`try_acquire`](Self::try_acquire) would currently admit a call.
    pub fn is_available(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => self.open_elapsed() >= self.recovery_millis(),
            CircuitState::HalfOpen => {
                self.state.half_open_calls.load(Ordering::Acquire) < self.config.half_open_max_calls
            }
        }
    }

    /// Admit one call or reject it with [`GovernanceError::CircuitOpen`].
    pub fn try_acquire(&self) -> Result<CircuitPermit, GovernanceError> {
        loop {
            match self.state() {
                CircuitState::Closed => return Ok(self.permit(false)),
                CircuitState::Open => {
                    if self.open_elapsed() < self.recovery_millis() {
                        return Err(self.rejected());
                    }
                    // Winner or not, re-read the state and compete for a probe slot.
                    if self
                        .state
                        .state
                        .compare_exchange(STATE_OPEN, STATE_HALF_OPEN, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        tracing::info!(key = %self.key, "circuit breaker → half-open");
                    }
                }
                CircuitState::HalfOpen => {
                    let current = self.state.half_open_calls.fetch_add(1, Ordering::AcqRel);
                    if current >= self.config.half_open_max_calls {
                        self.state.half_open_calls.fetch_sub(1, Ordering::Release);
                        return Err(self.rejected());
                    }
                    tracing::debug!(
                        key = %self.key,
                        in_flight = current + 1,
                        max = self.config.half_open_max_calls,
                        "circuit breaker: half-open probe"
                    );
                    return Ok(self.permit(true));
                }
            }
        }
    }

    /// Force the breaker closed and clear counters.
    pub fn reset(&self) {
        self.state.state.store(STATE_CLOSED, Ordering::Release);
        self.state.failure_count.store(0, Ordering::Release);
        self.state.opened_at_millis.store(0, Ordering::Release);
        self.state.half_open_calls.store(0, Ordering::Release);
    }

    fn permit(&self, half_open: bool) -> CircuitPermit {
        CircuitPermit { breaker: self.clone(), half_open, released: false }
    }

    fn rejected(&self) -> GovernanceError {
        GovernanceError::CircuitOpen { key: self.key.to_string() }
    }

    fn recovery_millis(&self) -> u64 {
        u64::try_from(self.config.recovery_timeout.as_millis()).unwrap_or(u64::MAX)
    }

    fn open_elapsed(&self) -> u64 {
        let opened_at = self.state.opened_at_millis.load(Ordering::Acquire);
        self.clock.now_millis().saturating_sub(opened_at)
    }

    fn on_success(&self) {
        match self.state() {
            CircuitState::HalfOpen => {
                if self
                    .state
                    .state
                    .compare_exchange(STATE_HALF_OPEN, STATE_CLOSED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.state.half_open_calls.store(0, Ordering::Release);
                    self.state.failure_count.store(0, Ordering::Release);
                    self.state.opened_at_millis.store(0, Ordering::Release);
                    tracing::info!(key = %self.key, "circuit breaker → closed");
                }
            }
            CircuitState::Closed => self.state.failure_count.store(0, Ordering::Release),
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        let current = self.state();
        let failures = self.state.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
        let (from, trip) = match current {
            CircuitState::HalfOpen => (STATE_HALF_OPEN, true),
            CircuitState::Closed => (STATE_CLOSED, failures >= self.config.failure_threshold),
            CircuitState::Open => return,
        };
        if trip
            && self
                .state
                .state
                .compare_exchange(from, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.state.half_open_calls.store(0, Ordering::Release);
            self.state.opened_at_millis.store(self.clock.now_millis(), Ordering::Release);
            tracing::warn!(
                key = %self.key,
                failures,
                threshold = self.config.failure_threshold,
                "circuit breaker → open"
            );
        }
    }
}

/// Admission for one attempt. Record the outcome with [`success`](Self::success) or
/// [`failure`](Self::failure); dropping it unrecorded only frees its half-open slot.
#[derive(Debug)]
pub struct CircuitPermit {
    breaker: CircuitBreaker,
    half_open: bool,
    released: bool,
}

impl CircuitPermit {
    pub fn success(mut self) {
        self.release();
        self.breaker.on_success();
    }

    pub fn failure(mut self) {
        self.release();
        self.breaker.on_failure();
    }

    fn release(&mut self) {
        if self.half_open && !self.released {
            self.breaker.state.half_open_calls.fetch_sub(1, Ordering::Release);
        }
        self.released = true;
    }
}

impl Drop for CircuitPermit {
    fn drop(&mut self) {
        self.release();
    }
}

/// Breakers keyed by `service@host:port`, created on first use.
#[derive(Debug, Clone)]
pub struct CircuitBreakerRegistry {
    inner: Arc<RwLock<HashMap<String, CircuitBreaker>>>,
    clock: Arc<dyn Clock>,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::with_clock(Arc::new(MonotonicClock::default()))
    }
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose breakers read time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { inner: Arc::new(RwLock::new(HashMap::new())), clock }
    }

    /// Breaker key for an endpoint of a service.
    pub fn key(service: &str, address: &str) -> String {
        format!("{service}@{address}")
    }

    /// Existing breaker for `key`, or a new one configured from `policy`.
    ///
    /// The first creation fixes the config; later policy changes need a [`remove`](Self::remove).
    pub fn breaker(
        &self,
        key: &str,
        policy: &CircuitBreakerPolicy,
    ) -> Result<CircuitBreaker, CircuitBreakerError> {
        if let Some(existing) = self.get(key) {
            return Ok(existing);
        }
        let config = policy.config()?;
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let breaker = map
            .entry(key.to_string())
            .or_insert_with(|| CircuitBreaker::with_clock(key, config, self.clock.clone()));
        Ok(breaker.clone())
    }

    pub fn get(&self, key: &str) -> Option<CircuitBreaker> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<CircuitBreaker> {
        self.inner.write().unwrap_or_else(|e| e.into_inner()).remove(key)
    }

    /// Drop the breakers of `service` whose address is not in `live`. Returns how many
    /// were removed.
    pub fn prune(&self, service: &str, live: &[String]) -> usize {
        let prefix = format!("{service}@");
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let before = map.len();
        map.retain(|key, _| match key.strip_prefix(&prefix) {
            Some(address) => live.iter().any(|l| l == address),
            None => true,
        });
        before - map.len()
    }

    pub fn reset(&self, key: &str) -> Result<(), CircuitBreakerError> {
        match self.get(key) {
            Some(breaker) => {
                breaker.reset();
                Ok(())
            }
            None => Err(CircuitBreakerError::NotFound { key: key.to_string() }),
        }
    }

    /// Breaker states sorted by key.
    pub fn snapshot(&self) -> Vec<(String, CircuitState)> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut entries: Vec<(String, CircuitState)> =
            map.iter().map(|(k, v)| (k.clone(), v.state())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}
