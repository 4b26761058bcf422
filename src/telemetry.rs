//! Governance telemetry.
//!
//! The invoker describes what it decided through [`GovernanceEvent`]s: which endpoint
//! an attempt was elected to, when it retries or gives up, and how the call ended.
//! Events flow into a [`TelemetrySink`], which is a `tower::Service<GovernanceEvent>`,
//! so sinks compose with ordinary tower combinators. Delivery is best-effort: a failing
//! sink never changes the outcome of a call.
//!
//! ```rust
//! use lanegov::telemetry::{GovernanceEvent, RetryEvent};
//! use std::time::Duration;
//!
//! let event = GovernanceEvent::Retry(RetryEvent::Attempt { attempt: 1, delay: Duration::from_millis(20) });
//! assert_eq!(event.to_string(), "Retry::Attempt(attempt=1, delay=20ms)");
//! ```

use std::convert::Infallible;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;

/// A telemetry sink that consumes governance events.
pub trait TelemetrySink:
    tower::Service<GovernanceEvent, Response = (), Error = Self::SinkError> + Clone + Send + 'static
{
    type SinkError: std::error::Error + Send + 'static;
}

/// Deliver `event` to `sink`, ignoring readiness and call errors.
pub async fn emit_best_effort<S>(sink: S, event: GovernanceEvent)
where
    S: tower::Service<GovernanceEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut ready_sink) = sink.ready_oneshot().await {
        let _ = ready_sink.call(event).await;
    }
}

/// Events emitted while governing a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GovernanceEvent {
    Election(ElectionEvent),
    Retry(RetryEvent),
    Request(RequestOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionEvent {
    /// An endpoint was chosen for an attempt.
    Elected {
        service: String,
        endpoint: String,
        /// 1-indexed attempt number.
        attempt: u32,
    },
    /// An election advice failed; the picker degraded or failed the pick.
    AdviceFailed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryEvent {
    /// Another attempt follows after `delay`.
    Attempt { attempt: u32, delay: Duration },
    /// No further attempts; the last failure is returned.
    Exhausted { total_attempts: u32, total_duration: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    Success { duration: Duration, attempts: u32 },
    Failure { duration: Duration, attempts: u32 },
}

impl fmt::Display for GovernanceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GovernanceEvent::Election(e) => write!(f, "Election::{e}"),
            GovernanceEvent::Retry(e) => write!(f, "Retry::{e}"),
            GovernanceEvent::Request(e) => write!(f, "Request::{e}"),
        }
    }
}

impl fmt::Display for ElectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElectionEvent::Elected { service, endpoint, attempt } => {
                write!(f, "Elected(service={service}, endpoint={endpoint}, attempt={attempt})")
            }
            ElectionEvent::AdviceFailed { message } => write!(f, "AdviceFailed({message})"),
        }
    }
}

impl fmt::Display for RetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryEvent::Attempt { attempt, delay } => {
                write!(f, "Attempt(attempt={attempt}, delay={}ms)", delay.as_millis())
            }
            RetryEvent::Exhausted { total_attempts, total_duration } => write!(
                f,
                "Exhausted(attempts={total_attempts}, duration={}ms)",
                total_duration.as_millis()
            ),
        }
    }
}

impl fmt::Display for RequestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestOutcome::Success { duration, attempts } => {
                write!(f, "Success(attempts={attempts}, duration={}ms)", duration.as_millis())
            }
            RequestOutcome::Failure { duration, attempts } => {
                write!(f, "Failure(attempts={attempts}, duration={}ms)", duration.as_millis())
            }
        }
    }
}

type SinkFuture<E> = Pin<Box<dyn std::future::Future<Output = Result<(), E>> + Send>>;

/// Discards every event.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<GovernanceEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture<Infallible>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: GovernanceEvent) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// Logs events at INFO through `tracing`.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<GovernanceEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture<Infallible>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: GovernanceEvent) -> Self::Future {
        tracing::info!(target: "lanegov::telemetry", event = %event, "governance_event");
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// Keeps events in memory, evicting the oldest past its capacity.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<GovernanceEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    /// Bounded sink holding up to 10,000 events.
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Snapshot of stored events.
    pub fn events(&self) -> Vec<GovernanceEvent> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<GovernanceEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<GovernanceEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture<Infallible>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: GovernanceEvent) -> Self::Future {
        let mut guard = self.lock();
        if guard.len() >= self.capacity {
            guard.remove(0);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push(event);
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}
