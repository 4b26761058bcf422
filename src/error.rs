//! Error types for governance decisions and classified call failures.
//!
//! Two families live here:
//! - [`GovernanceError`]: decisions made by this crate (no endpoint, no policy, open
//!   circuit). Configuration-type errors are fatal for a call and never retried.
//! - [`ServiceError`]: the captured failure of a remote call, as reported by an adapter.
//!   It carries the error type-name chain and the server's declared retryable flag so
//!   retry policies can classify it.
use std::fmt;

/// Decisions taken by the governance core that end or redirect a call.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GovernanceError {
    /// The candidate pool was empty after routing.
    #[error("no endpoint available for service '{service}'")]
    NoEndpoint {
        /// Target service.
        service: String,
    },
    /// No governance policy is published for the service.
    #[error("no governance policy found for '{uri}'")]
    PolicyNotFound {
        /// Canonical uri that was looked up.
        uri: String,
    },
    /// The adapter failed to produce a candidate pool.
    #[error("failed to route service '{service}': {message}")]
    Route {
        /// Target service.
        service: String,
        /// Adapter supplied reason.
        message: String,
    },
    /// Every candidate endpoint has an open circuit.
    #[error("circuit breaker open for '{key}'")]
    CircuitOpen {
        /// Breaker key (`service@host:port`, or the service when all are open).
        key: String,
    },
    /// An election advice failed and the picker is configured to fail the pick.
    #[error("election advice failed: {0}")]
    Advice(#[from] AdviceError),
}

impl GovernanceError {
    /// Whether another attempt (on another endpoint) may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Configuration errors are fatal for the call and surface immediately.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::NoEndpoint { .. } | Self::PolicyNotFound { .. } | Self::Route { .. })
    }
}

/// Failure raised by a caller supplied [`ElectionAdvice`](crate::picker::ElectionAdvice).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct AdviceError {
    message: String,
}

impl AdviceError {
    /// Create an advice error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    /// Error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors produced while building invokers and other configured components.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// A required builder field was not provided.
    #[error("missing required field '{0}'")]
    Missing(&'static str),
}

/// Captured failure of a remote call.
///
/// `types` holds the error type names from outermost to innermost cause, the moral
/// equivalent of an exception class hierarchy, and is what
/// [`RetryPolicy::is_retry`](crate::policy::RetryPolicy::is_retry) matches against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceError {
    message: String,
    types: Vec<String>,
    retryable: bool,
    code: Option<String>,
    governance: Option<GovernanceError>,
}

impl ServiceError {
    /// Create an error with a message and no type information.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), types: Vec::new(), retryable: false, code: None, governance: None }
    }

    /// Capture an error value, recording its type name.
    pub fn from_error<E>(error: &E) -> Self
    where
        E: std::error::Error + 'static,
    {
        let mut types = vec![std::any::type_name::<E>().to_string()];
        if let Some(io) = (error as &dyn std::error::Error).downcast_ref::<std::io::Error>() {
            types.push(format!("std::io::ErrorKind::{:?}", io.kind()));
        }
        Self { message: error.to_string(), types, retryable: false, code: None, governance: None }
    }

    /// Append an error type name to the cause chain.
    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.types.push(type_name.into());
        self
    }

    /// Mark the error as declared retryable by the remote side.
    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Attach a transport status code (HTTP status, gRPC code, ...).
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Error type names, outermost first.
    pub fn types(&self) -> &[String] {
        &self.types
    }

    /// Declared retryable flag.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Status code, if any.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// Governance decision that produced this error, if any.
    pub fn governance(&self) -> Option<&GovernanceError> {
        self.governance.as_ref()
    }

    /// True when the error came from a fatal configuration decision.
    pub fn is_configuration(&self) -> bool {
        self.governance.as_ref().is_some_and(GovernanceError::is_configuration)
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} (code {})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.governance.as_ref().map(|e| e as &dyn std::error::Error)
    }
}

impl From<GovernanceError> for ServiceError {
    fn from(error: GovernanceError) -> Self {
        Self {
            message: error.to_string(),
            types: vec![std::any::type_name::<GovernanceError>().to_string()],
            retryable: error.is_retryable(),
            code: None,
            governance: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io;

    #[test]
    fn governance_error_display() {
        let err = GovernanceError::NoEndpoint { service: "order".into() };
        assert_eq!(err.to_string(), "no endpoint available for service 'order'");
        assert!(err.is_configuration());
        assert!(!err.is_retryable());
    }

    #[test]
    fn circuit_open_is_retryable_not_configuration() {
        let err = GovernanceError::CircuitOpen { key: "order@10.0.0.1:80".into() };
        assert!(err.is_retryable());
        assert!(!err.is_configuration());
    }

    #[test]
    fn service_error_from_io_error_records_types() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let err = ServiceError::from_error(&io_err);
        assert_eq!(err.message(), "refused");
        assert!(err.types()[0].starts_with("std::io"));
        assert!(err.types().iter().any(|t| t.ends_with("ConnectionRefused")));
        assert!(!err.is_retryable());
    }

    #[test]
    fn service_error_from_governance_keeps_source() {
        let err: ServiceError = GovernanceError::PolicyNotFound { uri: "service://a".into() }.into();
        assert!(err.is_configuration());
        assert!(err.source().is_some());
        assert!(err.governance().is_some());
    }

    #[test]
    fn display_includes_code() {
        let err = ServiceError::new("bad gateway").with_code("502").retryable(true);
        assert_eq!(err.to_string(), "bad gateway (code 502)");
        assert!(err.is_retryable());
        assert_eq!(err.code(), Some("502"));
    }
}
