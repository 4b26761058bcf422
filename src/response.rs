//! Classified outcome of a single attempt, and of a whole governed call.

use crate::error::ServiceError;
use crate::policy::RetryPolicy;
use std::fmt;
use std::sync::Arc;

/// Custom retryability predicate attached by an adapter.
pub type ErrorPredicate = Arc<dyn Fn(&ServiceError) -> bool + Send + Sync>;

/// Response of a governed call: either a payload or a captured error.
///
/// Transport failures never escape an attempt as panics or `Err` values; adapters
/// capture them here so the invoker can classify them.
pub struct ClusterResponse<T> {
    outcome: Result<T, ServiceError>,
    predicate: Option<ErrorPredicate>,
}

impl<T> ClusterResponse<T> {
    /// Successful response carrying `result`.
    pub fn success(result: T) -> Self {
        Self { outcome: Ok(result), predicate: None }
    }

    /// Failed response carrying `error`.
    pub fn failure(error: impl Into<ServiceError>) -> Self {
        Self { outcome: Err(error.into()), predicate: None }
    }

    /// Attach a custom retry predicate that overrides the declared flag and policy sets.
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ServiceError) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn result(&self) -> Option<&T> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&ServiceError> {
        self.outcome.as_ref().err()
    }

    /// Status code of the captured error, if any.
    pub fn code(&self) -> Option<&str> {
        self.error().and_then(ServiceError::code)
    }

    /// Decide whether this response warrants another attempt.
    ///
    /// Order: success is never retried; governance decisions use their own flag; an
    /// attached predicate decides alone; otherwise the declared flag or the retry
    /// policy's exception/status sets.
    pub fn is_retryable(&self, policy: Option<&RetryPolicy>) -> bool {
        let Some(error) = self.error() else {
            return false;
        };
        if let Some(governance) = error.governance() {
            return governance.is_retryable();
        }
        if let Some(predicate) = &self.predicate {
            return predicate(error);
        }
        error.is_retryable() || policy.is_some_and(|p| p.is_retry(error))
    }

    pub fn into_result(self) -> Result<T, ServiceError> {
        self.outcome
    }
}

impl<T: fmt::Debug> fmt::Debug for ClusterResponse<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterResponse")
            .field("outcome", &self.outcome)
            .field("predicate", &self.predicate.as_ref().map(|_| "<predicate>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GovernanceError;
    use std::collections::BTreeSet;

    #[test]
    fn success_is_not_retryable() {
        let response = ClusterResponse::success(5);
        assert!(response.is_success());
        assert_eq!(response.result(), Some(&5));
        assert!(!response.is_retryable(None));
    }

    #[test]
    fn declared_flag_drives_default_classification() {
        let retryable = ClusterResponse::<()>::failure(ServiceError::new("busy").retryable(true));
        let fatal = ClusterResponse::<()>::failure(ServiceError::new("bad request"));
        assert!(retryable.is_retryable(None));
        assert!(!fatal.is_retryable(None));
    }

    #[test]
    fn predicate_overrides_declared_flag() {
        let response = ClusterResponse::<()>::failure(ServiceError::new("busy").retryable(true))
            .with_predicate(|_| false);
        assert!(!response.is_retryable(None));
    }

    #[test]
    fn retry_policy_exception_set_is_consulted() {
        let policy = RetryPolicy {
            retryable_exceptions: Some(BTreeSet::from(["timeout".to_string()])),
            ..Default::default()
        };
        let response =
            ClusterResponse::<()>::failure(ServiceError::new("slow").with_type("timeout"));
        assert!(response.is_retryable(Some(&policy)));
        assert!(!response.is_retryable(None));
    }

    #[test]
    fn configuration_errors_are_not_retryable() {
        let response =
            ClusterResponse::<()>::failure(GovernanceError::NoEndpoint { service: "a".into() });
        assert!(!response.is_retryable(None));
        assert!(response.error().is_some_and(ServiceError::is_configuration));
    }
}
