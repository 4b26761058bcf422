//! Retry classification policy: which failures are worth another attempt, and how long
//! to wait between attempts.

use crate::error::ServiceError;
use std::collections::BTreeSet;
use std::time::Duration;

/// Retry policy attached to a service or method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct RetryPolicy {
    pub id: Option<u64>,
    /// Additional attempts beyond the first.
    pub retry: Option<u32>,
    /// Delay between attempts, in milliseconds.
    pub retry_interval: Option<u64>,
    /// Total budget in milliseconds.
    pub timeout: Option<u64>,
    pub retryable_status_codes: Option<BTreeSet<String>>,
    /// Error type names that are retryable.
    pub retryable_exceptions: Option<BTreeSet<String>>,
}

crate::policy::inherit_fields!(RetryPolicy {
    retry,
    retry_interval,
    timeout,
    retryable_status_codes,
    retryable_exceptions,
});

impl RetryPolicy {
    /// Whether `error` matches the configured status codes or error types.
    pub fn is_retry(&self, error: &ServiceError) -> bool {
        let status_match = match (&self.retryable_status_codes, error.code()) {
            (Some(codes), Some(code)) => codes.contains(code),
            _ => false,
        };
        status_match
            || self.retryable_exceptions.as_ref().is_some_and(|set| Self::matches_types(set, error))
    }

    /// True when any type in the error's cause chain is in `types`.
    pub fn matches_types(types: &BTreeSet<String>, error: &ServiceError) -> bool {
        error.types().iter().any(|t| types.contains(t))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval.unwrap_or(0))
    }
}
