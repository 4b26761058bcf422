//! Failover limits: how many additional attempts and how much wall-clock time a call
//! may consume.

use std::time::Duration;

/// Failover policy. `retry` counts attempts beyond the first, so `retry = 2` allows
/// three attempts in total.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct FailoverPolicy {
    pub id: Option<u64>,
    pub retry: Option<u32>,
    pub timeout_in_milliseconds: Option<u64>,
}

crate::policy::inherit_fields!(FailoverPolicy { retry, timeout_in_milliseconds });

impl FailoverPolicy {
    /// Total wall-clock budget, measured from the start of the first attempt.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_in_milliseconds.map(Duration::from_millis)
    }
}
