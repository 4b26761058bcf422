//! Request capability set supplied by transport adapters.

use std::collections::HashMap;

/// Header carrying the target lane of a call.
pub const HEADER_LANE: &str = "x-live-lane";
/// Header carrying the target live unit of a call.
pub const HEADER_UNIT: &str = "x-live-unit";

/// Direction of a governed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestKind {
    /// A call received by this process.
    Inbound,
    /// A call issued by this process.
    #[default]
    Outbound,
}

/// View over a transport specific request.
///
/// Adapters implement this for their native request type; the governance core only
/// reads through it.
pub trait ServiceRequest: Send + Sync {
    /// Logical service name.
    fn service(&self) -> &str;

    /// Service group; `None` means the default group.
    fn group(&self) -> Option<&str> {
        None
    }

    /// Method (or path) being called.
    fn method(&self) -> Option<&str>;

    /// Header or attachment value.
    fn header(&self, _key: &str) -> Option<&str> {
        None
    }

    /// Cookie value.
    fn cookie(&self, _key: &str) -> Option<&str> {
        None
    }

    /// Sticky session identifier, when the caller pins a session to an instance.
    fn sticky_id(&self) -> Option<&str> {
        None
    }

    fn kind(&self) -> RequestKind {
        RequestKind::Outbound
    }

    /// Remote address of the caller; only meaningful for inbound requests.
    fn client_ip(&self) -> Option<&str> {
        None
    }
}

/// Owned request description for adapters that can materialize their request.
#[derive(Debug, Clone, Default)]
pub struct SimpleRequest {
    service: String,
    group: Option<String>,
    method: Option<String>,
    headers: HashMap<String, String>,
    cookies: HashMap<String, String>,
    sticky_id: Option<String>,
    kind: RequestKind,
    client_ip: Option<String>,
}

impl SimpleRequest {
    /// Outbound request to `service`.
    pub fn outbound(service: impl Into<String>) -> Self {
        Self { service: service.into(), ..Default::default() }
    }

    /// Inbound request for `service` received from `client_ip`.
    pub fn inbound(service: impl Into<String>, client_ip: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            kind: RequestKind::Inbound,
            client_ip: Some(client_ip.into()),
            ..Default::default()
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_cookie(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(key.into(), value.into());
        self
    }

    pub fn with_sticky_id(mut self, sticky_id: impl Into<String>) -> Self {
        self.sticky_id = Some(sticky_id.into());
        self
    }
}

impl ServiceRequest for SimpleRequest {
    fn service(&self) -> &str {
        &self.service
    }

    fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    fn cookie(&self, key: &str) -> Option<&str> {
        self.cookies.get(key).map(String::as_str)
    }

    fn sticky_id(&self) -> Option<&str> {
        self.sticky_id.as_deref()
    }

    fn kind(&self) -> RequestKind {
        self.kind
    }

    fn client_ip(&self) -> Option<&str> {
        match self.kind {
            RequestKind::Inbound => self.client_ip.as_deref(),
            RequestKind::Outbound => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_request_has_no_client_ip() {
        let request = SimpleRequest::outbound("order").with_method("placeOrder");
        assert_eq!(request.kind(), RequestKind::Outbound);
        assert_eq!(request.client_ip(), None);
        assert_eq!(request.method(), Some("placeOrder"));
        assert_eq!(request.group(), None);
    }

    #[test]
    fn inbound_request_exposes_client_ip_and_headers() {
        let request = SimpleRequest::inbound("order", "192.168.1.9")
            .with_header(HEADER_LANE, "gray")
            .with_cookie("SESSION", "abc");
        assert_eq!(request.client_ip(), Some("192.168.1.9"));
        assert_eq!(request.header(HEADER_LANE), Some("gray"));
        assert_eq!(request.cookie("SESSION"), Some("abc"));
        assert_eq!(request.header("missing"), None);
    }
}
