#![allow(dead_code)]

use async_trait::async_trait;
use lanegov::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// What an endpoint answers with.
#[derive(Debug, Clone)]
pub enum Reply {
    Ok,
    Fail { retryable: bool, code: &'static str },
}

/// Cluster whose endpoints answer from a per-host script.
#[derive(Debug, Default)]
pub struct ScriptedCluster {
    endpoints: Vec<EndpointRef>,
    replies: HashMap<String, Reply>,
    calls: AtomicU32,
    invoked: Mutex<Vec<String>>,
}

impl ScriptedCluster {
    pub fn new(endpoints: Vec<EndpointRef>) -> Self {
        Self { endpoints, ..Default::default() }
    }

    pub fn hosts(hosts: &[&str]) -> Self {
        Self::new(hosts.iter().map(|h| SimpleEndpoint::new(*h, 80).shared()).collect())
    }

    pub fn reply(mut self, host: &str, reply: Reply) -> Self {
        self.replies.insert(host.to_string(), reply);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn invoked(&self) -> Vec<String> {
        self.invoked.lock().unwrap().clone()
    }
}

#[async_trait]
impl Cluster for ScriptedCluster {
    type Request = SimpleRequest;
    type Output = String;

    async fn route(&self, _request: &SimpleRequest) -> Result<Vec<EndpointRef>, GovernanceError> {
        Ok(self.endpoints.clone())
    }

    async fn invoke(&self, _request: &SimpleRequest, endpoint: &EndpointRef) -> ClusterResponse<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.invoked.lock().unwrap().push(endpoint.host().to_string());
        match self.replies.get(endpoint.host()).cloned().unwrap_or(Reply::Ok) {
            Reply::Ok => ClusterResponse::success(endpoint.host().to_string()),
            Reply::Fail { retryable, code } => ClusterResponse::failure(
                ServiceError::new(format!("attempt {n} on {} failed", endpoint.host()))
                    .retryable(retryable)
                    .with_code(code),
            ),
        }
    }
}

pub fn unavailable() -> Reply {
    Reply::Fail { retryable: true, code: "503" }
}
