//! Minimal transport abstraction the core depends on.
//!
//! `Replicator`, `ReplicationManager` and `HealthTracker` only ever talk to
//! secondaries through this trait. The only concrete implementation
//! (`ReplicaClient`) is a thin `reqwest` wrapper; everything it touches —
//! HTTP, timeouts, serialization — is an external concern per spec.md §1.

use std::time::Duration;

use async_trait::async_trait;

use crate::message::Message;

/// Errors from talking to a secondary. Replicator and ReplicationManager
/// treat all four identically (retry); HealthTracker treats all as a missed
/// beat.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("timed out calling {0}")]
    Timeout(String),
    #[error("failed to connect to {0}: {1}")]
    ConnectError(String, String),
    #[error("{0} returned HTTP {1}")]
    HttpStatusError(String, u16),
    #[error("{0} returned a malformed ACK body: {1}")]
    BadAckShape(String, String),
}

/// The two synchronous capabilities the core needs per secondary URL.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_replicate(&self, url: &str, msg: &Message) -> Result<(), TransportError>;
    async fn get_health(&self, url: &str) -> Result<(), TransportError>;
}

/// `reqwest`-backed implementation of [`Transport`].
pub struct ReplicaClient {
    client: reqwest::Client,
    repl_timeout: Duration,
    heartbeat_timeout: Duration,
}

impl ReplicaClient {
    pub fn new(repl_timeout: Duration, heartbeat_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            repl_timeout,
            heartbeat_timeout,
        }
    }
}

#[async_trait]
impl Transport for ReplicaClient {
    async fn post_replicate(&self, url: &str, msg: &Message) -> Result<(), TransportError> {
        let target = format!("{}/replicate", url.trim_end_matches('/'));
        let resp = self
            .client
            .post(&target)
            .timeout(self.repl_timeout)
            .json(msg)
            .send()
            .await
            .map_err(|e| classify(&target, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatusError(target, status.as_u16()));
        }

        let ack: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| TransportError::BadAckShape(target.clone(), e.to_string()))?;

        match ack.get("status").and_then(|v| v.as_str()) {
            Some("ok") => Ok(()),
            other => Err(TransportError::BadAckShape(
                target,
                format!("unexpected status field: {other:?}"),
            )),
        }
    }

    async fn get_health(&self, url: &str) -> Result<(), TransportError> {
        let target = format!("{}/health", url.trim_end_matches('/'));
        let resp = self
            .client
            .get(&target)
            .timeout(self.heartbeat_timeout)
            .send()
            .await
            .map_err(|e| classify(&target, e))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::HttpStatusError(target, resp.status().as_u16()))
        }
    }
}

fn classify(target: &str, e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(target.to_string())
    } else if e.is_connect() {
        TransportError::ConnectError(target.to_string(), e.to_string())
    } else {
        TransportError::ConnectError(target.to_string(), e.to_string())
    }
}
