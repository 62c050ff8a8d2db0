//! Core of a primary/secondary replicated append-only log.
//!
//! This crate is the transport-agnostic core described by the design: an
//! in-memory ordered log, a bounded-ACK fan-out on append, a persistent
//! per-secondary catch-up loop, and a heartbeat-driven health tracker. The
//! HTTP binding in [`http`] is a thin adapter; all coordination logic lives
//! in the other modules and is exercised directly in their `#[cfg(test)]`
//! modules without going through HTTP at all.

pub mod appender;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod message;
pub mod receiver;
pub mod replication;
pub mod store;
pub mod telemetry;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

pub use config::Config;
pub use error::CoreError;
pub use message::Message;

use appender::Appender;
use health::HealthTracker;
use receiver::ReceiverFsm;
use replication::{DeliveredSet, ReplicationManager};
use store::LogStore;
use transport::Transport;

/// Which half of the primary/secondary split this process is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    Secondary,
}

impl Role {
    /// Accepts `"primary"` and the config table's legacy `"master"` spelling
    /// (see DESIGN.md) as synonyms; anything else is `Secondary`.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "primary" | "master" => Role::Primary,
            _ => Role::Secondary,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Primary => "primary",
            Role::Secondary => "secondary",
        }
    }
}

/// Everything an `Append`/`ReceiveReplication`/`ListAll`/`Health` call needs,
/// constructed once at process startup and shared through `Arc` (spec §9:
/// "explicitly constructed components wired into a server context at
/// startup" rather than process-wide singletons).
pub struct ServerContext {
    pub role: Role,
    pub store: Arc<LogStore>,
    pub health: Option<Arc<HealthTracker>>,
    pub replication: Option<Arc<ReplicationManager>>,
    appender: Option<Appender>,
    receiver: Option<ReceiverFsm>,
    secondaries: Vec<String>,
}

impl ServerContext {
    /// Wire up a context for `config`, using `transport` for all outbound
    /// replication and health calls. Does not start any background loops;
    /// call [`ServerContext::spawn_background_tasks`] once after construction.
    pub fn new(config: &Config, transport: Arc<dyn Transport>) -> Self {
        let role = Role::parse(&config.role);
        let store = Arc::new(LogStore::new());

        match role {
            Role::Primary => {
                let health = Arc::new(HealthTracker::new(
                    &config.secondaries,
                    config.suspect_threshold,
                    config.unhealthy_threshold,
                    Duration::from_secs(config.heartbeat_interval_secs),
                    Duration::from_secs(config.heartbeat_timeout_secs),
                ));
                let delivered = Arc::new(DeliveredSet::new(&config.secondaries));
                let replication = Arc::new(ReplicationManager::new(
                    Arc::clone(&transport),
                    Arc::clone(&health),
                    Arc::clone(&delivered),
                    Arc::clone(&store),
                    Duration::from_secs(config.sync_poll_interval_secs),
                ));
                let appender = Appender::new(
                    Arc::clone(&store),
                    transport,
                    Arc::clone(&health),
                    delivered,
                    config,
                );
                Self {
                    role,
                    store,
                    health: Some(health),
                    replication: Some(replication),
                    appender: Some(appender),
                    receiver: None,
                    secondaries: config.secondaries.clone(),
                }
            }
            Role::Secondary => {
                let receiver = ReceiverFsm::new(
                    Arc::clone(&store),
                    Duration::from_secs(config.repl_delay_secs),
                );
                Self {
                    role,
                    store,
                    health: None,
                    replication: None,
                    appender: None,
                    receiver: Some(receiver),
                    secondaries: Vec::new(),
                }
            }
        }
    }

    /// Start the persistent background loops (HealthTracker heartbeat,
    /// ReplicationManager catch-up, one per secondary). No-op on a
    /// secondary. `transport` is re-passed because the loops outlive any
    /// single request and need their own clone of the `Arc`.
    pub fn spawn_background_tasks(&self, transport: Arc<dyn Transport>, cancel: CancellationToken) {
        if let Some(health) = &self.health {
            health.start(Arc::clone(&transport), cancel.clone());
            info!("health tracker started for {} secondaries", self.secondaries.len());
        }
        if let Some(replication) = &self.replication {
            replication.start(&self.secondaries, cancel);
            info!("replication manager started for {} secondaries", self.secondaries.len());
        }
    }

    pub async fn append(&self, content: String, w: usize) -> Result<Message, CoreError> {
        match &self.appender {
            Some(appender) => appender.append(content, w).await,
            None => Err(CoreError::MethodNotAllowed {
                op: "Append",
                required_role: "primary",
            }),
        }
    }

    pub async fn receive_replication(&self, msg: Message) -> Result<message::ReplicateAck, CoreError> {
        match &self.receiver {
            Some(receiver) => receiver.receive(msg).await,
            None => Err(CoreError::MethodNotAllowed {
                op: "ReceiveReplication",
                required_role: "secondary",
            }),
        }
    }

    pub async fn list_all(&self) -> Vec<Message> {
        self.store.list_all().await
    }

    pub async fn health_snapshot(&self) -> HealthSnapshot {
        let message_count = self.store.len().await;
        let pending_out_of_order = self.store.pending_count().await;

        let mut secondaries = std::collections::BTreeMap::new();
        let mut has_quorum = None;

        if let (Some(health), Some(replication)) = (&self.health, &self.replication) {
            for url in &self.secondaries {
                secondaries.insert(
                    url.clone(),
                    SecondaryHealth {
                        status: health.status(url).await,
                        missed: health.missed(url).await,
                        last_seen: health.last_seen(url).await,
                        pending_messages: replication.pending_count(url).await,
                    },
                );
            }
            has_quorum = Some(health.has_quorum().await);
        }

        HealthSnapshot {
            ok: true,
            role: self.role,
            self_check: "passed",
            message_count,
            pending_out_of_order,
            secondaries,
            has_quorum,
        }
    }
}

/// Per-secondary entry in the `Health` response.
pub struct SecondaryHealth {
    pub status: health::HealthStatus,
    pub missed: u32,
    pub last_seen: Option<chrono::DateTime<chrono::Utc>>,
    pub pending_messages: usize,
}

/// `Health` operation output (spec §6). `secondaries` and `has_quorum` are
/// empty/`None` on a secondary node, matching the bracketed-optional fields
/// in the interface table.
pub struct HealthSnapshot {
    pub ok: bool,
    pub role: Role,
    pub self_check: &'static str,
    pub message_count: usize,
    pub pending_out_of_order: usize,
    pub secondaries: std::collections::BTreeMap<String, SecondaryHealth>,
    pub has_quorum: Option<bool>,
}
