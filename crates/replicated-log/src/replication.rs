//! Per-append fan-out (`Replicator`) and the persistent per-secondary
//! catch-up loop (`ReplicationManager`).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::health::{backoff_for, HealthTracker};
use crate::message::Message;
use crate::store::LogStore;
use crate::transport::Transport;

/// Per-secondary set of ACKed ids, each guarded by its own mutex so the
/// persistent sync loop and concurrent per-append replicators never
/// corrupt one another (spec §5).
pub struct DeliveredSet {
    delivered: HashMap<String, Mutex<HashSet<u64>>>,
}

impl DeliveredSet {
    pub fn new(secondaries: &[String]) -> Self {
        Self {
            delivered: secondaries
                .iter()
                .map(|url| (url.clone(), Mutex::new(HashSet::new())))
                .collect(),
        }
    }

    pub async fn mark(&self, url: &str, id: u64) {
        if let Some(lock) = self.delivered.get(url) {
            lock.lock().await.insert(id);
        }
    }

    pub async fn contains(&self, url: &str, id: u64) -> bool {
        match self.delivered.get(url) {
            Some(lock) => lock.lock().await.contains(&id),
            None => false,
        }
    }

    /// Ids present in `store` but not yet ACKed by `url`, ascending.
    pub async fn missing(&self, url: &str, store: &LogStore) -> Vec<Message> {
        let all = store.list_all().await;
        let Some(lock) = self.delivered.get(url) else {
            return Vec::new();
        };
        let delivered = lock.lock().await;
        let mut missing: Vec<Message> = all.into_iter().filter(|m| !delivered.contains(&m.id)).collect();
        missing.sort_by_key(|m| m.id);
        missing
    }

    pub async fn pending_count(&self, url: &str, store: &LogStore) -> usize {
        self.missing(url, store).await.len()
    }
}

/// Shared completion state for a single `Append`'s fan-out: an ACK counter
/// that a waiter can block on without missing an update that arrived before
/// it started waiting (a plain `Notify` can lose a wakeup in that race).
pub struct AckGate {
    required: usize,
    tx: tokio::sync::watch::Sender<usize>,
}

impl AckGate {
    pub fn new(required: usize) -> Arc<Self> {
        let (tx, _rx) = tokio::sync::watch::channel(0);
        Arc::new(Self { required, tx })
    }

    async fn record_ack(&self) {
        self.tx.send_modify(|count| *count += 1);
    }

    pub fn count(&self) -> usize {
        *self.tx.borrow()
    }

    /// Resolves once the ACK count reaches `required`. Resolves immediately
    /// when `required` is zero (the `w == 1` case never awaits this).
    pub async fn wait_for_threshold(&self) {
        if self.required == 0 {
            return;
        }
        let mut rx = self.tx.subscribe();
        if *rx.borrow() >= self.required {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() >= self.required {
                return;
            }
        }
    }
}

/// Per-append, per-secondary delivery with indefinite health-modulated retry.
/// Cancelled when the owning `Append` request returns.
pub struct Replicator {
    transport: Arc<dyn Transport>,
    health: Arc<HealthTracker>,
    delivered: Arc<DeliveredSet>,
}

impl Replicator {
    pub fn new(transport: Arc<dyn Transport>, health: Arc<HealthTracker>, delivered: Arc<DeliveredSet>) -> Self {
        Self {
            transport,
            health,
            delivered,
        }
    }

    /// Deliver `msg` to `url`, retrying indefinitely with health-modulated
    /// backoff until ACKed or `cancel` fires. On success, increments
    /// `gate`'s counter and records the delivery.
    pub async fn replicate_one(
        &self,
        url: String,
        msg: Message,
        gate: Arc<AckGate>,
        cancel: CancellationToken,
    ) {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return;
            }
            attempt += 1;
            match self.transport.post_replicate(&url, &msg).await {
                Ok(()) => {
                    info!(url = %url, id = msg.id, attempt, "ACK from secondary");
                    self.delivered.mark(&url, msg.id).await;
                    self.health.mark_healthy(&url).await;
                    gate.record_ack().await;
                    return;
                }
                Err(e) => {
                    let status = self.health.status(&url).await;
                    let backoff = backoff_for(status, attempt);
                    warn!(url = %url, id = msg.id, attempt, error = %e, backoff_secs = backoff.as_secs_f64(), "replicate retry");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }
    }

    /// Fire-and-forget delivery used for the `w=1` fast path: bounded by
    /// `max_attempts` (the legacy `repl_retries` knob) with the earlier,
    /// gentler backoff curve. The persistent `ReplicationManager` remains
    /// the liveness backstop once this gives up.
    pub async fn replicate_best_effort(&self, url: String, msg: Message, max_attempts: u32) {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.transport.post_replicate(&url, &msg).await {
                Ok(()) => {
                    info!(url = %url, id = msg.id, attempt, "best-effort ACK from secondary");
                    self.delivered.mark(&url, msg.id).await;
                    self.health.mark_healthy(&url).await;
                    return;
                }
                Err(e) => {
                    if attempt > max_attempts {
                        debug!(url = %url, id = msg.id, attempt, error = %e, "best-effort replication gave up; ReplicationManager will catch up");
                        return;
                    }
                    let backoff = Duration::from_secs_f64((0.25 * attempt as f64).min(1.0));
                    debug!(url = %url, id = msg.id, attempt, error = %e, "best-effort retry");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

/// One persistent loop per secondary, started at process init, reconciling
/// `DeliveredSet` against the log forever.
pub struct ReplicationManager {
    transport: Arc<dyn Transport>,
    health: Arc<HealthTracker>,
    delivered: Arc<DeliveredSet>,
    store: Arc<LogStore>,
    poll_interval: Duration,
}

impl ReplicationManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        health: Arc<HealthTracker>,
        delivered: Arc<DeliveredSet>,
        store: Arc<LogStore>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            transport,
            health,
            delivered,
            store,
            poll_interval,
        }
    }

    pub async fn pending_count(&self, url: &str) -> usize {
        self.delivered.pending_count(url, &self.store).await
    }

    /// Spawn one background task per secondary. Call once at startup.
    pub fn start(self: &Arc<Self>, secondaries: &[String], cancel: CancellationToken) {
        for url in secondaries {
            let manager = Arc::clone(self);
            let url = url.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                manager.sync_loop(url, cancel).await;
            });
        }
    }

    async fn sync_loop(&self, url: String, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(url = %url, "replication manager shutting down");
                    return;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            if self.health.status(&url).await == crate::health::HealthStatus::Unhealthy {
                continue;
            }

            let missing = self.delivered.missing(&url, &self.store).await;
            if missing.is_empty() {
                continue;
            }

            for msg in missing {
                match self.transport.post_replicate(&url, &msg).await {
                    Ok(()) => {
                        self.delivered.mark(&url, msg.id).await;
                        self.health.mark_healthy(&url).await;
                        info!(url = %url, id = msg.id, "sync delivered");
                    }
                    Err(e) => {
                        debug!(url = %url, id = msg.id, error = %e, "sync failed, retrying next tick");
                        break;
                    }
                }
            }
        }
    }
}
