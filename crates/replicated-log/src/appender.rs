//! Primary-side `Append` operation: local commit + bounded-ACK fan-out.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::error::CoreError;
use crate::health::HealthTracker;
use crate::message::Message;
use crate::replication::{AckGate, DeliveredSet, Replicator};
use crate::store::LogStore;
use crate::transport::Transport;

pub struct Appender {
    store: Arc<LogStore>,
    replicator: Arc<Replicator>,
    health: Arc<HealthTracker>,
    secondaries: Vec<String>,
    repl_retries: u32,
    gate_quorum: bool,
    /// Upper bound on how long `Append` blocks waiting for ACKs under
    /// `w > 1`. Spec §5 leaves this as an open question ("no wall-clock
    /// deadline ... blocks until ACKs arrive or all per-request tasks give
    /// up"); since per-request tasks retry indefinitely on failure they
    /// never "give up" on their own, so this deadline is what actually
    /// bounds the wait. It reuses `repl_timeout_secs`, matching the
    /// acceptance scenario's client-side timeout of the same value
    /// (see DESIGN.md).
    append_deadline: Duration,
}

impl Appender {
    pub fn new(
        store: Arc<LogStore>,
        transport: Arc<dyn Transport>,
        health: Arc<HealthTracker>,
        delivered: Arc<DeliveredSet>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            replicator: Arc::new(Replicator::new(transport, Arc::clone(&health), delivered)),
            health,
            secondaries: config.secondaries.clone(),
            repl_retries: config.repl_retries,
            gate_quorum: config.gate_writes_on_quorum,
            append_deadline: Duration::from_secs(config.repl_timeout_secs),
        }
    }

    #[cfg(test)]
    pub fn with_append_deadline(mut self, deadline: Duration) -> Self {
        self.append_deadline = deadline;
        self
    }

    /// `Append(content, w)` per spec §4.2.
    pub async fn append(&self, content: String, w: usize) -> Result<Message, CoreError> {
        let max_w = 1 + self.secondaries.len();
        if w < 1 || w > max_w {
            return Err(CoreError::InvalidWriteConcern { got: w, max: max_w });
        }

        if self.gate_quorum && !self.health.has_quorum().await {
            return Err(CoreError::NoQuorum);
        }

        let msg = self.store.reserve_and_commit(content, Utc::now()).await;
        info!(id = msg.id, content_len = msg.content.len(), "committed locally");

        if self.secondaries.is_empty() {
            return Ok(msg);
        }

        let required_acks = w - 1;

        if required_acks == 0 {
            // w == 1: fire-and-forget, bounded by the legacy repl_retries
            // knob; ReplicationManager is the liveness backstop.
            for url in &self.secondaries {
                let replicator = Arc::clone(&self.replicator);
                let url = url.clone();
                let msg = msg.clone();
                let max_attempts = self.repl_retries;
                tokio::spawn(async move {
                    replicator.replicate_best_effort(url, msg, max_attempts).await;
                });
            }
            info!(id = msg.id, "w=1 satisfied, replication continues in background");
            return Ok(msg);
        }

        let gate = AckGate::new(required_acks);
        let cancel = CancellationToken::new();
        let mut handles = Vec::with_capacity(self.secondaries.len());
        for url in &self.secondaries {
            let replicator = Arc::clone(&self.replicator);
            let url = url.clone();
            let msg = msg.clone();
            let gate = Arc::clone(&gate);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                replicator.replicate_one(url, msg, gate, cancel).await;
            }));
        }

        tokio::select! {
            _ = gate.wait_for_threshold() => {}
            _ = futures::future::join_all(handles) => {}
            _ = tokio::time::sleep(self.append_deadline) => {}
        }
        cancel.cancel();

        let got = gate.count();
        if got >= required_acks {
            info!(id = msg.id, w, got, "write concern satisfied");
            Ok(msg)
        } else {
            tracing::error!(id = msg.id, w, got, required_acks, "write concern not met");
            Err(CoreError::ReplicationInsufficient {
                got,
                want: required_acks,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;

    /// A transport whose secondaries can be individually toggled paused
    /// (mirrors S4's "secondary paused" scenario).
    struct FakeTransport {
        paused: StdMutex<HashSet<String>>,
    }

    impl FakeTransport {
        fn new() -> Self {
            Self {
                paused: StdMutex::new(HashSet::new()),
            }
        }

        fn pause(&self, url: &str) {
            self.paused.lock().unwrap().insert(url.to_string());
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn post_replicate(&self, url: &str, _msg: &Message) -> Result<(), TransportError> {
            if self.paused.lock().unwrap().contains(url) {
                Err(TransportError::ConnectError(url.to_string(), "paused".into()))
            } else {
                Ok(())
            }
        }
        async fn get_health(&self, url: &str) -> Result<(), TransportError> {
            if self.paused.lock().unwrap().contains(url) {
                Err(TransportError::ConnectError(url.to_string(), "paused".into()))
            } else {
                Ok(())
            }
        }
    }

    fn test_config(secondaries: &[&str]) -> Config {
        let mut config = Config::default();
        config.secondaries = secondaries.iter().map(|s| s.to_string()).collect();
        config
    }

    fn harness(config: &Config, transport: Arc<dyn Transport>) -> (Arc<LogStore>, Appender) {
        let store = Arc::new(LogStore::new());
        let health = Arc::new(HealthTracker::new(
            &config.secondaries,
            config.suspect_threshold,
            config.unhealthy_threshold,
            Duration::from_secs(config.heartbeat_interval_secs),
            Duration::from_secs(config.heartbeat_timeout_secs),
        ));
        let delivered = Arc::new(DeliveredSet::new(&config.secondaries));
        let appender = Appender::new(Arc::clone(&store), transport, health, delivered, config)
            .with_append_deadline(Duration::from_millis(300));
        (store, appender)
    }

    #[tokio::test]
    async fn s1_w1_no_secondaries() {
        let config = test_config(&[]);
        let (store, appender) = harness(&config, Arc::new(FakeTransport::new()));

        let msg = appender.append("a".to_string(), 1).await.unwrap();
        assert_eq!(msg.id, 1);
        assert_eq!(store.list_all().await.len(), 1);
    }

    #[tokio::test]
    async fn s3_w_exceeds_fleet_is_rejected() {
        let config = test_config(&["http://s1", "http://s2"]);
        let (_store, appender) = harness(&config, Arc::new(FakeTransport::new()));

        let err = appender.append("y".to_string(), 4).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidWriteConcern { got: 4, max: 3 }));
    }

    #[tokio::test]
    async fn s2_w2_returns_after_first_ack() {
        let config = test_config(&["http://s1", "http://s2"]);
        let (_store, appender) = harness(&config, Arc::new(FakeTransport::new()));

        let msg = appender.append("x".to_string(), 2).await.unwrap();
        assert_eq!(msg.content, "x");
    }

    #[tokio::test]
    async fn s4_replication_insufficient_when_secondary_paused() {
        let fake = Arc::new(FakeTransport::new());
        fake.pause("http://s2");
        let config = test_config(&["http://s1", "http://s2"]);
        let (store, appender) = harness(&config, fake);

        // Msg1 w=1 ok
        appender.append("Msg1".to_string(), 1).await.unwrap();
        // Msg2 w=2: only s1 needs to ack
        appender.append("Msg2".to_string(), 2).await.unwrap();
        // Msg3 w=3: needs both s1 and s2, s2 is paused -> insufficient
        let err = appender.append("Msg3".to_string(), 3).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::ReplicationInsufficient { got: 1, want: 2 }
        ));
        // the record is still committed locally despite the failed write concern
        let ids: Vec<_> = store.list_all().await.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        // Msg4 w=1 ok, unaffected by s2 being down
        appender.append("Msg4".to_string(), 1).await.unwrap();
        assert_eq!(store.list_all().await.len(), 4);
    }
}
