//! Secondary-side `ReceiveReplication`: dedup + total-ordering state machine.
//!
//! Runs entirely against [`LogStore`]; the flush loop in
//! [`LogStore::commit_and_flush`] holds the store mutex only, never network
//! I/O, per spec §4.6/§5.

use std::sync::Arc;
use std::time::Duration;

use crate::error::CoreError;
use crate::message::{Message, ReplicateAck};
use crate::store::LogStore;

/// Secondary-side inbound replication handling.
pub struct ReceiverFsm {
    store: Arc<LogStore>,
    /// Artificial delay applied before processing, for exercising ordering
    /// under latency (config knob `repl_delay_secs`, default 0).
    delay: Duration,
}

impl ReceiverFsm {
    pub fn new(store: Arc<LogStore>, delay: Duration) -> Self {
        Self { store, delay }
    }

    /// `ReceiveReplication(msg)` per spec §4.6.
    pub async fn receive(&self, msg: Message) -> Result<ReplicateAck, CoreError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(existing) = self.store.get_by_id(msg.id).await {
            if existing == msg {
                return Ok(ReplicateAck::dedup(msg.id));
            }
            return Err(CoreError::ConflictingRecord { id: msg.id });
        }

        let expected = self.store.reserve_id().await;
        if msg.id == expected {
            let id = msg.id;
            self.store.commit_and_flush(msg).await?;
            Ok(ReplicateAck::ok(id))
        } else if msg.id > expected {
            let id = msg.id;
            self.store.buffer(msg).await?;
            Ok(ReplicateAck::buffered(id))
        } else {
            Err(CoreError::UnexpectedId {
                id: msg.id,
                expected,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn msg(id: u64, content: &str) -> Message {
        Message::new(id, content, Utc::now())
    }

    fn fsm() -> ReceiverFsm {
        ReceiverFsm::new(Arc::new(LogStore::new()), Duration::ZERO)
    }

    #[tokio::test]
    async fn s5_out_of_order_then_gap_closes() {
        let fsm = fsm();
        let ack = fsm.receive(msg(3, "c")).await.unwrap();
        assert_eq!(ack.buffered, Some(true));
        assert!(fsm.store.list_all().await.is_empty());

        let ack = fsm.receive(msg(1, "a")).await.unwrap();
        assert_eq!(ack.status, "ok");
        assert!(ack.buffered.is_none());

        let ack = fsm.receive(msg(2, "b")).await.unwrap();
        assert_eq!(ack.status, "ok");

        let ids: Vec<_> = fsm.store.list_all().await.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn s6_dedup_and_conflict() {
        let fsm = fsm();
        let m = msg(1, "a");
        fsm.receive(m.clone()).await.unwrap();

        let ack = fsm.receive(m.clone()).await.unwrap();
        assert_eq!(ack.dedup, Some(true));

        let err = fsm.receive(msg(1, "different")).await.unwrap_err();
        assert!(matches!(err, CoreError::ConflictingRecord { id: 1 }));
    }

    #[tokio::test]
    async fn replication_delay_is_honored() {
        let store = Arc::new(LogStore::new());
        let fsm = ReceiverFsm::new(Arc::clone(&store), Duration::from_millis(20));
        let start = std::time::Instant::now();
        fsm.receive(msg(1, "a")).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
