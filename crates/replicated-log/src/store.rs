//! In-memory log storage and the secondary's out-of-order pending buffer.
//!
//! Both are guarded by a single mutex (spec §5: "PendingBuffer is guarded by
//! LogStore's mutex; they are modified together on flush"). No I/O ever
//! happens while the lock is held.

use std::collections::{BTreeMap, HashMap};

use tokio::sync::Mutex;

use crate::error::CoreError;
use crate::message::Message;

struct Inner {
    messages: BTreeMap<u64, Message>,
    next_id: u64,
    pending: HashMap<u64, Message>,
}

/// Shared, mutex-guarded append-only log plus the secondary's gap buffer.
pub struct LogStore {
    inner: Mutex<Inner>,
}

impl Default for LogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LogStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                messages: BTreeMap::new(),
                next_id: 1,
                pending: HashMap::new(),
            }),
        }
    }

    /// Peek at the next id that would be assigned. Does not mutate.
    pub async fn reserve_id(&self) -> u64 {
        self.inner.lock().await.next_id
    }

    /// Insert `msg`, advancing `next_id`. Idempotent when `msg` byte-equals
    /// an existing record at the same id; conflicting otherwise.
    pub async fn commit(&self, msg: Message) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.messages.get(&msg.id) {
            if existing == &msg {
                return Ok(());
            }
            return Err(CoreError::ConflictingRecord { id: msg.id });
        }
        let next = msg.id + 1;
        inner.messages.insert(msg.id, msg);
        if next > inner.next_id {
            inner.next_id = next;
        }
        Ok(())
    }

    /// Assign the next id and insert the record in one critical section, so
    /// two concurrent callers can never observe the same `next_id` and race
    /// each other into `commit` (spec §9 open question: id reservation must
    /// be atomic with commit). Returns the committed `Message`.
    pub async fn reserve_and_commit(&self, content: String, ts: chrono::DateTime<chrono::Utc>) -> Message {
        let mut inner = self.inner.lock().await;
        let id = inner.next_id;
        let msg = Message::new(id, content, ts);
        inner.messages.insert(id, msg.clone());
        inner.next_id = id + 1;
        msg
    }

    pub async fn get_by_id(&self, id: u64) -> Option<Message> {
        self.inner.lock().await.messages.get(&id).cloned()
    }

    pub async fn list_all(&self) -> Vec<Message> {
        self.inner.lock().await.messages.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.messages.len()
    }

    /// Number of messages currently waiting in the pending (out-of-order)
    /// buffer.
    pub async fn pending_count(&self) -> usize {
        self.inner.lock().await.pending.len()
    }

    /// Buffer `msg` for later (its id is ahead of `next_id`). Overwriting an
    /// existing buffered entry at the same id is only allowed when it is
    /// byte-equal; otherwise a conflict.
    pub async fn buffer(&self, msg: Message) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.pending.get(&msg.id) {
            if existing != &msg {
                return Err(CoreError::ConflictingRecord { id: msg.id });
            }
        }
        inner.pending.insert(msg.id, msg);
        Ok(())
    }

    /// Commit `msg` as the next expected id, then drain any buffered
    /// messages that are now contiguous. Assumes `msg.id == next_id`;
    /// callers (`ReceiverFSM`) are responsible for that check.
    pub async fn commit_and_flush(&self, msg: Message) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.messages.get(&msg.id) {
            if existing != &msg {
                return Err(CoreError::ConflictingRecord { id: msg.id });
            }
        } else {
            inner.messages.insert(msg.id, msg.clone());
        }
        if msg.id + 1 > inner.next_id {
            inner.next_id = msg.id + 1;
        }
        loop {
            let next = inner.next_id;
            match inner.pending.remove(&next) {
                Some(buffered) => {
                    inner.messages.insert(buffered.id, buffered);
                    inner.next_id = next + 1;
                }
                None => break,
            }
        }
        Ok(())
    }
}
