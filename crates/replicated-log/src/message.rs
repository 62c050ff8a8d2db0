//! Wire and storage types for the replicated log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A committed log entry. Immutable once stored.
///
/// `id` is assigned exclusively by the primary. `ts` always travels with the
/// message on the wire, including on replication — secondaries commit the
/// primary's timestamp verbatim rather than re-stamping locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub content: String,
    pub ts: DateTime<Utc>,
}

impl Message {
    pub fn new(id: u64, content: impl Into<String>, ts: DateTime<Utc>) -> Self {
        Self {
            id,
            content: content.into(),
            ts,
        }
    }
}

/// Client-facing append request body.
#[derive(Debug, Clone, Deserialize)]
pub struct AppendIn {
    pub content: String,
    #[serde(default = "default_write_concern")]
    pub w: usize,
}

fn default_write_concern() -> usize {
    1
}

/// Acknowledgement returned by `POST /replicate`. Only ever serialized
/// (the transport parses acks via `serde_json::Value`), so this does not
/// derive `Deserialize`: a `&'static str` field can't satisfy serde's
/// borrowed-`&'de str` deserialization.
#[derive(Debug, Clone, Serialize)]
pub struct ReplicateAck {
    pub status: &'static str,
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedup: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffered: Option<bool>,
}

impl ReplicateAck {
    pub fn ok(id: u64) -> Self {
        Self {
            status: "ok",
            id,
            dedup: None,
            buffered: None,
        }
    }

    pub fn dedup(id: u64) -> Self {
        Self {
            status: "ok",
            id,
            dedup: Some(true),
            buffered: None,
        }
    }

    pub fn buffered(id: u64) -> Self {
        Self {
            status: "ok",
            id,
            dedup: None,
            buffered: Some(true),
        }
    }
}
