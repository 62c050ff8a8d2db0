//! Core error kinds, surfaced verbatim to clients.
//!
//! These map 1:1 onto spec.md's "Kinds" table. They are never retried
//! locally — retry lives in `Replicator`/`ReplicationManager` for transport
//! errors, which are a separate type (`transport::TransportError`).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("write concern w={got} exceeds available nodes ({max})")]
    InvalidWriteConcern { got: usize, max: usize },

    #[error("{op} only allowed on {required_role}")]
    MethodNotAllowed {
        op: &'static str,
        required_role: &'static str,
    },

    #[error("conflicting record for id={id}: stored payload differs from incoming")]
    ConflictingRecord { id: u64 },

    #[error("unexpected id={id}, expected >= {expected}")]
    UnexpectedId { id: u64, expected: u64 },

    #[error("replication failed: got {got}/{want} secondary ACKs")]
    ReplicationInsufficient { got: usize, want: usize },

    #[error("no quorum: majority of the fleet is unreachable")]
    NoQuorum,
}

/// JSON error body shape for every non-2xx response.
#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl CoreError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CoreError::InvalidWriteConcern { .. } => StatusCode::BAD_REQUEST,
            CoreError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            CoreError::ConflictingRecord { .. } => StatusCode::CONFLICT,
            CoreError::UnexpectedId { .. } => StatusCode::CONFLICT,
            CoreError::ReplicationInsufficient { .. } => StatusCode::BAD_GATEWAY,
            CoreError::NoQuorum => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            detail: self.to_string(),
        };
        (status, axum::Json(body)).into_response()
    }
}
