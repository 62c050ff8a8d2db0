//! Thin HTTP binding (spec §1: "transport ... is out of scope", bound here
//! per SPEC_FULL's ambient-stack expansion). No business logic lives here:
//! every handler deserializes, calls straight into [`ServerContext`], and
//! serializes the result.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::message::{AppendIn, Message};
use crate::{CoreError, ServerContext};

pub fn router(ctx: Arc<ServerContext>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/messages", get(list_all).post(append))
        .route("/replicate", post(receive_replication))
        .with_state(ctx)
}

async fn health(State(ctx): State<Arc<ServerContext>>) -> Response {
    let snapshot = ctx.health_snapshot().await;

    let secondaries: serde_json::Map<String, serde_json::Value> = snapshot
        .secondaries
        .iter()
        .map(|(url, s)| {
            (
                url.clone(),
                json!({
                    "status": health_status_str(s.status),
                    "missed": s.missed,
                    "last_seen": s.last_seen,
                    "pending_messages": s.pending_messages,
                }),
            )
        })
        .collect();

    let mut body = json!({
        "ok": snapshot.ok,
        "role": snapshot.role.as_str(),
        "self_check": snapshot.self_check,
        "message_count": snapshot.message_count,
        "pending_out_of_order": snapshot.pending_out_of_order,
    });

    if !secondaries.is_empty() || snapshot.has_quorum.is_some() {
        body["secondaries"] = serde_json::Value::Object(secondaries);
    }
    if let Some(has_quorum) = snapshot.has_quorum {
        body["has_quorum"] = json!(has_quorum);
    }

    Json(body).into_response()
}

fn health_status_str(status: crate::health::HealthStatus) -> &'static str {
    use crate::health::HealthStatus::*;
    match status {
        Healthy => "healthy",
        Suspected => "suspected",
        Unhealthy => "unhealthy",
    }
}

async fn list_all(State(ctx): State<Arc<ServerContext>>) -> Json<Vec<Message>> {
    Json(ctx.list_all().await)
}

async fn append(State(ctx): State<Arc<ServerContext>>, Json(input): Json<AppendIn>) -> Response {
    if input.content.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "detail": "content must be non-empty" })),
        )
            .into_response();
    }
    match ctx.append(input.content, input.w).await {
        Ok(msg) => Json(msg).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn receive_replication(
    State(ctx): State<Arc<ServerContext>>,
    Json(msg): Json<Message>,
) -> Result<Response, CoreError> {
    let ack = ctx.receive_replication(msg).await?;
    Ok(Json(ack).into_response())
}
