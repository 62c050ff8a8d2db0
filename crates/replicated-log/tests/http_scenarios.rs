//! End-to-end scenarios (spec.md §8) driven over real HTTP against real
//! axum servers bound to ephemeral ports, mirroring spec.md's literal S1-S6
//! acceptance scenarios.

use std::sync::Arc;
use std::time::Duration;

use replicated_log::transport::ReplicaClient;
use replicated_log::{Config, ServerContext};
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Spawns a real server on an ephemeral port and returns its base URL plus
/// the `CancellationToken` that shuts down its background loops.
async fn spawn_node(config: Config) -> (String, CancellationToken) {
    let transport: Arc<dyn replicated_log::transport::Transport> = Arc::new(ReplicaClient::new(
        Duration::from_secs(config.repl_timeout_secs),
        Duration::from_secs(config.heartbeat_timeout_secs),
    ));
    let ctx = Arc::new(ServerContext::new(&config, Arc::clone(&transport)));
    let cancel = CancellationToken::new();
    ctx.spawn_background_tasks(transport, cancel.clone());

    let app = replicated_log::http::router(ctx);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel_for_serve = cancel.clone();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel_for_serve.cancelled().await })
            .await
            .unwrap();
    });

    (format!("http://{addr}"), cancel)
}

fn secondary_config() -> Config {
    let mut c = Config::default();
    c.role = "secondary".to_string();
    c
}

fn primary_config(secondaries: &[&str]) -> Config {
    let mut c = Config::default();
    c.role = "primary".to_string();
    c.secondaries = secondaries.iter().map(|s| s.to_string()).collect();
    c.repl_timeout_secs = 5;
    c.sync_poll_interval_secs = 1;
    c
}

#[tokio::test]
async fn s1_w1_fast_path_no_secondaries() {
    let (primary_url, _cancel) = spawn_node(primary_config(&[])).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{primary_url}/messages"))
        .json(&json!({ "content": "a", "w": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let msg: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(msg["id"], 1);

    let resp = client.get(format!("{primary_url}/messages")).send().await.unwrap();
    let all: Vec<serde_json::Value> = resp.json().await.unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn s2_w2_replicates_to_two_secondaries() {
    let (s1_url, _s1_cancel) = spawn_node(secondary_config()).await;
    let (s2_url, _s2_cancel) = spawn_node(secondary_config()).await;
    let (primary_url, _p_cancel) = spawn_node(primary_config(&[&s1_url, &s2_url])).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{primary_url}/messages"))
        .json(&json!({ "content": "x", "w": 2 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Within a handful of sync ticks, both secondaries converge.
    for url in [&s1_url, &s2_url] {
        let mut seen = false;
        for _ in 0..50 {
            let resp = client.get(format!("{url}/messages")).send().await.unwrap();
            let all: Vec<serde_json::Value> = resp.json().await.unwrap();
            if all.iter().any(|m| m["content"] == "x") {
                seen = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        assert!(seen, "secondary {url} never converged");
    }
}

#[tokio::test]
async fn s3_write_concern_exceeding_fleet_is_rejected() {
    let (s1_url, _c1) = spawn_node(secondary_config()).await;
    let (s2_url, _c2) = spawn_node(secondary_config()).await;
    let (primary_url, _pc) = spawn_node(primary_config(&[&s1_url, &s2_url])).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{primary_url}/messages"))
        .json(&json!({ "content": "y", "w": 4 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn append_on_secondary_is_rejected() {
    let (secondary_url, _cancel) = spawn_node(secondary_config()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{secondary_url}/messages"))
        .json(&json!({ "content": "nope", "w": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 405);
}

#[tokio::test]
async fn s6_replicate_dedup_and_conflict_over_http() {
    let (secondary_url, _cancel) = spawn_node(secondary_config()).await;
    let client = reqwest::Client::new();
    let ts = chrono::Utc::now().to_rfc3339();

    let body = json!({ "id": 1, "content": "hello", "ts": ts });
    let resp = client
        .post(format!("{secondary_url}/replicate"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Replaying the identical message dedups.
    let resp = client
        .post(format!("{secondary_url}/replicate"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let ack: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(ack["dedup"], true);

    // Same id, different content conflicts.
    let conflicting = json!({ "id": 1, "content": "different", "ts": ts });
    let resp = client
        .post(format!("{secondary_url}/replicate"))
        .json(&conflicting)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
}

#[tokio::test]
async fn s5_out_of_order_replication_buffers_then_flushes() {
    let (secondary_url, _cancel) = spawn_node(secondary_config()).await;
    let client = reqwest::Client::new();
    let ts = chrono::Utc::now().to_rfc3339();

    let resp = client
        .post(format!("{secondary_url}/replicate"))
        .json(&json!({ "id": 3, "content": "c", "ts": ts }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let ack: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(ack["buffered"], true);

    let resp = client.get(format!("{secondary_url}/messages")).send().await.unwrap();
    let all: Vec<serde_json::Value> = resp.json().await.unwrap();
    assert!(all.is_empty());

    client
        .post(format!("{secondary_url}/replicate"))
        .json(&json!({ "id": 1, "content": "a", "ts": ts }))
        .send()
        .await
        .unwrap();
    client
        .post(format!("{secondary_url}/replicate"))
        .json(&json!({ "id": 2, "content": "b", "ts": ts }))
        .send()
        .await
        .unwrap();

    let resp = client.get(format!("{secondary_url}/messages")).send().await.unwrap();
    let all: Vec<serde_json::Value> = resp.json().await.unwrap();
    let ids: Vec<u64> = all.iter().map(|m| m["id"].as_u64().unwrap()).collect();
    assert_eq!(ids, vec![1, 2, 3]);
}
