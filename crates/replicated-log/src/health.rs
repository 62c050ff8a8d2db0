//! Heartbeat-driven health FSM.
//!
//! One record per configured secondary. Status transitions happen only
//! here; every other component reads through [`HealthTracker::status`] /
//! [`HealthTracker::has_quorum`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Suspected,
    Unhealthy,
}

impl serde::Serialize for HealthStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Suspected => "suspected",
            HealthStatus::Unhealthy => "unhealthy",
        };
        serializer.serialize_str(s)
    }
}

#[derive(Debug, Clone)]
struct HealthRecord {
    status: HealthStatus,
    missed: u32,
    last_seen: DateTime<Utc>,
}

/// Backoff curve for a given health status and attempt number, per spec §4.3.
pub fn backoff_for(status: HealthStatus, attempt: u32) -> Duration {
    let attempt = attempt as f64;
    let secs = match status {
        HealthStatus::Healthy => (0.5 * attempt).min(5.0),
        HealthStatus::Suspected => (1.0 * attempt).min(10.0),
        HealthStatus::Unhealthy => (5.0 * attempt).min(30.0),
    };
    Duration::from_secs_f64(secs.max(0.0))
}

pub struct HealthTracker {
    records: RwLock<HashMap<String, HealthRecord>>,
    secondary_urls: Vec<String>,
    suspect_threshold: u32,
    unhealthy_threshold: u32,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
    fleet_size: usize,
}

impl HealthTracker {
    pub fn new(
        secondaries: &[String],
        suspect_threshold: u32,
        unhealthy_threshold: u32,
        heartbeat_interval: Duration,
        heartbeat_timeout: Duration,
    ) -> Self {
        let now = Utc::now();
        let records = secondaries
            .iter()
            .map(|url| {
                (
                    url.clone(),
                    HealthRecord {
                        status: HealthStatus::Healthy,
                        missed: 0,
                        last_seen: now,
                    },
                )
            })
            .collect();

        Self {
            records: RwLock::new(records),
            secondary_urls: secondaries.to_vec(),
            suspect_threshold,
            unhealthy_threshold,
            heartbeat_interval,
            heartbeat_timeout,
            fleet_size: 1 + secondaries.len(),
        }
    }

    /// Current status for `url`; unknown urls report `Unhealthy` (defensive
    /// default, matches the original's `get_status` fallback).
    pub async fn status(&self, url: &str) -> HealthStatus {
        self.records
            .read()
            .await
            .get(url)
            .map(|r| r.status)
            .unwrap_or(HealthStatus::Unhealthy)
    }

    pub async fn missed(&self, url: &str) -> u32 {
        self.records.read().await.get(url).map(|r| r.missed).unwrap_or(0)
    }

    pub async fn last_seen(&self, url: &str) -> Option<DateTime<Utc>> {
        self.records.read().await.get(url).map(|r| r.last_seen)
    }

    /// A successful probe or replication ACK is an implicit heartbeat.
    pub async fn mark_healthy(&self, url: &str) {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(url) {
            record.missed = 0;
            record.last_seen = Utc::now();
            if record.status != HealthStatus::Healthy {
                info!(url, "secondary is now healthy");
            }
            record.status = HealthStatus::Healthy;
        }
    }

    async fn mark_missed(&self, url: &str) {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(url) {
            record.missed += 1;
            let missed = record.missed;
            if missed >= self.unhealthy_threshold {
                if record.status != HealthStatus::Unhealthy {
                    warn!(url, missed, "secondary is now unhealthy");
                }
                record.status = HealthStatus::Unhealthy;
            } else if missed >= self.suspect_threshold {
                if record.status != HealthStatus::Suspected {
                    warn!(url, missed, "secondary is now suspected");
                }
                record.status = HealthStatus::Suspected;
            }
        }
    }

    /// Strict majority of the fleet (primary + secondaries) not `Unhealthy`.
    pub async fn has_quorum(&self) -> bool {
        let records = self.records.read().await;
        let healthy_or_suspected = records
            .values()
            .filter(|r| r.status != HealthStatus::Unhealthy)
            .count();
        // +1 for the primary itself, always considered healthy.
        (healthy_or_suspected + 1) > self.fleet_size / 2
    }

    pub fn urls(&self) -> &[String] {
        &self.secondary_urls
    }

    /// Start the persistent heartbeat loop. Idempotent per spec's startup
    /// model: callers should only invoke this once per process.
    pub fn start(self: &Arc<Self>, transport: Arc<dyn Transport>, cancel: CancellationToken) {
        let tracker = Arc::clone(self);
        let urls = tracker.secondary_urls.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tracker.heartbeat_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("health tracker shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        for url in &urls {
                            match transport.get_health(url).await {
                                Ok(()) => tracker.mark_healthy(url).await,
                                Err(e) => {
                                    debug!(url, error = %e, "heartbeat failed");
                                    tracker.mark_missed(url).await;
                                }
                            }
                        }
                    }
                }
            }
        });
    }
}
