//! Process configuration: TOML file with environment variable overlay.
//!
//! Environment variables (all prefixed `REPLOG_`) take precedence over the
//! `[replicated_log]` section of a config file, which in turn takes
//! precedence over the defaults below.

use std::env;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `"primary"` or `"secondary"`.
    pub role: String,
    pub bind_addr: String,
    /// Only consulted on the primary; empty on a secondary.
    pub secondaries: Vec<String>,

    /// Deadline, in seconds, on `Append`'s blocking wait for `w > 1` ACKs.
    pub repl_timeout_secs: u64,
    /// Artificial delay a secondary applies to `ReceiveReplication` before
    /// processing, for exercising ordering under latency (test hook).
    pub repl_delay_secs: u64,
    /// Bounded retry count for the `w=1` fire-and-forget fan-out.
    pub repl_retries: u32,

    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub suspect_threshold: u32,
    pub unhealthy_threshold: u32,

    /// Poll interval for the persistent per-secondary catch-up loop.
    pub sync_poll_interval_secs: u64,

    /// When true, `Append` is rejected with `NoQuorum` unless a majority of
    /// the fleet is reachable. Off by default (see DESIGN.md): the original
    /// system never gated writes on quorum, only on the per-request `w`.
    pub gate_writes_on_quorum: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            role: "primary".to_string(),
            bind_addr: "0.0.0.0:8080".to_string(),
            secondaries: Vec::new(),
            repl_timeout_secs: 30,
            repl_delay_secs: 0,
            repl_retries: 2,
            heartbeat_interval_secs: 5,
            heartbeat_timeout_secs: 2,
            suspect_threshold: 2,
            unhealthy_threshold: 4,
            sync_poll_interval_secs: 2,
            gate_writes_on_quorum: false,
        }
    }
}

impl Config {
    /// Load from a TOML file's `[replicated_log]` section, then apply
    /// environment overrides. Falls back to defaults if the file has no
    /// such section.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        let table: toml::Table = contents
            .parse()
            .with_context(|| format!("failed to parse TOML: {}", path.display()))?;

        let mut config = if let Some(section) = table.get("replicated_log") {
            section
                .clone()
                .try_into()
                .context("failed to parse [replicated_log] section")?
        } else {
            Config::default()
        };

        apply_env_overrides(&mut config);
        Ok(config)
    }

    /// Load from environment and defaults only, skipping any file.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        apply_env_overrides(&mut config);
        config
    }
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(v) = env::var("REPLOG_ROLE") {
        config.role = v;
    }
    if let Ok(v) = env::var("REPLOG_BIND_ADDR") {
        config.bind_addr = v;
    }
    if let Ok(v) = env::var("REPLOG_SECONDARIES") {
        config.secondaries = v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Ok(v) = env::var("REPLOG_REPL_TIMEOUT_SECS").and_then(|v| v.parse().map_err(|_| env::VarError::NotPresent)) {
        config.repl_timeout_secs = v;
    }
    if let Ok(v) = env::var("REPLOG_REPL_DELAY_SECS").and_then(|v| v.parse().map_err(|_| env::VarError::NotPresent)) {
        config.repl_delay_secs = v;
    }
    if let Ok(v) = env::var("REPLOG_REPL_RETRIES").and_then(|v| v.parse().map_err(|_| env::VarError::NotPresent)) {
        config.repl_retries = v;
    }
    if let Ok(v) =
        env::var("REPLOG_HEARTBEAT_INTERVAL_SECS").and_then(|v| v.parse().map_err(|_| env::VarError::NotPresent))
    {
        config.heartbeat_interval_secs = v;
    }
    if let Ok(v) =
        env::var("REPLOG_HEARTBEAT_TIMEOUT_SECS").and_then(|v| v.parse().map_err(|_| env::VarError::NotPresent))
    {
        config.heartbeat_timeout_secs = v;
    }
    if let Ok(v) = env::var("REPLOG_SUSPECT_THRESHOLD").and_then(|v| v.parse().map_err(|_| env::VarError::NotPresent)) {
        config.suspect_threshold = v;
    }
    if let Ok(v) =
        env::var("REPLOG_UNHEALTHY_THRESHOLD").and_then(|v| v.parse().map_err(|_| env::VarError::NotPresent))
    {
        config.unhealthy_threshold = v;
    }
    if let Ok(v) =
        env::var("REPLOG_SYNC_POLL_INTERVAL_SECS").and_then(|v| v.parse().map_err(|_| env::VarError::NotPresent))
    {
        config.sync_poll_interval_secs = v;
    }
    if let Ok(v) = env::var("REPLOG_GATE_WRITES_ON_QUORUM") {
        config.gate_writes_on_quorum = v == "true" || v == "1";
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_design_notes() {
        let config = Config::default();
        assert_eq!(config.repl_timeout_secs, 30);
        assert_eq!(config.repl_retries, 2);
        assert_eq!(config.heartbeat_interval_secs, 5);
        assert_eq!(config.heartbeat_timeout_secs, 2);
        assert_eq!(config.suspect_threshold, 2);
        assert_eq!(config.unhealthy_threshold, 4);
        assert_eq!(config.sync_poll_interval_secs, 2);
        assert!(!config.gate_writes_on_quorum);
    }

    #[test]
    fn parses_replicated_log_section() {
        let toml = r#"
[replicated_log]
role = "secondary"
bind_addr = "0.0.0.0:9001"
secondaries = []
repl_timeout_secs = 10
"#;
        let table: toml::Table = toml.parse().unwrap();
        let config: Config = table.get("replicated_log").unwrap().clone().try_into().unwrap();
        assert_eq!(config.role, "secondary");
        assert_eq!(config.bind_addr, "0.0.0.0:9001");
        assert_eq!(config.repl_timeout_secs, 10);
        // unspecified fields fall back to defaults via serde(default)
        assert_eq!(config.repl_retries, 2);
    }
}
