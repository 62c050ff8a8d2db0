//! Structured logging setup.
//!
//! The teacher's larger binaries (`hootenanny`, `holler`) wire `tracing`
//! through an OTLP exporter; this crate has no metrics backend to export to
//! (ambient stack per SPEC_FULL), so it stops at a `tracing-subscriber`
//! formatting layer with an `EnvFilter`.

use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber. `log_level` overrides
/// `RUST_LOG`/the default `"info"` filter when set (the CLI's `--log-level`
/// flag).
pub fn init(log_level: Option<&str>) {
    let filter = match log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
