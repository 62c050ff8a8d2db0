//! Process bootstrap: config loading, telemetry, and the axum server.
//!
//! The binary itself has no coordination logic in it — everything here is
//! wiring. The core lives in the library (`src/lib.rs` and friends) and is
//! exercised directly by that library's tests without going through this
//! binary at all.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use replicated_log::transport::ReplicaClient;
use replicated_log::{Config, ServerContext};

/// Primary/secondary replicated append-only log.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a TOML config file. Falls back to environment variables and
    /// compiled defaults if omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the `tracing` log level/filter (e.g. "debug", "info,replicated_log=debug").
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path).context("failed to load config file")?,
        None => Config::from_env(),
    };

    replicated_log::telemetry::init(cli.log_level.as_deref());

    info!(
        role = %config.role,
        bind_addr = %config.bind_addr,
        secondaries = config.secondaries.len(),
        "starting replicated-log"
    );

    let transport: Arc<dyn replicated_log::transport::Transport> = Arc::new(ReplicaClient::new(
        Duration::from_secs(config.repl_timeout_secs),
        Duration::from_secs(config.heartbeat_timeout_secs),
    ));

    let ctx = Arc::new(ServerContext::new(&config, Arc::clone(&transport)));

    let cancel = CancellationToken::new();
    ctx.spawn_background_tasks(transport, cancel.clone());

    let app = replicated_log::http::router(Arc::clone(&ctx));
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .context("server error")?;

    cancel.cancel();
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received, cancelling background loops");
    cancel.cancel();
}
