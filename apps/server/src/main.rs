//! Playout Server - standalone headless process shell for the playout engine.
//!
//! Parses configuration, constructs a [`playout_core::PlayoutEngine`] wired
//! to a synthetic decoder and a logging sink, auto-starts any channels listed
//! in the config file, and exposes the domain API over a thin JSON surface
//! for manual exercising. The engine's own decode/pace pipelines run on
//! dedicated OS threads independent of the HTTP server's tokio runtime.

mod api;
mod config;
mod decoders;
mod metrics;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use playout_core::{AssetRef, MasterClock, PlayoutEngine, RealClock};
use tokio::signal;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::decoders::{LoggingSinkFactory, SyntheticDecoderFactory};
use crate::metrics::LoggingMetricsSink;

/// Playout Server - headless per-channel decode/pace/switch engine.
#[derive(Parser, Debug)]
#[command(name = "playout-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "PLAYOUT_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "PLAYOUT_BIND_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Playout Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config = ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(port) = args.port {
        config.bind_port = port;
    }

    log::info!(
        "Configuration: bind_port={}, ring_capacity={}, ready_threshold={}",
        config.bind_port,
        config.engine.ring_capacity,
        config.engine.ready_threshold
    );

    let clock: Arc<dyn MasterClock> = Arc::new(RealClock::new());
    let engine = PlayoutEngine::new(
        config.engine.clone(),
        clock,
        Arc::new(SyntheticDecoderFactory),
        Arc::new(LoggingSinkFactory { log_every: 150 }),
        Arc::new(LoggingMetricsSink),
    )
    .context("Failed to construct playout engine")?;
    let engine = Arc::new(engine);

    for channel in &config.channels {
        let asset = AssetRef::new(channel.asset.clone(), 1, 90_000);
        match engine.start_channel(channel.id, asset, channel.plan.clone()) {
            Ok(()) => log::info!("[Channel {}] auto-started from configuration", channel.id),
            Err(e) => log::error!("[Channel {}] failed to auto-start: {e}", channel.id),
        }
    }

    let app_state = AppState { engine: Arc::clone(&engine) };
    let router = api::create_router(app_state);
    let bind_addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.bind_port));
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;

    log::info!("HTTP control surface listening on {bind_addr}");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            log::error!("HTTP server error: {e}");
        }
    });

    // Refreshes gauges between domain calls, standing in for a real
    // exporter's scrape interval (§1 leaves HTTP exposition out of scope).
    let metrics_engine = Arc::clone(&engine);
    let metrics_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));
        loop {
            interval.tick().await;
            metrics_engine.publish_metrics();
        }
    });

    shutdown_signal().await;
    log::info!("Shutdown signal received, stopping channels...");

    server_handle.abort();
    metrics_handle.abort();
    for channel_id in engine.list_channels() {
        if let Err(e) = engine.stop_channel(channel_id) {
            log::warn!("[Channel {channel_id}] error during shutdown: {e}");
        }
    }

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
