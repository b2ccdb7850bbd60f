//! Prometheus exporter for BACnet device points.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use bacsight_common::LoggingConfig;
use bacsight_exporter_prometheus::{ExporterConfig, ExporterRunner, Source};

/// Prometheus exporter for BACnet device points.
#[derive(Parser, Debug)]
#[command(name = "bacsight-exporter-prometheus")]
#[command(about = "Export BACnet present values as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => ExporterConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => ExporterConfig::default(),
    };

    if let Some(listen) = args.listen {
        config.prometheus.listen = listen;
        config.validate()?;
    }

    // Initialize logging
    let log_config = LoggingConfig {
        level: args
            .log_level
            .unwrap_or_else(|| config.logging.level.clone()),
        format: config.logging.format,
    };
    bacsight_common::init_tracing(&log_config)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting BacSight Prometheus Exporter");
    if args.config.is_none() {
        info!(topology = ?config.source, "No configuration file given, using defaults");
    }

    let source = Source::from_config(&config.source);
    let runner = ExporterRunner::start(&config, source).await?;

    info!(addr = %runner.local_addr(), "Exporter running");
    runner.run_until(shutdown_signal()).await;

    info!("Exporter stopped");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
