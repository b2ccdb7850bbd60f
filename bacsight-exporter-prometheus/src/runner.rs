//! Exporter lifecycle: discovery, first sample, listener, background tasks.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::{ExporterConfig, RefreshMode};
use crate::http::HttpServer;
use crate::registry::MetricRegistry;
use crate::sampler::{PointFilter, Sampler, SamplerError, SharedSampler};
use crate::source::DeviceSource;

/// How long shutdown waits for background tasks.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Fatal startup errors.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Invalid listen address '{0}'")]
    ListenAddr(String),
    #[error("Discovery failed: {0}")]
    Discovery(#[from] SamplerError),
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// A started exporter: registry populated, listener bound, tasks running.
pub struct ExporterRunner<S> {
    sampler: SharedSampler<S>,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl<S: DeviceSource> ExporterRunner<S> {
    /// Start the exporter.
    ///
    /// Discovery runs before the listener is bound, so an empty topology
    /// fails startup without ever opening the metrics port.
    pub async fn start(config: &ExporterConfig, source: S) -> Result<Self, RunnerError> {
        let listen_addr: SocketAddr = config
            .prometheus
            .listen
            .parse()
            .map_err(|_| RunnerError::ListenAddr(config.prometheus.listen.clone()))?;

        let registry = Arc::new(MetricRegistry::new(&config.prometheus.prefix));
        let sampler = Arc::new(Sampler::new(
            source,
            registry,
            PointFilter::new(&config.filters),
            config.sampling.timeout(),
        ));

        let report = sampler.initial_sample().await?;
        info!(
            devices = report.devices,
            recorded = report.recorded,
            skipped = report.skipped,
            filtered = report.filtered,
            "Initial sample complete"
        );

        let mode = config.sampling.mode;
        let http = HttpServer::bind(
            sampler.clone(),
            mode,
            listen_addr,
            config.prometheus.path.clone(),
        )
        .await
        .map_err(|source| RunnerError::Bind {
            addr: listen_addr,
            source,
        })?;
        let local_addr = http
            .local_addr()
            .map_err(|source| RunnerError::Bind {
                addr: listen_addr,
                source,
            })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        match mode {
            RefreshMode::Timer => {
                let interval = config.sampling.interval();
                let sampler = sampler.clone();
                let shutdown = shutdown_rx.clone();
                tasks.push(tokio::spawn(async move {
                    sampler.run(interval, shutdown).await;
                }));
            }
            RefreshMode::Scrape => {
                info!("Sampling on every scrape");
            }
        }

        tasks.push(tokio::spawn(async move {
            if let Err(e) = http.run(shutdown_rx).await {
                error!("HTTP server error: {}", e);
            }
        }));

        Ok(Self {
            sampler,
            local_addr,
            shutdown_tx,
            tasks,
        })
    }

    /// Address the metrics endpoint is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The sampler driving the registry.
    pub fn sampler(&self) -> &SharedSampler<S> {
        &self.sampler
    }

    /// Serve until `signal` resolves, then stop all tasks.
    pub async fn run_until<F>(self, signal: F)
    where
        F: Future<Output = ()>,
    {
        signal.await;

        let _ = self.shutdown_tx.send(true);

        let tasks = self.tasks;
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, async move {
            for task in tasks {
                let _ = task.await;
            }
        })
        .await
        .is_err()
        {
            error!("Timed out waiting for tasks to stop");
        }

        let registry = self.sampler.registry();
        let stats = registry.stats();
        info!(
            series_count = registry.series_count(),
            observations_recorded = stats.observations_recorded,
            observations_skipped = stats.observations_skipped,
            sample_cycles = stats.sample_cycles,
            sample_failures = stats.sample_failures,
            "Final statistics"
        );
    }
}
