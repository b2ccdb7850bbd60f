//! Point sampling: pulls snapshots from the device source into the registry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bacsight_common::topology::{DeviceId, DeviceSnapshot};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::config::FilterConfig;
use crate::mapping::help_text;
use crate::registry::SharedRegistry;
use crate::source::{DeviceSource, SourceError};

/// Error type for sampling operations.
#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("Could not find any devices")]
    EmptyTopology,
    #[error("Source error: {0}")]
    Source(#[from] SourceError),
    #[error("Source poll timed out after {0:?}")]
    Timeout(Duration),
}

/// Filter for device points.
pub struct PointFilter {
    include_devices: Vec<String>,
    exclude_devices: Vec<String>,
    include_points: Vec<glob::Pattern>,
    exclude_points: Vec<glob::Pattern>,
}

impl PointFilter {
    /// Create a new filter from configuration.
    ///
    /// Invalid glob patterns are ignored; [`crate::ExporterConfig::validate`]
    /// rejects them up front.
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            include_devices: config.include_devices.clone(),
            exclude_devices: config.exclude_devices.clone(),
            include_points: compile_patterns(&config.include_points),
            exclude_points: compile_patterns(&config.exclude_points),
        }
    }

    /// Check if a point should be sampled. Matches raw (unsanitized) names.
    pub fn should_include(&self, device: &DeviceId, point: &str) -> bool {
        let device = device.to_string();

        if !self.include_devices.is_empty() && !self.include_devices.contains(&device) {
            return false;
        }
        if self.exclude_devices.contains(&device) {
            return false;
        }

        if !self.include_points.is_empty() && !self.include_points.iter().any(|p| p.matches(point))
        {
            return false;
        }
        if self.exclude_points.iter().any(|p| p.matches(point)) {
            return false;
        }

        true
    }
}

fn compile_patterns(patterns: &[String]) -> Vec<glob::Pattern> {
    patterns
        .iter()
        .filter_map(|p| glob::Pattern::new(p).ok())
        .collect()
}

impl Default for PointFilter {
    fn default() -> Self {
        Self::new(&FilterConfig::default())
    }
}

/// Outcome of feeding one topology snapshot into the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleReport {
    /// Devices visited.
    pub devices: usize,
    /// Points visited.
    pub points: usize,
    /// Points whose value was recorded.
    pub recorded: usize,
    /// Points skipped because the value was absent or not numeric.
    pub skipped: usize,
    /// Points excluded by the filter.
    pub filtered: usize,
}

/// Samples a device source into the registry.
pub struct Sampler<S> {
    source: S,
    registry: SharedRegistry,
    filter: PointFilter,
    timeout: Duration,
}

impl<S: DeviceSource> Sampler<S> {
    /// Create a sampler. Every source poll is bounded by `timeout`.
    pub fn new(source: S, registry: SharedRegistry, filter: PointFilter, timeout: Duration) -> Self {
        Self {
            source,
            registry,
            filter,
            timeout,
        }
    }

    /// The registry this sampler feeds.
    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Poll the source once, bounded by the configured timeout.
    async fn poll(&self) -> Result<Vec<DeviceSnapshot>, SamplerError> {
        let devices = tokio::time::timeout(self.timeout, self.source.poll())
            .await
            .map_err(|_| SamplerError::Timeout(self.timeout))??;
        Ok(devices)
    }

    /// Discover the device topology.
    ///
    /// An empty topology is an error: an exporter that silently serves
    /// nothing is worse than one that refuses to start.
    pub async fn discover(&self) -> Result<Vec<DeviceSnapshot>, SamplerError> {
        let devices = self.poll().await?;

        if devices.is_empty() {
            return Err(SamplerError::EmptyTopology);
        }

        let points: usize = devices.iter().map(|d| d.points.len()).sum();
        info!(devices = devices.len(), points, "Discovered devices");

        Ok(devices)
    }

    /// Discover devices and record the first sample cycle.
    pub async fn initial_sample(&self) -> Result<SampleReport, SamplerError> {
        let started = Instant::now();
        let devices = self.discover().await?;
        Ok(self.finish_cycle(&devices, started))
    }

    /// Feed every point of every device into the registry.
    pub fn run_once(&self, devices: &[DeviceSnapshot]) -> SampleReport {
        let mut report = SampleReport::default();

        for device in devices {
            report.devices += 1;

            for point in &device.points {
                report.points += 1;

                if !self.filter.should_include(&device.id, &point.name) {
                    report.filtered += 1;
                    trace!(device = %device.id, point = %point.name, "Point filtered out");
                    continue;
                }

                let help = help_text(&point.unit);
                if self.registry.observe(
                    &device.id,
                    &point.name,
                    &point.unit,
                    point.value.as_ref(),
                    &help,
                ) {
                    report.recorded += 1;
                } else {
                    report.skipped += 1;
                }
            }
        }

        debug!(
            devices = report.devices,
            points = report.points,
            recorded = report.recorded,
            skipped = report.skipped,
            filtered = report.filtered,
            "Sample cycle complete"
        );

        report
    }

    /// Poll the source and feed the result into the registry.
    pub async fn sample(&self) -> Result<SampleReport, SamplerError> {
        let started = Instant::now();
        let devices = self.poll().await?;

        if devices.is_empty() {
            warn!("Source returned no devices, keeping last known values");
        }

        Ok(self.finish_cycle(&devices, started))
    }

    /// Sample, falling back to the last known values on failure.
    ///
    /// Failures are logged and counted, never propagated.
    pub async fn refresh(&self) -> Option<SampleReport> {
        match self.sample().await {
            Ok(report) => Some(report),
            Err(e) => {
                self.registry
                    .record_failure(matches!(e, SamplerError::Timeout(_)));
                warn!(error = %e, "Sample cycle failed, serving last known values");
                None
            }
        }
    }

    /// Sample every `interval` until the shutdown signal is received.
    ///
    /// The first cycle runs one interval after the call, since startup has
    /// already sampled once.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        info!(interval_secs = interval.as_secs(), "Starting sampler");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.refresh().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Sampler stopped");
    }

    fn finish_cycle(&self, devices: &[DeviceSnapshot], started: Instant) -> SampleReport {
        let report = self.run_once(devices);
        self.registry.record_cycle(started.elapsed());
        report
    }
}

/// Create a shareable sampler handle.
pub type SharedSampler<S> = Arc<Sampler<S>>;
