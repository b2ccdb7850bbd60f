//! Device sources: where the sampler gets the current device/point topology.
//!
//! The BACnet transport itself lives outside this crate. A source hands the
//! sampler an owned copy of every device and the last value of each point.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bacsight_common::topology::{DeviceId, DeviceSnapshot, PointSnapshot, PresentValue, Unit};
use serde::Deserialize;
use thiserror::Error;
use tracing::trace;

use crate::config::SourceConfig;

/// Error type for source polling.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to read topology file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse topology file '{path}': {message}")]
    Parse { path: String, message: String },
    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

/// A provider of device/point snapshots.
pub trait DeviceSource: Send + Sync + 'static {
    /// Return the current state of every known device.
    fn poll(&self) -> impl Future<Output = Result<Vec<DeviceSnapshot>, SourceError>> + Send;
}

/// On-disk topology document.
#[derive(Debug, Deserialize)]
struct TopologyFile {
    #[serde(default)]
    devices: Vec<DeviceSnapshot>,
}

/// Source backed by a JSON5 topology file, re-read on every poll.
///
/// An external BACnet poller keeps the file up to date; each poll picks up
/// whatever it last wrote.
///
/// ```json5
/// {
///   devices: [
///     { id: 599, points: [{ name: "Room Temp", unit: "degreesFahrenheit", value: 72.5 }] },
///   ],
/// }
/// ```
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    /// Create a source reading from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the topology file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DeviceSource for FileSource {
    async fn poll(&self) -> Result<Vec<DeviceSnapshot>, SourceError> {
        let path_str = self.path.display().to_string();

        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| SourceError::Io {
                path: path_str.clone(),
                source: e,
            })?;

        let topology: TopologyFile =
            json5::from_str(&content).map_err(|e| SourceError::Parse {
                path: path_str.clone(),
                message: e.to_string(),
            })?;

        trace!(path = %path_str, devices = topology.devices.len(), "Read topology file");
        Ok(topology.devices)
    }
}

/// Source returning a fixed topology.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    devices: Vec<DeviceSnapshot>,
}

impl StaticSource {
    pub fn new(devices: Vec<DeviceSnapshot>) -> Self {
        Self { devices }
    }
}

impl DeviceSource for StaticSource {
    async fn poll(&self) -> Result<Vec<DeviceSnapshot>, SourceError> {
        Ok(self.devices.clone())
    }
}

/// Simulated building: a handful of controllers with typical HVAC points.
///
/// Values drift with every poll. Each device also has one point that never
/// reads and one multi-state point whose unit is a list of state texts.
#[derive(Debug)]
pub struct SimulatedSource {
    devices: u32,
    tick: AtomicU64,
}

impl SimulatedSource {
    /// First simulated device instance.
    pub const BASE_INSTANCE: u64 = 1000;

    pub fn new(devices: u32) -> Self {
        Self {
            devices,
            tick: AtomicU64::new(0),
        }
    }

    fn device(&self, index: u32, tick: u64) -> DeviceSnapshot {
        let phase = tick as f64 / 10.0 + index as f64;
        let occupied = (tick / 5 + index as u64) % 2 == 0;

        DeviceSnapshot::new(DeviceId::Number(Self::BASE_INSTANCE + index as u64))
            .with_point(PointSnapshot::new(
                "Zone Temp",
                "degreesFahrenheit",
                Some(PresentValue::Number(round2(70.0 + 2.5 * phase.sin()))),
            ))
            .with_point(PointSnapshot::new(
                "Zone Humidity",
                "percentRelativeHumidity",
                Some(PresentValue::Number(round2(45.0 + 5.0 * phase.cos()))),
            ))
            .with_point(PointSnapshot::new(
                "Supply Fan Speed",
                "percent",
                Some(PresentValue::Number(round2(60.0 + 20.0 * (phase / 3.0).sin()))),
            ))
            .with_point(PointSnapshot::new(
                "Occupied",
                Unit::NoUnit,
                Some(PresentValue::Boolean(occupied)),
            ))
            .with_point(PointSnapshot::new(
                "System Mode",
                vec!["Off", "Heat", "Cool", "Auto"],
                Some(PresentValue::Number(((tick / 20) % 4 + 1) as f64)),
            ))
            .with_point(PointSnapshot::new(
                "Fault Status",
                Unit::NoUnit,
                Some(PresentValue::Text("normal".to_string())),
            ))
            .with_point(PointSnapshot::new("Outdoor Air Temp", "degreesFahrenheit", None))
    }
}

impl DeviceSource for SimulatedSource {
    async fn poll(&self) -> Result<Vec<DeviceSnapshot>, SourceError> {
        let tick = self.tick.fetch_add(1, Ordering::Relaxed);
        Ok((0..self.devices).map(|i| self.device(i, tick)).collect())
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Source selected by configuration.
#[derive(Debug)]
pub enum Source {
    File(FileSource),
    Simulated(SimulatedSource),
}

impl Source {
    /// Build the configured source.
    pub fn from_config(config: &SourceConfig) -> Self {
        match config {
            SourceConfig::File { path } => Source::File(FileSource::new(path.clone())),
            SourceConfig::Simulated { devices } => {
                Source::Simulated(SimulatedSource::new(*devices))
            }
        }
    }
}

impl DeviceSource for Source {
    async fn poll(&self) -> Result<Vec<DeviceSnapshot>, SourceError> {
        match self {
            Source::File(s) => s.poll().await,
            Source::Simulated(s) => s.poll().await,
        }
    }
}
