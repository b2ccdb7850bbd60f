//! Configuration for the Prometheus exporter.

use bacsight_common::config::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] bacsight_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Prometheus exporter settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Sampling settings.
    #[serde(default)]
    pub sampling: SamplingConfig,

    /// Where device/point snapshots come from.
    #[serde(default)]
    pub source: SourceConfig,

    /// Point filtering settings.
    #[serde(default)]
    pub filters: FilterConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: "0.0.0.0:8000").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,

    /// Metric name prefix (default: "bacnet").
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_listen() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

fn default_prefix() -> String {
    "bacnet".to_string()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            prefix: default_prefix(),
        }
    }
}

/// When the registry is refreshed from the device source.
///
/// `Timer` samples on a fixed interval independent of scrapes. Scrapes are
/// always fast, but a scrape may see values up to one interval old, and
/// older still if the source keeps timing out.
///
/// `Scrape` samples at the start of every scrape. Values are as fresh as
/// the source allows, but scrape latency grows with the number of points,
/// so each refresh is bounded by `timeout_ms` and falls back to the last
/// known values when it runs out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshMode {
    #[default]
    Timer,
    Scrape,
}

/// Sampling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Refresh model.
    #[serde(default)]
    pub mode: RefreshMode,

    /// Interval between sample cycles in timer mode (seconds).
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Upper bound on a single source poll (milliseconds).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_interval() -> u64 {
    30
}

fn default_timeout_ms() -> u64 {
    5000
}

impl SamplingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            mode: RefreshMode::default(),
            interval_secs: default_interval(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Device source configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceConfig {
    /// JSON5 topology file maintained by an external BACnet poller.
    File {
        /// Path to the topology file.
        path: PathBuf,
    },
    /// Built-in simulated devices for demos and testing.
    Simulated {
        /// Number of simulated devices (default: 3).
        #[serde(default = "default_simulated_devices")]
        devices: u32,
    },
}

/// Topology file read when no source is configured.
pub const DEFAULT_TOPOLOGY_PATH: &str = "topology.json5";

fn default_simulated_devices() -> u32 {
    3
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::File {
            path: PathBuf::from(DEFAULT_TOPOLOGY_PATH),
        }
    }
}

/// Point filtering configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Only sample these device ids (empty = all).
    #[serde(default)]
    pub include_devices: Vec<String>,

    /// Never sample these device ids.
    #[serde(default)]
    pub exclude_devices: Vec<String>,

    /// Glob patterns for point names to include (empty = all).
    #[serde(default)]
    pub include_points: Vec<String>,

    /// Glob patterns for point names to exclude.
    #[serde(default)]
    pub exclude_points: Vec<String>,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: ExporterConfig = bacsight_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = bacsight_common::parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self
            .prometheus
            .listen
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.prometheus.listen
            )));
        }

        if !self.prometheus.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        if self.prometheus.prefix.is_empty() {
            return Err(ConfigError::Validation(
                "Metric prefix must not be empty".to_string(),
            ));
        }

        if self.sampling.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "interval_secs must be > 0".to_string(),
            ));
        }

        if self.sampling.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "timeout_ms must be > 0".to_string(),
            ));
        }

        if self.sampling.timeout() > self.sampling.interval() {
            return Err(ConfigError::Validation(
                "timeout_ms must not exceed interval_secs".to_string(),
            ));
        }

        if let SourceConfig::Simulated { devices: 0 } = self.source {
            return Err(ConfigError::Validation(
                "Simulated source needs at least one device".to_string(),
            ));
        }

        for pattern in self
            .filters
            .include_points
            .iter()
            .chain(&self.filters.exclude_points)
        {
            glob::Pattern::new(pattern).map_err(|e| {
                ConfigError::Validation(format!("Invalid point pattern '{}': {}", pattern, e))
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bacsight_common::config::LogFormat;

    #[test]
    fn test_parse_minimal_config() {
        let config = ExporterConfig::parse("{}").unwrap();

        assert_eq!(config.prometheus.listen, "0.0.0.0:8000");
        assert_eq!(config.prometheus.path, "/metrics");
        assert_eq!(config.prometheus.prefix, "bacnet");
        assert_eq!(config.sampling.mode, RefreshMode::Timer);
        assert_eq!(config.sampling.interval_secs, 30);
        assert_eq!(config.sampling.timeout_ms, 5000);
        assert_eq!(
            config.source,
            SourceConfig::File {
                path: PathBuf::from("topology.json5")
            }
        );
    }

    #[test]
    fn test_default_source_is_file() {
        assert_eq!(
            ExporterConfig::default().source,
            SourceConfig::File {
                path: PathBuf::from(DEFAULT_TOPOLOGY_PATH)
            }
        );
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            prometheus: {
                listen: "127.0.0.1:9101",
                path: "/bacnet/metrics",
                prefix: "site1",
            },
            sampling: {
                mode: "scrape",
                interval_secs: 10,
                timeout_ms: 2000,
            },
            source: {
                type: "file",
                path: "/var/lib/bacsight/topology.json5",
            },
            filters: {
                include_devices: ["599", "600"],
                exclude_points: ["*Alarm*"],
            },
            logging: {
                level: "debug",
                format: "json",
            },
        }"#;

        let config = ExporterConfig::parse(json).unwrap();

        assert_eq!(config.prometheus.listen, "127.0.0.1:9101");
        assert_eq!(config.prometheus.path, "/bacnet/metrics");
        assert_eq!(config.prometheus.prefix, "site1");
        assert_eq!(config.sampling.mode, RefreshMode::Scrape);
        assert_eq!(config.sampling.interval(), Duration::from_secs(10));
        assert_eq!(config.sampling.timeout(), Duration::from_millis(2000));
        assert_eq!(
            config.source,
            SourceConfig::File {
                path: PathBuf::from("/var/lib/bacsight/topology.json5")
            }
        );
        assert_eq!(config.filters.include_devices, vec!["599", "600"]);
        assert_eq!(config.filters.exclude_points, vec!["*Alarm*"]);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_simulated_source_default_devices() {
        let config = ExporterConfig::parse(r#"{ source: { type: "simulated" } }"#).unwrap();
        assert_eq!(config.source, SourceConfig::Simulated { devices: 3 });
    }

    #[test]
    fn test_validate_invalid_listen() {
        let result = ExporterConfig::parse(r#"{ prometheus: { listen: "not-an-address" } }"#);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid listen address")
        );
    }

    #[test]
    fn test_validate_invalid_path() {
        let result = ExporterConfig::parse(r#"{ prometheus: { path: "metrics" } }"#);
        assert!(result.unwrap_err().to_string().contains("must start with /"));
    }

    #[test]
    fn test_validate_zero_interval() {
        let result = ExporterConfig::parse(r#"{ sampling: { interval_secs: 0 } }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_timeout_longer_than_interval() {
        let result =
            ExporterConfig::parse(r#"{ sampling: { interval_secs: 1, timeout_ms: 1500 } }"#);
        assert!(result.unwrap_err().to_string().contains("must not exceed"));
    }

    #[test]
    fn test_validate_zero_simulated_devices() {
        let result =
            ExporterConfig::parse(r#"{ source: { type: "simulated", devices: 0 } }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_bad_glob() {
        let result = ExporterConfig::parse(r#"{ filters: { include_points: ["[unclosed"] } }"#);
        assert!(result.unwrap_err().to_string().contains("Invalid point pattern"));
    }

    #[test]
    fn test_unknown_source_type() {
        let result = ExporterConfig::parse(r#"{ source: { type: "mstp" } }"#);
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exporter.json5");
        std::fs::write(
            &path,
            r#"{ prometheus: { prefix: "plant" }, source: { type: "simulated", devices: 2 } }"#,
        )
        .unwrap();

        let config = ExporterConfig::load_from_file(&path).unwrap();
        assert_eq!(config.prometheus.prefix, "plant");
        assert_eq!(config.source, SourceConfig::Simulated { devices: 2 });
    }

    #[test]
    fn test_load_from_missing_file() {
        let result = ExporterConfig::load_from_file("/nonexistent/exporter.json5");
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
        assert!(err.to_string().contains("/nonexistent/exporter.json5"));
    }

    #[test]
    fn test_load_from_file_still_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exporter.json5");
        std::fs::write(&path, r#"{ sampling: { interval_secs: 0 } }"#).unwrap();

        let result = ExporterConfig::load_from_file(&path);
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }
}
