//! Metric namespace registry holding the current value of every sampled point.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

use bacsight_common::topology::{DeviceId, PresentValue, Unit};
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::mapping::{MetricKey, escape_label_value, format_value, is_valid_metric_name, sanitize};

/// Label set of one sample within a series: sanitized `(device, name)`.
pub type LabelSet = (String, String);

/// A gauge series and its per-label values.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSeries {
    /// HELP text, fixed by the first observation that created the series.
    pub help: String,
    /// Current value per label set.
    pub samples: BTreeMap<LabelSet, f64>,
}

impl MetricSeries {
    fn new(help: &str) -> Self {
        Self {
            help: help.to_string(),
            samples: BTreeMap::new(),
        }
    }
}

/// Error rendering a single series.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("invalid metric name '{0}'")]
    InvalidName(String),
    #[error("format error: {0}")]
    Format(#[from] std::fmt::Error),
}

/// Registry statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    /// Total observations offered to the registry.
    pub observations_received: u64,
    /// Observations that set a value.
    pub observations_recorded: u64,
    /// Observations discarded because the value was absent or not numeric.
    pub observations_skipped: u64,
    /// Completed sample cycles.
    pub sample_cycles: u64,
    /// Sample cycles that failed (source error or timeout).
    pub sample_failures: u64,
    /// Sample cycles that failed because the source timed out.
    pub sample_timeouts: u64,
    /// Duration of the last completed sample cycle, in seconds.
    pub last_sample_duration_secs: f64,
}

/// Thread-safe registry mapping metric names to gauge series.
///
/// Series are created on first observation and never removed. A point that
/// becomes unreadable keeps its last value until it is overwritten.
pub struct MetricRegistry {
    /// Sanitized metric name prefix.
    prefix: String,
    /// Series indexed (and therefore rendered) by metric name.
    series: RwLock<BTreeMap<String, MetricSeries>>,
    /// Statistics.
    stats: RwLock<RegistryStats>,
}

impl MetricRegistry {
    /// Create an empty registry. The prefix is sanitized.
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: sanitize(prefix),
            series: RwLock::new(BTreeMap::new()),
            stats: RwLock::new(RegistryStats::default()),
        }
    }

    /// The sanitized metric name prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Record the present value of a point.
    ///
    /// Absent or non-numeric values are discarded without touching any
    /// series. The HELP text of a series is set by its first observation;
    /// later observations with a different text leave it unchanged.
    ///
    /// Returns `true` if a value was recorded.
    pub fn observe(
        &self,
        device: &DeviceId,
        point_name: &str,
        unit: &Unit,
        value: Option<&PresentValue>,
        help_text: &str,
    ) -> bool {
        self.stats.write().observations_received += 1;

        let Some(value) = value.and_then(PresentValue::as_f64) else {
            self.stats.write().observations_skipped += 1;
            debug!(
                device = %device,
                point = point_name,
                "Skipping unreadable point"
            );
            return false;
        };

        let key = MetricKey::new(&self.prefix, device, point_name, unit);

        {
            let mut series = self.series.write();
            let entry = series.entry(key.name).or_insert_with_key(|name| {
                trace!(metric = %name, "Created series");
                MetricSeries::new(help_text)
            });
            entry.samples.insert((key.device, key.point), value);
        }

        self.stats.write().observations_recorded += 1;
        true
    }

    /// Current value of a sample, looked up by metric name and sanitized labels.
    pub fn value(&self, metric: &str, device: &str, name: &str) -> Option<f64> {
        self.series
            .read()
            .get(metric)
            .and_then(|s| s.samples.get(&(device.to_string(), name.to_string())))
            .copied()
    }

    /// HELP text of a series.
    pub fn help(&self, metric: &str) -> Option<String> {
        self.series.read().get(metric).map(|s| s.help.clone())
    }

    /// Number of series.
    pub fn series_count(&self) -> usize {
        self.series.read().len()
    }

    /// Number of label sets across all series.
    pub fn label_count(&self) -> usize {
        self.series.read().values().map(|s| s.samples.len()).sum()
    }

    /// Get registry statistics.
    pub fn stats(&self) -> RegistryStats {
        self.stats.read().clone()
    }

    /// Record a completed sample cycle.
    pub fn record_cycle(&self, elapsed: Duration) {
        let mut stats = self.stats.write();
        stats.sample_cycles += 1;
        stats.last_sample_duration_secs = elapsed.as_secs_f64();
    }

    /// Record a failed sample cycle.
    pub fn record_failure(&self, timed_out: bool) {
        let mut stats = self.stats.write();
        stats.sample_failures += 1;
        if timed_out {
            stats.sample_timeouts += 1;
        }
    }

    /// Render all series in Prometheus text exposition format.
    ///
    /// The lock is only held while copying the current state. A series that
    /// fails to render is logged and left out; the others are unaffected.
    pub fn snapshot(&self) -> String {
        let series = self.series.read().clone();
        let stats = self.stats();

        let mut output = String::with_capacity(series.len() * 160 + 1024);

        for (name, s) in &series {
            match render_series(name, s) {
                Ok(block) => output.push_str(&block),
                Err(e) => warn!(metric = %name, error = %e, "Failed to render series"),
            }
        }

        if let Err(e) = self.render_stats(&mut output, &series, &stats) {
            warn!(error = %e, "Failed to render exporter statistics");
        }

        output
    }

    fn render_stats(
        &self,
        output: &mut String,
        series: &BTreeMap<String, MetricSeries>,
        stats: &RegistryStats,
    ) -> std::fmt::Result {
        let entries = [
            (
                "exporter_series_total",
                "Number of exported series",
                "gauge",
                series.len().to_string(),
            ),
            (
                "exporter_observations_total",
                "Point values recorded",
                "counter",
                stats.observations_recorded.to_string(),
            ),
            (
                "exporter_observations_skipped_total",
                "Unreadable point values skipped",
                "counter",
                stats.observations_skipped.to_string(),
            ),
            (
                "exporter_sample_cycles_total",
                "Completed sample cycles",
                "counter",
                stats.sample_cycles.to_string(),
            ),
            (
                "exporter_sample_failures_total",
                "Failed sample cycles",
                "counter",
                stats.sample_failures.to_string(),
            ),
            (
                "exporter_last_sample_duration_seconds",
                "Duration of the last sample cycle",
                "gauge",
                format_value(stats.last_sample_duration_secs),
            ),
        ];

        for (suffix, help, kind, value) in entries {
            let name = format!("{}_{}", self.prefix, suffix);
            // A point series already owns this name; a second TYPE line would
            // make the whole exposition unparsable.
            if series.contains_key(&name) {
                warn!(metric = %name, "Point series shadows exporter metric, skipping it");
                continue;
            }
            writeln!(output, "# HELP {} {}", name, help)?;
            writeln!(output, "# TYPE {} {}", name, kind)?;
            writeln!(output, "{} {}", name, value)?;
        }

        Ok(())
    }
}

/// Create a shareable registry handle.
pub type SharedRegistry = Arc<MetricRegistry>;

/// Render one series with its HELP/TYPE header.
fn render_series(name: &str, series: &MetricSeries) -> Result<String, RenderError> {
    if !is_valid_metric_name(name) {
        return Err(RenderError::InvalidName(name.to_string()));
    }

    let mut block = String::with_capacity(128 + series.samples.len() * 64);
    writeln!(block, "# HELP {} {}", name, escape_help(&series.help))?;
    writeln!(block, "# TYPE {} gauge", name)?;

    for ((device, point), value) in &series.samples {
        writeln!(
            block,
            "{}{{device=\"{}\",name=\"{}\"}} {}",
            name,
            escape_label_value(device),
            escape_label_value(point),
            format_value(*value)
        )?;
    }

    Ok(block)
}

/// Escape backslashes and newlines in HELP text.
fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELP: &str = "Present Value of BACnet objects with a degreesFahrenheit unit";

    fn registry() -> MetricRegistry {
        MetricRegistry::new("bacnet")
    }

    #[test]
    fn test_observe_and_render() {
        let registry = registry();
        let recorded = registry.observe(
            &DeviceId::Number(599),
            "Room Temp",
            &Unit::from("degreesFahrenheit"),
            Some(&PresentValue::Number(72.5)),
            HELP,
        );

        assert!(recorded);
        assert_eq!(registry.series_count(), 1);

        let output = registry.snapshot();
        assert!(output.contains(&format!(
            "# HELP bacnet_599_Room_Temp_degreesFahrenheit {}",
            HELP
        )));
        assert!(output.contains("# TYPE bacnet_599_Room_Temp_degreesFahrenheit gauge"));
        assert!(output.contains(
            "bacnet_599_Room_Temp_degreesFahrenheit{device=\"599\",name=\"Room_Temp\"} 72.5"
        ));
    }

    #[test]
    fn test_observe_none_is_noop() {
        let registry = registry();
        registry.observe(
            &DeviceId::Number(1),
            "a",
            &Unit::NoUnit,
            Some(&PresentValue::Number(1.0)),
            "h",
        );

        let recorded = registry.observe(&DeviceId::Number(1), "a", &Unit::NoUnit, None, "h");
        let recorded_new = registry.observe(&DeviceId::Number(2), "b", &Unit::NoUnit, None, "h");

        assert!(!recorded);
        assert!(!recorded_new);
        assert_eq!(registry.series_count(), 1);
        assert_eq!(registry.value("bacnet_1_a_noUnit", "1", "a"), Some(1.0));
        assert_eq!(registry.stats().observations_skipped, 2);
    }

    #[test]
    fn test_observe_non_numeric_is_noop() {
        let registry = registry();
        let before = registry.snapshot();

        let recorded = registry.observe(
            &DeviceId::Number(1),
            "Fan Status",
            &Unit::NoUnit,
            Some(&PresentValue::from("on")),
            "h",
        );

        assert!(!recorded);
        assert_eq!(registry.series_count(), 0);
        assert_eq!(registry.label_count(), 0);
        // Only the skipped counter differs.
        assert_eq!(
            before.replace("observations_skipped_total 0", "observations_skipped_total 1"),
            registry.snapshot()
        );
    }

    #[test]
    fn test_numeric_text_and_boolean_values() {
        let registry = registry();
        registry.observe(
            &DeviceId::Number(1),
            "Setpoint",
            &Unit::NoUnit,
            Some(&PresentValue::from("21.5")),
            "h",
        );
        registry.observe(
            &DeviceId::Number(1),
            "Occupied",
            &Unit::NoUnit,
            Some(&PresentValue::Boolean(true)),
            "h",
        );

        assert_eq!(registry.value("bacnet_1_Setpoint_noUnit", "1", "Setpoint"), Some(21.5));
        assert_eq!(registry.value("bacnet_1_Occupied_noUnit", "1", "Occupied"), Some(1.0));
    }

    #[test]
    fn test_scalar_and_list_unit_share_series() {
        let registry = registry();
        let device = DeviceId::Number(7);

        registry.observe(
            &device,
            "Energy",
            &Unit::from(vec!["kWh"]),
            Some(&PresentValue::Number(10.0)),
            "first",
        );
        registry.observe(
            &device,
            "Energy",
            &Unit::from("kWh"),
            Some(&PresentValue::Number(11.0)),
            "second",
        );

        assert_eq!(registry.series_count(), 1);
        assert_eq!(registry.label_count(), 1);
        assert_eq!(registry.value("bacnet_7_Energy_kWh", "7", "Energy"), Some(11.0));
    }

    #[test]
    fn test_help_text_first_writer_wins() {
        let registry = registry();
        let device = DeviceId::Number(7);

        registry.observe(&device, "x", &Unit::NoUnit, Some(&PresentValue::Number(1.0)), "first");
        registry.observe(&device, "x", &Unit::NoUnit, Some(&PresentValue::Number(2.0)), "second");

        assert_eq!(registry.help("bacnet_7_x_noUnit").as_deref(), Some("first"));
    }

    #[test]
    fn test_colliding_names_merge_into_one_series() {
        let registry = registry();
        let device = DeviceId::from("d");

        registry.observe(&device, "Temp A", &Unit::NoUnit, Some(&PresentValue::Number(1.0)), "h");
        registry.observe(&device, "Temp-A", &Unit::NoUnit, Some(&PresentValue::Number(2.0)), "h");

        // Both sanitize to the same name and the same labels, so the later one wins.
        assert_eq!(registry.series_count(), 1);
        assert_eq!(registry.label_count(), 1);
        assert_eq!(registry.value("bacnet_d_Temp_A_noUnit", "d", "Temp_A"), Some(2.0));
    }

    #[test]
    fn test_stale_value_persists() {
        let registry = registry();
        let device = DeviceId::Number(3);

        registry.observe(&device, "p", &Unit::NoUnit, Some(&PresentValue::Number(42.0)), "h");
        registry.observe(&device, "p", &Unit::NoUnit, None, "h");
        registry.observe(&device, "p", &Unit::NoUnit, Some(&PresentValue::from("fault")), "h");

        assert_eq!(registry.value("bacnet_3_p_noUnit", "3", "p"), Some(42.0));
        assert!(registry.snapshot().contains("bacnet_3_p_noUnit{device=\"3\",name=\"p\"} 42\n"));
    }

    #[test]
    fn test_render_sorted_by_name() {
        let registry = registry();
        for name in ["zeta", "alpha", "mid"] {
            registry.observe(
                &DeviceId::Number(1),
                name,
                &Unit::NoUnit,
                Some(&PresentValue::Number(1.0)),
                "h",
            );
        }

        let output = registry.snapshot();
        let alpha = output.find("# TYPE bacnet_1_alpha_noUnit").unwrap();
        let mid = output.find("# TYPE bacnet_1_mid_noUnit").unwrap();
        let zeta = output.find("# TYPE bacnet_1_zeta_noUnit").unwrap();
        assert!(alpha < mid && mid < zeta);
    }

    #[test]
    fn test_invalid_series_does_not_block_others() {
        let registry = registry();
        registry.observe(
            &DeviceId::Number(1),
            "good",
            &Unit::NoUnit,
            Some(&PresentValue::Number(5.0)),
            "h",
        );
        registry
            .series
            .write()
            .insert("9 bad name".to_string(), MetricSeries::new("h"));

        let output = registry.snapshot();
        assert!(!output.contains("9 bad name"));
        assert!(output.contains("bacnet_1_good_noUnit{device=\"1\",name=\"good\"} 5"));
    }

    #[test]
    fn test_prefix_is_sanitized() {
        let registry = MetricRegistry::new("1-site");
        assert_eq!(registry.prefix(), "_1_site");
    }

    #[test]
    fn test_stats_metrics() {
        let registry = registry();
        registry.observe(
            &DeviceId::Number(1),
            "a",
            &Unit::NoUnit,
            Some(&PresentValue::Number(1.0)),
            "h",
        );
        registry.record_cycle(Duration::from_millis(250));
        registry.record_failure(true);

        let stats = registry.stats();
        assert_eq!(stats.sample_cycles, 1);
        assert_eq!(stats.sample_failures, 1);
        assert_eq!(stats.sample_timeouts, 1);

        let output = registry.snapshot();
        assert!(output.contains("bacnet_exporter_series_total 1"));
        assert!(output.contains("bacnet_exporter_observations_total 1"));
        assert!(output.contains("bacnet_exporter_sample_failures_total 1"));
        assert!(output.contains("bacnet_exporter_last_sample_duration_seconds 0.25"));
    }

    #[test]
    fn test_point_series_shadowing_exporter_metric() {
        let registry = registry();
        registry.observe(
            &DeviceId::from("exporter"),
            "series",
            &Unit::from("total"),
            Some(&PresentValue::Number(7.0)),
            "Present Value of BACnet objects with a total unit",
        );

        let output = registry.snapshot();
        let type_lines = output
            .lines()
            .filter(|l| l.starts_with("# TYPE bacnet_exporter_series_total "))
            .count();
        assert_eq!(type_lines, 1);
        assert!(output.contains("bacnet_exporter_series_total{device=\"exporter\",name=\"series\"} 7"));
        assert!(!output.contains("bacnet_exporter_series_total 1\n"));
        // Non-colliding exporter metrics are still present.
        assert!(output.contains("bacnet_exporter_observations_total 1"));
    }

    #[test]
    fn test_concurrent_observe() {
        let registry = registry();

        std::thread::scope(|scope| {
            for t in 0..10u64 {
                let registry = &registry;
                scope.spawn(move || {
                    for i in 0..100u64 {
                        let point = format!("point {}", t * 100 + i);
                        // Two writes per key; the second one must win.
                        for v in [0.0, (t * 100 + i) as f64] {
                            registry.observe(
                                &DeviceId::Number(t),
                                &point,
                                &Unit::NoUnit,
                                Some(&PresentValue::Number(v)),
                                "h",
                            );
                        }
                    }
                });
            }
        });

        assert_eq!(registry.label_count(), 1000);
        for t in 0..10u64 {
            for i in 0..100u64 {
                let n = t * 100 + i;
                let metric = format!("bacnet_{}_point_{}_noUnit", t, n);
                let label = format!("point_{}", n);
                assert_eq!(
                    registry.value(&metric, &t.to_string(), &label),
                    Some(n as f64)
                );
            }
        }
    }
}
