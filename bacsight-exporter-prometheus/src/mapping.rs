//! Mapping from BACnet device/point identity to Prometheus metric names.

use bacsight_common::topology::{DeviceId, Unit};

/// Token used in metric names for points without a unit.
pub const NO_UNIT: &str = "noUnit";

/// Replace every character outside `[A-Za-z0-9_]` with `_`.
///
/// Unlike [`sanitize`], the result may start with a digit. It is meant for
/// the device and point components, which also become label values.
/// Empty input yields `_`.
pub fn sanitize_fragment(raw: &str) -> String {
    if raw.is_empty() {
        return "_".to_string();
    }

    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Sanitize an identifier into a token matching `[A-Za-z_][A-Za-z0-9_]*`.
///
/// Invalid characters become `_`, and `_` is prepended when the result
/// would start with a digit. Empty input yields `_`.
pub fn sanitize(raw: &str) -> String {
    let mut result = sanitize_fragment(raw);

    if result.starts_with(|c: char| c.is_ascii_digit()) {
        result.insert(0, '_');
    }

    result
}

/// Sanitize each item and join them with `_`, preserving order.
pub fn sanitize_list<S: AsRef<str>>(items: &[S]) -> String {
    if items.is_empty() {
        return "_".to_string();
    }

    items
        .iter()
        .map(|item| sanitize(item.as_ref()))
        .collect::<Vec<_>>()
        .join("_")
}

/// Metric name token for a unit.
pub fn unit_token(unit: &Unit) -> String {
    match unit {
        Unit::NoUnit => NO_UNIT.to_string(),
        Unit::Scalar(s) => sanitize(s),
        Unit::List(items) => sanitize_list(items),
    }
}

/// HELP text for a series, built from the raw unit.
pub fn help_text(unit: &Unit) -> String {
    format!("Present Value of BACnet objects with a {} unit", unit)
}

/// Check whether a string is a valid Prometheus metric name.
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Deduplication identity of a metric series plus the labels of one sample.
///
/// Distinct `(device, point, unit)` triples that sanitize to the same name
/// share a series and are told apart only by their labels.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey {
    /// Full metric name: `{prefix}_{device}_{point}_{unit}`.
    pub name: String,
    /// Sanitized device identifier (`device` label).
    pub device: String,
    /// Sanitized point name (`name` label).
    pub point: String,
}

impl MetricKey {
    /// Build the key for a point. `prefix` must already be sanitized.
    pub fn new(prefix: &str, device: &DeviceId, point: &str, unit: &Unit) -> Self {
        let device = sanitize_fragment(&device.to_string());
        let point = sanitize_fragment(point);
        let name = format!("{}_{}_{}_{}", prefix, device, point, unit_token(unit));

        Self {
            name,
            device,
            point,
        }
    }
}

/// Escape special characters in label values.
pub fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Format a floating point value for Prometheus.
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}
