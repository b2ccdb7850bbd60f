//! Device and point topology handed over by a discovery source.
//!
//! Every type here is a plain value copy. A source produces a fresh
//! `Vec<DeviceSnapshot>` on each poll, so nothing downstream shares
//! mutable state with the transport.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a discovered BACnet device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceId {
    /// Numeric device instance (e.g. `599`).
    Number(u64),
    /// Free-form device name.
    Name(String),
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceId::Number(n) => write!(f, "{}", n),
            DeviceId::Name(s) => f.write_str(s),
        }
    }
}

impl From<u64> for DeviceId {
    fn from(v: u64) -> Self {
        DeviceId::Number(v)
    }
}

impl From<&str> for DeviceId {
    fn from(v: &str) -> Self {
        DeviceId::Name(v.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(v: String) -> Self {
        DeviceId::Name(v)
    }
}

/// Engineering unit of a point.
///
/// Analog points carry a single unit, multi-state points carry the ordered
/// list of their state texts, and some points carry nothing at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Unit {
    #[default]
    NoUnit,
    Scalar(String),
    List(Vec<String>),
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::NoUnit => f.write_str("noUnit"),
            Unit::Scalar(s) => f.write_str(s),
            Unit::List(items) => write!(f, "[{}]", items.join(", ")),
        }
    }
}

impl From<&str> for Unit {
    fn from(v: &str) -> Self {
        Unit::Scalar(v.to_string())
    }
}

impl From<Vec<&str>> for Unit {
    fn from(v: Vec<&str>) -> Self {
        Unit::List(v.into_iter().map(String::from).collect())
    }
}

/// Last sampled present value of a point, as reported by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PresentValue {
    Boolean(bool),
    Number(f64),
    Text(String),
}

impl PresentValue {
    /// Coerce to a float.
    ///
    /// Booleans map to `1.0`/`0.0` and text is parsed as a decimal number.
    /// Returns `None` for text that is not numeric (e.g. `"on"`).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PresentValue::Number(v) => Some(*v),
            PresentValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            PresentValue::Text(s) => s.trim().parse::<f64>().ok(),
        }
    }
}

impl From<f64> for PresentValue {
    fn from(v: f64) -> Self {
        PresentValue::Number(v)
    }
}

impl From<bool> for PresentValue {
    fn from(v: bool) -> Self {
        PresentValue::Boolean(v)
    }
}

impl From<&str> for PresentValue {
    fn from(v: &str) -> Self {
        PresentValue::Text(v.to_string())
    }
}

/// A single readable point on a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointSnapshot {
    /// Object name (e.g. "Room Temp").
    pub name: String,

    /// Engineering unit.
    #[serde(default)]
    pub unit: Unit,

    /// Last sampled value, `None` when the point could not be read.
    #[serde(default)]
    pub value: Option<PresentValue>,
}

impl PointSnapshot {
    /// Create a point snapshot.
    pub fn new(
        name: impl Into<String>,
        unit: impl Into<Unit>,
        value: Option<PresentValue>,
    ) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            value,
        }
    }
}

/// A discovered device and the current state of its points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    /// Device identifier.
    pub id: DeviceId,

    /// Points exposed by the device.
    #[serde(default)]
    pub points: Vec<PointSnapshot>,
}

impl DeviceSnapshot {
    /// Create a device snapshot with no points.
    pub fn new(id: impl Into<DeviceId>) -> Self {
        Self {
            id: id.into(),
            points: Vec::new(),
        }
    }

    /// Add a point to this device.
    pub fn with_point(mut self, point: PointSnapshot) -> Self {
        self.points.push(point);
        self
    }
}
