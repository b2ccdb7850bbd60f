//! Prometheus metrics exporter for BACnet device points.
//!
//! This crate samples the present value of every point on every discovered
//! BACnet device and exposes them via an HTTP `/metrics` endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │  Device Source  │────>│     Sampler     │────>│    Registry     │────>│   HTTP Server   │
//! │   (topology)    │     │ (filter, poll)  │     │ (name, dedupe)  │     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! Each point becomes a gauge named `bacnet_<device>_<point>_<unit>` with
//! `device` and `name` labels:
//!
//! ```text
//! bacnet_599_Room_Temp_degreesFahrenheit{device="599",name="Room_Temp"} 72.5
//! ```
//!
//! # Usage
//!
//! ```bash
//! bacsight-exporter-prometheus --config exporter.json5
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod config;
pub mod http;
pub mod mapping;
pub mod registry;
pub mod runner;
pub mod sampler;
pub mod source;

pub use config::ExporterConfig;
pub use http::HttpServer;
pub use registry::{MetricRegistry, SharedRegistry};
pub use runner::{ExporterRunner, RunnerError};
pub use sampler::{PointFilter, SampleReport, Sampler, SamplerError, SharedSampler};
pub use source::{DeviceSource, FileSource, SimulatedSource, Source, SourceError, StaticSource};
