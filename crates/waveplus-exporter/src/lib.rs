//! Prometheus exporter for Airthings Wave Plus sensors.
//!
//! This crate runs the acquisition loop from `waveplus-core` in the
//! background and serves what it collects over HTTP:
//! - Latest reading per device, keyed by serial number
//! - Scan, read and recovery counters for the loop itself
//!
//! # Endpoints
//!
//! - `GET /metrics` - Prometheus text exposition
//! - `GET /api/health` - Service health and loop summary
//! - `GET /api/devices` - Latest reading per device as JSON
//!
//! # Configuration
//!
//! The exporter reads configuration from `~/.config/waveplus/exporter.toml`:
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:9200"
//! metrics_enabled = true
//!
//! [acquisition]
//! scan_duration_secs = 4
//! read_interval_secs = 60
//! retries = 3
//! watchdog_min_secs = 300
//! ```
//!
//! When the watchdog expires the binary exits with a non-zero status so a
//! supervisor can restart it.

pub mod api;
pub mod collector;
pub mod config;
pub mod state;

pub use collector::{Collector, MetricsSink};
pub use config::{AcquisitionSettings, Config, ConfigError, ServerConfig, ValidationError};
pub use state::{AppState, CollectorStats, DeviceReading, StatsSnapshot};
