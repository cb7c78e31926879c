//! HTTP endpoints for the exporter.
//!
//! - `GET /metrics`: Prometheus text exposition of the latest readings and
//!   the acquisition loop counters
//! - `GET /api/health`: liveness and loop summary
//! - `GET /api/devices`: latest reading per device as JSON
//!
//! # Example
//!
//! ```ignore
//! use waveplus_exporter::api;
//!
//! let app = api::router().with_state(state);
//! ```

use std::fmt::Write as _;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use serde::Serialize;
use time::OffsetDateTime;

use waveplus_core::SensorValues;

use crate::state::{AppState, StatsSnapshot};

/// Content type for Prometheus text format 0.0.4.
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/devices", get(list_devices))
        .route("/metrics", get(prometheus_metrics))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    /// Last cycle that read at least one device.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_success: Option<OffsetDateTime>,
    /// Devices with at least one reading.
    pub devices: usize,
    pub collector: StatsSnapshot,
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let devices = state.latest.read().await.len();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
        started_at: state.collector.started_at(),
        last_success: state.collector.last_success(),
        devices,
        collector: state.collector.snapshot(),
    })
}

/// Latest reading for one device.
#[derive(Debug, Serialize)]
pub struct DeviceResponse {
    /// Decimal serial number.
    pub serial: String,
    #[serde(flatten)]
    pub values: SensorValues,
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    pub read_count: u64,
}

/// List the latest reading of every device seen so far.
async fn list_devices(State(state): State<Arc<AppState>>) -> Json<Vec<DeviceResponse>> {
    let latest = state.latest.read().await;
    Json(
        latest
            .iter()
            .map(|(identity, reading)| DeviceResponse {
                serial: identity.to_string(),
                values: reading.values,
                captured_at: reading.captured_at,
                read_count: reading.read_count,
            })
            .collect(),
    )
}

/// Prometheus metrics endpoint.
///
/// Per-device gauges are labelled with `serial`:
///
/// - `waveplus_humidity_percent`
/// - `waveplus_radon_short_term_bqm3` / `waveplus_radon_long_term_bqm3`
/// - `waveplus_temperature_celsius`
/// - `waveplus_pressure_hpa`
/// - `waveplus_co2_ppm`
/// - `waveplus_voc_ppb`
/// - `waveplus_reading_age_seconds`
///
/// Loop counters: `waveplus_scan_cycles_total{outcome}`,
/// `waveplus_reads_total{outcome}`, `waveplus_recoveries_total`,
/// `waveplus_last_success_timestamp_seconds`, `waveplus_devices_discovered`.
async fn prometheus_metrics(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    if !state.config.server.metrics_enabled {
        return Err(AppError::NotFound(
            "Prometheus metrics endpoint is disabled".to_string(),
        ));
    }

    let output = render_metrics(&state, OffsetDateTime::now_utc()).await;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        output,
    ))
}

/// One per-device gauge family.
struct Gauge {
    name: &'static str,
    help: &'static str,
    value: fn(&SensorValues) -> f64,
}

const GAUGES: &[Gauge] = &[
    Gauge {
        name: "waveplus_humidity_percent",
        help: "Relative humidity percentage",
        value: |v| f64::from(v.humidity),
    },
    Gauge {
        name: "waveplus_radon_short_term_bqm3",
        help: "Short-term radon average in Bq/m³",
        value: |v| f64::from(v.radon_short),
    },
    Gauge {
        name: "waveplus_radon_long_term_bqm3",
        help: "Long-term radon average in Bq/m³",
        value: |v| f64::from(v.radon_long),
    },
    Gauge {
        name: "waveplus_temperature_celsius",
        help: "Temperature in degrees Celsius",
        value: |v| f64::from(v.temperature),
    },
    Gauge {
        name: "waveplus_pressure_hpa",
        help: "Atmospheric pressure in hectopascals",
        value: |v| f64::from(v.pressure),
    },
    Gauge {
        name: "waveplus_co2_ppm",
        help: "CO2 concentration in parts per million",
        value: |v| f64::from(v.co2),
    },
    Gauge {
        name: "waveplus_voc_ppb",
        help: "Volatile organic compounds in parts per billion",
        value: |v| f64::from(v.voc),
    },
];

fn family_header(output: &mut String, name: &str, kind: &str, help: &str) {
    let _ = writeln!(output, "# HELP {} {}", name, help);
    let _ = writeln!(output, "# TYPE {} {}", name, kind);
}

/// Render the Prometheus text exposition.
pub async fn render_metrics(state: &AppState, now: OffsetDateTime) -> String {
    let mut output = String::with_capacity(4096);

    // Clone what we need and release the lock
    let readings: Vec<_> = state
        .latest
        .read()
        .await
        .iter()
        .map(|(identity, reading)| (identity.to_string(), *reading))
        .collect();

    if !readings.is_empty() {
        for gauge in GAUGES {
            family_header(&mut output, gauge.name, "gauge", gauge.help);
            for (serial, reading) in &readings {
                let _ = writeln!(
                    output,
                    "{}{{serial=\"{}\"}} {}",
                    gauge.name,
                    escape_label_value(serial),
                    (gauge.value)(&reading.values)
                );
            }
            output.push('\n');
        }

        family_header(
            &mut output,
            "waveplus_reading_age_seconds",
            "gauge",
            "Age of the latest reading in seconds",
        );
        for (serial, reading) in &readings {
            let age = (now - reading.captured_at).whole_seconds().max(0);
            let _ = writeln!(
                output,
                "waveplus_reading_age_seconds{{serial=\"{}\"}} {}",
                escape_label_value(serial),
                age
            );
        }
        output.push('\n');
    }

    let stats = state.collector.snapshot();

    family_header(
        &mut output,
        "waveplus_scan_cycles_total",
        "counter",
        "Completed scans by outcome",
    );
    let _ = writeln!(output, "waveplus_scan_cycles_total{{outcome=\"ok\"}} {}", stats.scans_ok);
    let _ = writeln!(
        output,
        "waveplus_scan_cycles_total{{outcome=\"failed\"}} {}\n",
        stats.scans_failed
    );

    family_header(
        &mut output,
        "waveplus_reads_total",
        "counter",
        "Device reads by outcome",
    );
    let _ = writeln!(output, "waveplus_reads_total{{outcome=\"ok\"}} {}", stats.reads_ok);
    let _ = writeln!(
        output,
        "waveplus_reads_total{{outcome=\"failed\"}} {}\n",
        stats.reads_failed
    );

    family_header(
        &mut output,
        "waveplus_recoveries_total",
        "counter",
        "Recovery actions taken after failed cycles",
    );
    let _ = writeln!(output, "waveplus_recoveries_total {}\n", stats.recoveries);

    family_header(
        &mut output,
        "waveplus_devices_discovered",
        "gauge",
        "Devices found by the most recent scan",
    );
    let _ = writeln!(
        output,
        "waveplus_devices_discovered {}\n",
        stats.devices_discovered
    );

    if let Some(last) = state.collector.last_success() {
        family_header(
            &mut output,
            "waveplus_last_success_timestamp_seconds",
            "gauge",
            "Unix time of the last cycle that read at least one device",
        );
        let _ = writeln!(
            output,
            "waveplus_last_success_timestamp_seconds {}",
            last.unix_timestamp()
        );
    }

    output
}

/// Escape special characters in Prometheus label values.
fn escape_label_value(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}
