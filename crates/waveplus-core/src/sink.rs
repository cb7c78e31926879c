//! Where decoded readings go.

use async_trait::async_trait;

use waveplus_types::{DeviceIdentity, SensorValues};

/// Summary of one READING phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Devices the preceding scan found.
    pub discovered: usize,
    /// Devices read successfully.
    pub read: usize,
    /// Devices whose retry budget ran out.
    pub failed: usize,
}

impl CycleReport {
    /// Whether at least one device was read.
    pub fn succeeded(&self) -> bool {
        self.read > 0
    }
}

/// Consumer of decoded readings.
///
/// Implementations must return promptly and keep their own failures to
/// themselves; the acquisition loop does not wait on or retry a sink.
#[async_trait]
pub trait Sink: Send + Sync {
    /// One decoded reading from `identity`.
    async fn publish(&self, identity: &DeviceIdentity, values: SensorValues);

    /// Called at the end of every READING phase.
    async fn cycle_completed(&self, _report: &CycleReport) {}

    /// Called after the loop ran its recovery action.
    async fn recovered(&self, _action: &str) {}

    /// Called after every scan with whether it succeeded.
    async fn scanned(&self, _ok: bool) {}
}

/// A sink that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl Sink for LogSink {
    async fn publish(&self, identity: &DeviceIdentity, values: SensorValues) {
        tracing::info!(
            %identity,
            humidity = values.humidity,
            radon_short = values.radon_short,
            radon_long = values.radon_long,
            temperature = values.temperature,
            pressure = values.pressure,
            co2 = values.co2,
            voc = values.voc,
            "Reading"
        );
    }
}
