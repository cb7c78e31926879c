//! Background data collector.
//!
//! Runs the acquisition loop and feeds everything it reports into
//! [`AppState`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use waveplus_core::{
    AcquisitionLoop, CycleReport, DeviceIdentity, Exit, Radio, SensorValues, Sink,
};

use crate::state::AppState;

/// A [`Sink`] that records readings and loop counters in [`AppState`].
#[derive(Clone)]
pub struct MetricsSink {
    state: Arc<AppState>,
}

impl MetricsSink {
    /// Create a sink writing into `state`.
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl Sink for MetricsSink {
    async fn publish(&self, identity: &DeviceIdentity, values: SensorValues) {
        debug!(%identity, co2 = values.co2, radon_short = values.radon_short, "Collected reading");
        self.state.record(*identity, values).await;
    }

    async fn cycle_completed(&self, report: &CycleReport) {
        self.state
            .collector
            .record_cycle(report.discovered, report.read, report.failed);
    }

    async fn recovered(&self, _action: &str) {
        self.state.collector.record_recovery();
    }

    async fn scanned(&self, ok: bool) {
        self.state.collector.record_scan(ok);
    }
}

/// Background collector that runs the acquisition loop.
pub struct Collector {
    acquisition: AcquisitionLoop,
}

impl Collector {
    /// Create a collector reading through `radio` into `state`.
    pub fn new(state: Arc<AppState>, radio: Arc<dyn Radio>) -> Self {
        let config = state.config.acquisition.to_config();
        let sink = Arc::new(MetricsSink::new(state));
        Self {
            acquisition: AcquisitionLoop::new(radio, sink, config),
        }
    }

    /// Run until shutdown or watchdog expiry.
    pub async fn run(&self, cancel: &CancellationToken) -> waveplus_core::Result<Exit> {
        self.acquisition.run(cancel).await
    }
}
