//! Application state shared across handlers.
//!
//! The acquisition loop writes into this state through
//! [`crate::collector::MetricsSink`]; HTTP handlers only read from it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use waveplus_core::{DeviceIdentity, SensorValues};

use crate::config::Config;

/// Shared application state.
pub struct AppState {
    /// Configuration, fixed for the lifetime of the process.
    pub config: Config,
    /// Latest reading per device.
    pub latest: RwLock<BTreeMap<DeviceIdentity, DeviceReading>>,
    /// Acquisition loop counters.
    pub collector: CollectorStats,
}

impl AppState {
    /// Create new application state.
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            config,
            latest: RwLock::new(BTreeMap::new()),
            collector: CollectorStats::new(),
        })
    }

    /// Record a reading as the latest for its device.
    pub async fn record(&self, identity: DeviceIdentity, values: SensorValues) {
        let captured_at = OffsetDateTime::now_utc();
        let mut latest = self.latest.write().await;
        let entry = latest.entry(identity).or_insert(DeviceReading {
            values,
            captured_at,
            read_count: 0,
        });
        entry.values = values;
        entry.captured_at = captured_at;
        entry.read_count += 1;
    }
}

/// The most recent reading from one device.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DeviceReading {
    /// Decoded measurements.
    pub values: SensorValues,
    /// When the reading was taken.
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    /// Successful reads from this device since start.
    pub read_count: u64,
}

/// Counters describing the acquisition loop.
pub struct CollectorStats {
    started_at: OffsetDateTime,
    scans_ok: AtomicU64,
    scans_failed: AtomicU64,
    reads_ok: AtomicU64,
    reads_failed: AtomicU64,
    recoveries: AtomicU64,
    devices_discovered: AtomicU64,
    /// Unix timestamp of the last successful cycle, 0 if none.
    last_success: AtomicI64,
}

impl CollectorStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self {
            started_at: OffsetDateTime::now_utc(),
            scans_ok: AtomicU64::new(0),
            scans_failed: AtomicU64::new(0),
            reads_ok: AtomicU64::new(0),
            reads_failed: AtomicU64::new(0),
            recoveries: AtomicU64::new(0),
            devices_discovered: AtomicU64::new(0),
            last_success: AtomicI64::new(0),
        }
    }

    /// Count a finished scan.
    pub fn record_scan(&self, ok: bool) {
        let counter = if ok {
            &self.scans_ok
        } else {
            &self.scans_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold in the outcome of a READING phase.
    pub fn record_cycle(&self, discovered: usize, read: usize, failed: usize) {
        self.devices_discovered
            .store(discovered as u64, Ordering::Relaxed);
        self.reads_ok.fetch_add(read as u64, Ordering::Relaxed);
        self.reads_failed.fetch_add(failed as u64, Ordering::Relaxed);
        if read > 0 {
            self.last_success.store(
                OffsetDateTime::now_utc().unix_timestamp(),
                Ordering::Relaxed,
            );
        }
    }

    /// Count a recovery action.
    pub fn record_recovery(&self) {
        self.recoveries.fetch_add(1, Ordering::Relaxed);
    }

    /// When the exporter started.
    pub fn started_at(&self) -> OffsetDateTime {
        self.started_at
    }

    /// Time of the last cycle that read at least one device.
    pub fn last_success(&self) -> Option<OffsetDateTime> {
        match self.last_success.load(Ordering::Relaxed) {
            0 => None,
            ts => OffsetDateTime::from_unix_timestamp(ts).ok(),
        }
    }

    /// Copy the counters out.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            scans_ok: self.scans_ok.load(Ordering::Relaxed),
            scans_failed: self.scans_failed.load(Ordering::Relaxed),
            reads_ok: self.reads_ok.load(Ordering::Relaxed),
            reads_failed: self.reads_failed.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
            devices_discovered: self.devices_discovered.load(Ordering::Relaxed),
        }
    }
}

impl Default for CollectorStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`CollectorStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub scans_ok: u64,
    pub scans_failed: u64,
    pub reads_ok: u64,
    pub reads_failed: u64,
    pub recoveries: u64,
    pub devices_discovered: u64,
}
