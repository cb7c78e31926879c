//! The acquisition loop.
//!
//! A small state machine drives scanning, reading and recovery:
//!
//! ```text
//! SCANNING --ok--> READING --any read ok--> (read interval) --> SCANNING
//!    |                |
//!    +--error--+      +--none read / no devices--+
//!              v                                 v
//!           COOLDOWN --(recovery, delay)--> SCANNING
//! ```
//!
//! A watchdog runs beside the loop. If no READING phase succeeds for longer
//! than the watchdog threshold, the loop enters FATAL and [`AcquisitionLoop::run`]
//! returns [`Exit::WatchdogExpired`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::radio::Radio;
use crate::retry::RetryConfig;
use crate::scan::{DiscoveryResult, ScanOptions, Scanner};
use crate::sink::{CycleReport, Sink};
use crate::watchdog::{self, WatchdogConfig, WatchdogHandle};

/// Timing and retry settings for the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionConfig {
    /// Length of one scan listen; also the connect timeout.
    pub scan_duration: Duration,
    /// Pause after a successful READING phase.
    pub read_interval: Duration,
    /// Total attempts per scan and per device read.
    pub retries: u32,
    /// Watchdog pulse interval.
    pub pulse_interval: Duration,
    /// Lower bound for the watchdog threshold.
    pub watchdog_min: Duration,
    /// Threshold multiplier applied to `read_interval + scan_duration`.
    pub watchdog_multiplier: u32,
    /// Pause after the recovery action.
    pub cooldown: Duration,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            scan_duration: Duration::from_secs(4),
            read_interval: Duration::from_secs(60),
            retries: 3,
            pulse_interval: Duration::from_secs(5),
            watchdog_min: Duration::from_secs(300),
            watchdog_multiplier: 3,
            cooldown: Duration::from_secs(5),
        }
    }
}

impl AcquisitionConfig {
    /// Check that the settings can drive the loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending setting.
    pub fn validate(&self) -> Result<()> {
        if self.scan_duration.is_zero() {
            return Err(Error::invalid_config("scan duration must be positive"));
        }
        if self.retries == 0 {
            return Err(Error::invalid_config("retries must be at least 1"));
        }
        if self.pulse_interval.is_zero() {
            return Err(Error::invalid_config("pulse interval must be positive"));
        }
        if self.watchdog_threshold() < self.pulse_interval {
            return Err(Error::invalid_config(
                "watchdog threshold must be at least one pulse interval",
            ));
        }
        Ok(())
    }

    /// `max(watchdog_min, watchdog_multiplier × (read_interval + scan_duration))`.
    pub fn watchdog_threshold(&self) -> Duration {
        self.watchdog().threshold
    }

    /// Watchdog timing derived from these settings.
    pub fn watchdog(&self) -> WatchdogConfig {
        WatchdogConfig::from_timings(
            self.pulse_interval,
            self.read_interval,
            self.scan_duration,
            self.watchdog_min,
            self.watchdog_multiplier,
        )
    }

    /// Scanner settings derived from these settings.
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions::new()
            .duration(self.scan_duration)
            .retry(RetryConfig::new(self.retries))
    }
}

/// Loop state.
#[derive(Debug)]
pub enum State {
    /// Looking for devices.
    Scanning,
    /// Reading every session found by the last scan.
    Reading(DiscoveryResult),
    /// Recovering after a failed cycle.
    Cooldown,
    /// The watchdog fired. Terminal.
    Fatal {
        /// Silence measured by the watchdog.
        silent_for: Duration,
    },
}

impl State {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            State::Scanning => "scanning",
            State::Reading(_) => "reading",
            State::Cooldown => "cooldown",
            State::Fatal { .. } => "fatal",
        }
    }
}

/// Why [`AcquisitionLoop::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// The shutdown signal fired.
    Shutdown,
    /// No successful cycle within the watchdog threshold.
    WatchdogExpired {
        /// Silence measured by the watchdog.
        silent_for: Duration,
    },
}

/// Action taken during COOLDOWN.
#[async_trait]
pub trait Recovery: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &str;

    /// Try to bring the radio back to a usable state.
    async fn recover(&self, radio: &dyn Radio) -> Result<()>;
}

/// Close the radio and open it again.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReopenRadio;

#[async_trait]
impl Recovery for ReopenRadio {
    fn name(&self) -> &str {
        "reopen radio"
    }

    async fn recover(&self, radio: &dyn Radio) -> Result<()> {
        if let Err(e) = radio.close().await {
            warn!(error = %e, "Closing radio failed");
        }
        radio.open().await
    }
}

/// Sleep for `duration` unless `cancel` fires first.
async fn pause(duration: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = sleep(duration) => Ok(()),
    }
}

/// Scans, reads, publishes, recovers.
pub struct AcquisitionLoop {
    radio: Arc<dyn Radio>,
    scanner: Scanner,
    sink: Arc<dyn Sink>,
    recovery: Box<dyn Recovery>,
    config: AcquisitionConfig,
}

impl std::fmt::Debug for AcquisitionLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionLoop")
            .field("recovery", &self.recovery.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AcquisitionLoop {
    /// Create a loop with the default [`ReopenRadio`] recovery.
    pub fn new(radio: Arc<dyn Radio>, sink: Arc<dyn Sink>, config: AcquisitionConfig) -> Self {
        let scanner = Scanner::new(Arc::clone(&radio), config.scan_options());
        Self {
            radio,
            scanner,
            sink,
            recovery: Box::new(ReopenRadio),
            config,
        }
    }

    /// Replace the recovery action.
    #[must_use]
    pub fn with_recovery(mut self, recovery: Box<dyn Recovery>) -> Self {
        self.recovery = recovery;
        self
    }

    /// Loop settings.
    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    /// Run until shutdown or until the watchdog fires.
    ///
    /// The radio is opened on entry and closed on exit. When the watchdog
    /// fires mid-step, the step is cancelled and awaited so that any open
    /// link is torn down before returning.
    ///
    /// # Errors
    ///
    /// Only [`Error::InvalidConfig`]; cycle failures are handled internally.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<Exit> {
        self.config.validate()?;

        let threshold = self.config.watchdog_threshold();
        info!(?threshold, recovery = self.recovery.name(), "Acquisition loop starting");

        let (watchdog, mut expiry) = watchdog::spawn(self.config.watchdog(), cancel.child_token());

        let mut state = match self.radio.open().await {
            Ok(()) => State::Scanning,
            Err(e) => {
                warn!(error = %e, "Opening radio failed");
                State::Cooldown
            }
        };

        let exit = loop {
            if let State::Fatal { silent_for } = state {
                break Exit::WatchdogExpired { silent_for };
            }

            let step_cancel = cancel.child_token();
            let step = self.step(state, &step_cancel, &watchdog);
            tokio::pin!(step);

            let raced = tokio::select! {
                silent_for = expiry.wait() => Err(silent_for),
                next = &mut step => Ok(next),
            };

            let next = match raced {
                Ok(next) => next,
                Err(silent_for) => {
                    // Let the in-flight step release its link before giving up
                    step_cancel.cancel();
                    if let Err(e) = step.await
                        && !e.is_cancelled()
                    {
                        warn!(error = %e, "Step failed while stopping");
                    }
                    Ok(State::Fatal { silent_for })
                }
            };

            state = match next {
                Ok(state) => state,
                Err(e) if e.is_cancelled() => break Exit::Shutdown,
                Err(e) => return Err(e),
            };
        };

        if let Err(e) = self.radio.close().await {
            warn!(error = %e, "Closing radio failed");
        }
        info!(?exit, "Acquisition loop stopped");
        Ok(exit)
    }

    /// Run one state transition.
    ///
    /// # Errors
    ///
    /// Only [`Error::Cancelled`].
    pub async fn step(
        &self,
        state: State,
        cancel: &CancellationToken,
        watchdog: &WatchdogHandle,
    ) -> Result<State> {
        debug!(state = state.name(), "Step");
        match state {
            State::Scanning => self.scanning(cancel).await,
            State::Reading(sessions) => self.reading(sessions, cancel, watchdog).await,
            State::Cooldown => self.cooldown(cancel).await,
            fatal @ State::Fatal { .. } => Ok(fatal),
        }
    }

    async fn scanning(&self, cancel: &CancellationToken) -> Result<State> {
        match self.scanner.scan(cancel).await {
            Ok(sessions) => {
                self.sink.scanned(true).await;
                Ok(State::Reading(sessions))
            }
            Err(e) if e.is_cancelled() => Err(Error::Cancelled),
            Err(e) => {
                warn!(error = %e, "Scan failed");
                self.sink.scanned(false).await;
                Ok(State::Cooldown)
            }
        }
    }

    async fn reading(
        &self,
        sessions: DiscoveryResult,
        cancel: &CancellationToken,
        watchdog: &WatchdogHandle,
    ) -> Result<State> {
        let mut report = CycleReport {
            discovered: sessions.len(),
            ..CycleReport::default()
        };

        for (identity, session) in &sessions {
            match session.receive(cancel).await {
                Ok(values) => {
                    report.read += 1;
                    self.sink.publish(identity, values).await;
                }
                Err(e) if e.is_cancelled() => return Err(Error::Cancelled),
                Err(e) => {
                    report.failed += 1;
                    warn!(%identity, error = %e, "Skipping device");
                }
            }
        }

        self.sink.cycle_completed(&report).await;

        if !report.succeeded() {
            if report.discovered == 0 {
                info!("No devices found");
            } else {
                warn!(failed = report.failed, "Every device failed");
            }
            return Ok(State::Cooldown);
        }

        info!(
            read = report.read,
            failed = report.failed,
            "Cycle complete, next scan in {:?}",
            self.config.read_interval
        );
        watchdog.reset();
        pause(self.config.read_interval, cancel).await?;
        Ok(State::Scanning)
    }

    async fn cooldown(&self, cancel: &CancellationToken) -> Result<State> {
        let action = self.recovery.name();
        info!(action, "Recovering");
        if let Err(e) = self.recovery.recover(self.radio.as_ref()).await {
            warn!(action, error = %e, "Recovery failed");
        }
        self.sink.recovered(action).await;
        pause(self.config.cooldown, cancel).await?;
        Ok(State::Scanning)
    }
}
