//! Liveness watchdog for the acquisition loop.
//!
//! A pulse task ticks at a fixed interval. Each tick increments a counter
//! owned by a single watchdog task; a successful read cycle resets it. Once
//! the silence measured by the counter exceeds the threshold, the watchdog
//! fires and the loop gives up so that a supervisor can restart the process.
//!
//! The counter is never shared: pulses and resets reach the owner task as
//! messages on one channel.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Timing for the watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogConfig {
    /// Time between pulses.
    pub pulse_interval: Duration,
    /// Silence that must be exceeded before the watchdog fires.
    pub threshold: Duration,
}

impl WatchdogConfig {
    /// Create a watchdog config from explicit values.
    pub fn new(pulse_interval: Duration, threshold: Duration) -> Self {
        Self {
            pulse_interval,
            threshold,
        }
    }

    /// Derive the threshold from the loop timings:
    /// `max(minimum, multiplier × (read_interval + scan_duration))`.
    pub fn from_timings(
        pulse_interval: Duration,
        read_interval: Duration,
        scan_duration: Duration,
        minimum: Duration,
        multiplier: u32,
    ) -> Self {
        let cycle = read_interval.saturating_add(scan_duration);
        Self::new(pulse_interval, minimum.max(cycle.saturating_mul(multiplier)))
    }
}

/// Result of a pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Still within the threshold.
    Alive,
    /// The threshold was exceeded.
    Expired {
        /// Silence accumulated since the last reset.
        silent_for: Duration,
    },
}

/// The pulse counter.
#[derive(Debug, Clone)]
pub struct WatchdogState {
    config: WatchdogConfig,
    pulses: u32,
}

impl WatchdogState {
    /// Create a counter at zero.
    pub fn new(config: WatchdogConfig) -> Self {
        Self { config, pulses: 0 }
    }

    /// Pulses counted since the last reset.
    pub fn pulses(&self) -> u32 {
        self.pulses
    }

    /// Silence accumulated since the last reset.
    pub fn silent_for(&self) -> Duration {
        self.config.pulse_interval.saturating_mul(self.pulses)
    }

    /// Count one pulse.
    pub fn pulse(&mut self) -> Verdict {
        self.pulses = self.pulses.saturating_add(1);
        let silent_for = self.silent_for();
        if silent_for > self.config.threshold {
            Verdict::Expired { silent_for }
        } else {
            Verdict::Alive
        }
    }

    /// Zero the counter.
    pub fn reset(&mut self) {
        self.pulses = 0;
    }
}

#[derive(Debug, Clone, Copy)]
enum Event {
    Pulse,
    Reset,
}

/// Feeds resets to a running watchdog.
#[derive(Debug, Clone)]
pub struct WatchdogHandle {
    tx: mpsc::UnboundedSender<Event>,
}

impl WatchdogHandle {
    /// Report a successful cycle.
    pub fn reset(&self) {
        // The owner task only stops after firing or on shutdown
        let _ = self.tx.send(Event::Reset);
    }
}

/// Completes when the watchdog fires.
///
/// Dropping it stops the watchdog tasks.
#[derive(Debug)]
pub struct Expiry {
    rx: Option<oneshot::Receiver<Duration>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Expiry {
    /// Wait for the watchdog to fire and return the silence it measured.
    ///
    /// Never completes once the watchdog has been shut down.
    pub async fn wait(&mut self) -> Duration {
        if let Some(rx) = self.rx.as_mut() {
            let fired = rx.await;
            self.rx = None;
            if let Ok(silent_for) = fired {
                return silent_for;
            }
        }
        std::future::pending().await
    }
}

impl Drop for Expiry {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Start the pulse and owner tasks.
///
/// Both tasks stop when `cancel` fires.
pub fn spawn(config: WatchdogConfig, cancel: CancellationToken) -> (WatchdogHandle, Expiry) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (expired_tx, expired_rx) = oneshot::channel();

    let pulse_tx = tx.clone();
    let pulse_cancel = cancel.clone();
    let pulse_interval = config.pulse_interval;
    let pulser = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + pulse_interval, pulse_interval);
        loop {
            tokio::select! {
                _ = pulse_cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if pulse_tx.send(Event::Pulse).is_err() {
                        break;
                    }
                }
            }
        }
    });

    let owner = tokio::spawn(async move {
        let mut state = WatchdogState::new(config);
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                Event::Reset => {
                    debug!(pulses = state.pulses(), "Watchdog reset");
                    state.reset();
                }
                Event::Pulse => {
                    if let Verdict::Expired { silent_for } = state.pulse() {
                        error!(
                            ?silent_for,
                            threshold = ?config.threshold,
                            "No successful read cycle within the watchdog threshold"
                        );
                        let _ = expired_tx.send(silent_for);
                        break;
                    }
                }
            }
        }
    });

    (
        WatchdogHandle { tx },
        Expiry {
            rx: Some(expired_rx),
            tasks: vec![pulser, owner],
        },
    )
}
