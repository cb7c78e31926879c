//! Device discovery and scanning.
//!
//! This module finds Wave Plus devices in range and turns each one into a
//! [`SensorSession`], keyed by the serial-number identity it advertises.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use waveplus_types::{DeviceIdentity, identity};

use crate::error::{Error, Result};
use crate::radio::{Advertisement, Radio};
use crate::retry::{RetryConfig, classify, with_retry};
use crate::session::{SensorSession, SessionConfig};

/// Extra time allowed on top of the listen window before a scan is
/// considered hung.
const LISTEN_GRACE: Duration = Duration::from_secs(5);

/// Sessions found by one scan, keyed by device identity.
pub type DiscoveryResult = BTreeMap<DeviceIdentity, SensorSession>;

/// Options for scanning.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// How long each listen lasts. Also used as the connect timeout of the
    /// sessions the scan produces.
    pub duration: Duration,
    /// Attempt budget for the scan, reused for each session's receive.
    pub retry: RetryConfig,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(4),
            retry: RetryConfig::new(3),
        }
    }
}

impl ScanOptions {
    /// Create new scan options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scan duration.
    #[must_use]
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Set the retry configuration.
    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            connect_timeout: self.duration,
            retry: self.retry.clone(),
        }
    }
}

/// Whether an advertisement looks like a readable Wave Plus.
///
/// The advertiser must be connectable and its manufacturer data must carry
/// the Airthings signature followed by a serial number.
pub fn wave_plus_filter(advertisement: &Advertisement) -> bool {
    advertisement.connectable && identity::has_signature(&advertisement.manufacturer_data)
}

/// Discovers Wave Plus devices.
pub struct Scanner {
    radio: Arc<dyn Radio>,
    options: ScanOptions,
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Scanner {
    /// Create a scanner over `radio`.
    pub fn new(radio: Arc<dyn Radio>, options: ScanOptions) -> Self {
        Self { radio, options }
    }

    /// Scan for devices in range.
    ///
    /// An empty result means nothing was found and is not an error.
    ///
    /// # Errors
    ///
    /// - [`Error::Cancelled`] if `cancel` fires
    /// - [`Error::ScanExhausted`] when every listen failed or hung
    #[tracing::instrument(level = "info", skip_all, fields(duration = ?self.options.duration))]
    pub async fn scan(&self, cancel: &CancellationToken) -> Result<DiscoveryResult> {
        let advertisements =
            with_retry(&self.options.retry, "scan", cancel, classify, || self.listen(cancel))
                .await
                .map_err(|failure| {
                    failure.map_exhausted(|attempts, last| Error::ScanExhausted {
                        attempts,
                        source: Box::new(last),
                    })
                })?;

        let sessions = self.build_sessions(advertisements);
        info!("Scan complete. Found {} device(s)", sessions.len());
        Ok(sessions)
    }

    async fn listen(&self, cancel: &CancellationToken) -> Result<Vec<Advertisement>> {
        let limit = self.options.duration + LISTEN_GRACE;
        timeout(
            limit,
            self.radio
                .scan(self.options.duration, &wave_plus_filter, cancel),
        )
        .await
        .map_err(|_| Error::timeout("scan", limit))?
    }

    fn build_sessions(&self, advertisements: Vec<Advertisement>) -> DiscoveryResult {
        // Latest advertisement per link address, in first-seen order
        let mut latest: Vec<Advertisement> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for advertisement in advertisements {
            match index.get(&advertisement.address) {
                Some(&slot) => latest[slot] = advertisement,
                None => {
                    index.insert(advertisement.address.clone(), latest.len());
                    latest.push(advertisement);
                }
            }
        }

        let config = self.options.session_config();
        let mut sessions = DiscoveryResult::new();
        for advertisement in latest {
            let identity = match identity::resolve(&advertisement.manufacturer_data) {
                Ok(identity) => identity,
                Err(e) => {
                    warn!(address = %advertisement.address, error = %e, "Dropping advertisement");
                    continue;
                }
            };

            debug!(%identity, address = %advertisement.address, rssi = ?advertisement.rssi, "Found Wave Plus");
            let session = SensorSession::new(
                identity,
                advertisement.address.clone(),
                config.clone(),
                Arc::clone(&self.radio),
            );
            if let Some(previous) = sessions.insert(identity, session) {
                warn!(
                    %identity,
                    previous = previous.address(),
                    current = %advertisement.address,
                    "Two devices advertise the same serial, keeping the latest"
                );
            }
        }
        sessions
    }
}
