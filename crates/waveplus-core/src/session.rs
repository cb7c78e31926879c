//! One device, one read.
//!
//! A [`SensorSession`] knows how to reach a single Wave Plus and pull one set
//! of measurements from it. Every attempt opens a fresh link, reads the
//! current-readings characteristic, and tears the link down again before the
//! next attempt starts, whatever the outcome.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use waveplus_types::uuid::{SENSOR_CHARACTERISTIC, SENSOR_SERVICE};
use waveplus_types::{DeviceIdentity, SensorValues, frame};

use crate::error::{Error, Result};
use crate::radio::{Connection, Radio};
use crate::retry::{RetryConfig, classify, with_retry};

/// Connection settings for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long to wait for a link to come up (and for GATT operations).
    pub connect_timeout: Duration,
    /// Attempt budget for one [`SensorSession::receive`].
    pub retry: RetryConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(4),
            retry: RetryConfig::new(3),
        }
    }
}

/// A readable Wave Plus found by the scanner.
#[derive(Clone)]
pub struct SensorSession {
    identity: DeviceIdentity,
    address: String,
    config: SessionConfig,
    radio: Arc<dyn Radio>,
}

impl std::fmt::Debug for SensorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorSession")
            .field("identity", &self.identity)
            .field("address", &self.address)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SensorSession {
    /// Create a session for the device at `address`.
    pub fn new(
        identity: DeviceIdentity,
        address: impl Into<String>,
        config: SessionConfig,
        radio: Arc<dyn Radio>,
    ) -> Self {
        Self {
            identity,
            address: address.into(),
            config,
            radio,
        }
    }

    /// The serial-number identity of the device.
    pub fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    /// The link address the device was last seen at.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Read one set of measurements from the device.
    ///
    /// # Errors
    ///
    /// - [`Error::Cancelled`] if `cancel` fires
    /// - [`Error::ReceiveExhausted`] when every attempt failed
    #[tracing::instrument(
        level = "info",
        skip(self, cancel),
        fields(identity = %self.identity, address = %self.address)
    )]
    pub async fn receive(&self, cancel: &CancellationToken) -> Result<SensorValues> {
        let values = with_retry(&self.config.retry, "receive", cancel, classify, || {
            self.attempt(cancel)
        })
        .await
        .map_err(|failure| {
            failure.map_exhausted(|attempts, last| Error::ReceiveExhausted {
                identity: self.identity,
                attempts,
                source: Box::new(last),
            })
        })?;

        info!(
            radon_short = values.radon_short,
            co2 = values.co2,
            "Read sensor values"
        );
        Ok(values)
    }

    async fn attempt(&self, cancel: &CancellationToken) -> Result<SensorValues> {
        let mut conn = self
            .radio
            .connect(&self.address, self.config.connect_timeout, cancel)
            .await?;

        let read = tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = read_frame(conn.as_mut()) => result,
        };

        teardown(conn.as_mut()).await;

        let data = read?;
        debug!(len = data.len(), "Frame received");
        Ok(frame::decode(&data)?)
    }
}

async fn read_frame(conn: &mut dyn Connection) -> Result<Vec<u8>> {
    conn.discover_service(SENSOR_SERVICE).await?;
    conn.discover_characteristic(SENSOR_CHARACTERISTIC).await?;
    conn.read_characteristic().await
}

/// Disconnect and wait for confirmation. Failures are logged, never raised.
async fn teardown(conn: &mut dyn Connection) {
    if let Err(e) = conn.disconnect().await {
        warn!(address = conn.address(), error = %e, "Disconnect failed");
    }
    if let Err(e) = conn.wait_disconnected().await {
        warn!(address = conn.address(), error = %e, "Disconnect not confirmed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRadio;

    const ADDRESS: &str = "AA:BB:CC:DD:EE:01";

    fn reference_frame() -> Vec<u8> {
        vec![
            0, 100, 0, 0, 0x64, 0x00, 0xC8, 0x00, 0x29, 0x0E, 0xE8, 0x88, 0x59, 0x00, 0x64, 0x00,
            0, 0, 0, 0,
        ]
    }

    fn config(attempts: u32) -> SessionConfig {
        SessionConfig {
            connect_timeout: Duration::from_secs(1),
            retry: RetryConfig::new(attempts)
                .initial_delay(Duration::from_millis(1))
                .jitter(false),
        }
    }

    async fn session(radio: &MockRadio, attempts: u32) -> SensorSession {
        radio.open().await.unwrap();
        SensorSession::new(
            DeviceIdentity::new(1),
            ADDRESS,
            config(attempts),
            Arc::new(radio.clone()),
        )
    }

    #[tokio::test]
    async fn test_receive_decodes_frame() {
        let radio = MockRadio::new().with_device(ADDRESS, 1, reference_frame());
        let session = session(&radio, 3).await;

        let values = session.receive(&CancellationToken::new()).await.unwrap();
        assert_eq!(values.humidity, 50.0);
        assert_eq!(values.radon_short, 100);
        assert_eq!(values.radon_long, 200);

        let stats = radio.stats();
        assert_eq!(stats.connects, 1);
        assert_eq!(stats.disconnects, 1);
        assert_eq!(stats.waits, 1);
        assert_eq!(stats.leaked, 0);
    }

    #[tokio::test]
    async fn test_receive_succeeds_on_last_attempt() {
        let radio = MockRadio::new().with_device(ADDRESS, 1, reference_frame());
        radio.fail_reads(ADDRESS, 2);
        let session = session(&radio, 3).await;

        assert!(session.receive(&CancellationToken::new()).await.is_ok());

        let stats = radio.stats();
        assert_eq!(stats.connects, 3);
        assert_eq!(stats.disconnects, 3);
        assert_eq!(stats.max_active, 1);
    }

    #[tokio::test]
    async fn test_receive_exhaustion_reports_identity() {
        let radio = MockRadio::new().with_device(ADDRESS, 1, reference_frame());
        radio.fail_reads(ADDRESS, u32::MAX);
        let session = session(&radio, 2).await;

        let err = session.receive(&CancellationToken::new()).await.unwrap_err();
        match err {
            Error::ReceiveExhausted {
                identity, attempts, ..
            } => {
                assert_eq!(identity, DeviceIdentity::new(1));
                assert_eq!(attempts, 2);
            }
            other => panic!("expected ReceiveExhausted, got {:?}", other),
        }
        assert_eq!(radio.stats().disconnects, 2);
    }

    #[tokio::test]
    async fn test_malformed_frame_is_retried_and_disconnected() {
        let radio = MockRadio::new().with_device(ADDRESS, 1, vec![0u8; 19]);
        let session = session(&radio, 3).await;

        let err = session.receive(&CancellationToken::new()).await.unwrap_err();
        let Error::ReceiveExhausted { source, .. } = err else {
            panic!("expected ReceiveExhausted");
        };
        assert!(matches!(
            *source,
            Error::MalformedFrame {
                expected: 20,
                actual: 19
            }
        ));

        let stats = radio.stats();
        assert_eq!(stats.connects, 3);
        assert_eq!(stats.disconnects, 3);
        assert_eq!(stats.waits, 3);
    }

    #[tokio::test]
    async fn test_missing_characteristic_is_retried() {
        let radio = MockRadio::new().with_device(ADDRESS, 1, reference_frame());
        radio.hide_characteristic(ADDRESS, true);
        let session = session(&radio, 2).await;

        let err = session.receive(&CancellationToken::new()).await.unwrap_err();
        let Error::ReceiveExhausted { source, .. } = err else {
            panic!("expected ReceiveExhausted");
        };
        assert!(matches!(*source, Error::CharacteristicNotFound { .. }));
        assert_eq!(radio.stats().connects, 2);
        assert_eq!(radio.stats().leaked, 0);
    }

    #[tokio::test]
    async fn test_connect_failure_does_not_disconnect() {
        let radio = MockRadio::new().with_device(ADDRESS, 1, reference_frame());
        radio.fail_connects(ADDRESS, 1);
        let session = session(&radio, 2).await;

        assert!(session.receive(&CancellationToken::new()).await.is_ok());

        let stats = radio.stats();
        assert_eq!(stats.connects, 2);
        assert_eq!(stats.disconnects, 1);
    }

    #[tokio::test]
    async fn test_cancelled_receive_is_not_retried() {
        let radio = MockRadio::new().with_device(ADDRESS, 1, reference_frame());
        let session = session(&radio, 3).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = session.receive(&cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(radio.stats().connects, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_read_tears_link_down() {
        let radio = MockRadio::new().with_device(ADDRESS, 1, reference_frame());
        radio.delay_reads(ADDRESS, Duration::from_secs(3600));
        let session = session(&radio, 3).await;
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = session.receive(&cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));

        let stats = radio.stats();
        assert_eq!(stats.connects, 1);
        assert_eq!(stats.disconnects, stats.connects);
        assert_eq!(stats.waits, stats.connects);
        assert_eq!(stats.leaked, 0);
        assert_eq!(stats.active, 0);
    }
}
