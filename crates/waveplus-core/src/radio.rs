//! Radio abstraction.
//!
//! The acquisition pipeline only ever talks to the Bluetooth stack through
//! the [`Radio`] and [`Connection`] traits. [`crate::btle::BtleRadio`] is the
//! real implementation; [`crate::mock::MockRadio`] drives the tests.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Result;

/// One advertisement observed during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Link address of the advertiser (may rotate over time).
    pub address: String,
    /// Whether the advertiser accepts connections.
    pub connectable: bool,
    /// Raw manufacturer-specific payload, company identifier included.
    pub manufacturer_data: Vec<u8>,
    /// Signal strength, when the stack reports it.
    pub rssi: Option<i16>,
}

impl Advertisement {
    /// Create a connectable advertisement.
    pub fn new(address: impl Into<String>, manufacturer_data: impl Into<Vec<u8>>) -> Self {
        Self {
            address: address.into(),
            connectable: true,
            manufacturer_data: manufacturer_data.into(),
            rssi: None,
        }
    }

    /// Set whether the advertiser is connectable.
    #[must_use]
    pub fn connectable(mut self, connectable: bool) -> Self {
        self.connectable = connectable;
        self
    }

    /// Set the signal strength.
    #[must_use]
    pub fn rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }
}

/// Predicate applied to every advertisement seen during a scan.
pub type ScanFilter = dyn Fn(&Advertisement) -> bool + Send + Sync;

/// A handle on the local Bluetooth radio.
///
/// The radio is shared by the scanner, every session, and the recovery step,
/// so all methods take `&self`.
#[async_trait]
pub trait Radio: Send + Sync {
    /// Bring the radio up. Opening an open radio is a no-op.
    async fn open(&self) -> Result<()>;

    /// Release the radio. Closing a closed radio is a no-op.
    async fn close(&self) -> Result<()>;

    /// Listen for advertisements for `duration` and return those accepted by
    /// `filter`.
    ///
    /// Returns [`crate::Error::Cancelled`] if `cancel` fires first.
    async fn scan(
        &self,
        duration: Duration,
        filter: &ScanFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Advertisement>>;

    /// Establish a connection to the device at `address`.
    async fn connect(
        &self,
        address: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn Connection>>;
}

/// An open link to one device.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Link address of the peer.
    fn address(&self) -> &str;

    /// Locate the GATT service with the given UUID.
    async fn discover_service(&mut self, service: Uuid) -> Result<()>;

    /// Locate a characteristic inside the discovered service.
    async fn discover_characteristic(&mut self, characteristic: Uuid) -> Result<()>;

    /// Read the value of the discovered characteristic.
    async fn read_characteristic(&mut self) -> Result<Vec<u8>>;

    /// Request link teardown.
    async fn disconnect(&mut self) -> Result<()>;

    /// Wait until the stack confirms the link is down.
    async fn wait_disconnected(&mut self) -> Result<()>;
}
