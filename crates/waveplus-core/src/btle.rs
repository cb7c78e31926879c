//! [`Radio`] implementation backed by btleplug.
//!
//! btleplug does not report whether an advertiser is connectable, so every
//! peripheral seen during a scan is treated as connectable.
//!
//! btleplug keeps every peripheral it has ever seen. A scan therefore only
//! reports peripherals the adapter heard from during that scan's window.

use std::collections::HashSet;
use std::hash::Hash;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, PeripheralProperties,
    ScanFilter as BleScanFilter, Service,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::{Stream, StreamExt};
use tokio::sync::{RwLock, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use waveplus_types::uuid::AIRTHINGS_COMPANY_ID;

use crate::error::{Error, Result};
use crate::radio::{Advertisement, Connection, Radio, ScanFilter};

/// The system Bluetooth radio.
///
/// Uses the first adapter reported by the platform manager.
#[derive(Default)]
pub struct BtleRadio {
    adapter: RwLock<Option<Adapter>>,
}

impl std::fmt::Debug for BtleRadio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleRadio").finish_non_exhaustive()
    }
}

impl BtleRadio {
    /// Create a closed radio. Call [`Radio::open`] before use.
    pub fn new() -> Self {
        Self::default()
    }

    async fn adapter(&self) -> Result<Adapter> {
        self.adapter.read().await.clone().ok_or(Error::RadioClosed)
    }
}

/// Format a peripheral ID as a string.
///
/// On macOS, peripheral IDs are UUIDs rather than MAC addresses.
fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Link address for a peripheral: the MAC address where the platform exposes
/// one, the peripheral ID otherwise.
fn link_address(properties: &PeripheralProperties, id: &PeripheralId) -> String {
    let address = properties.address.to_string();
    if address == "00:00:00:00:00:00" {
        format_peripheral_id(id)
    } else {
        address
    }
}

/// Rebuild the raw manufacturer payload.
///
/// btleplug splits the company identifier off into the map key; put it back
/// in front so the payload matches what was on air. The Airthings entry wins
/// when an advertiser carries several.
fn manufacturer_payload(properties: &PeripheralProperties) -> Vec<u8> {
    let entry = properties
        .manufacturer_data
        .get_key_value(&AIRTHINGS_COMPANY_ID)
        .or_else(|| properties.manufacturer_data.iter().next());

    match entry {
        Some((company, data)) => {
            let mut payload = company.to_le_bytes().to_vec();
            payload.extend_from_slice(data);
            payload
        }
        None => Vec::new(),
    }
}

/// The peripheral an event proves was advertising.
fn advertised_id(event: CentralEvent) -> Option<PeripheralId> {
    match event {
        CentralEvent::DeviceDiscovered(id)
        | CentralEvent::DeviceUpdated(id)
        | CentralEvent::ManufacturerDataAdvertisement { id, .. } => Some(id),
        _ => None,
    }
}

/// Collect the keys of events seen until `window` elapses.
///
/// Keeps waiting out the window if the stream ends early.
async fn collect_heard<S, K>(
    events: &mut S,
    window: Duration,
    cancel: &CancellationToken,
    key: impl Fn(S::Item) -> Option<K>,
) -> Result<HashSet<K>>
where
    S: Stream + Unpin,
    K: Eq + Hash,
{
    let mut heard = HashSet::new();
    let deadline = sleep(window);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = &mut deadline => return Ok(heard),
            event = events.next() => match event {
                Some(event) => {
                    if let Some(k) = key(event) {
                        heard.insert(k);
                    }
                }
                None => {
                    return tokio::select! {
                        _ = cancel.cancelled() => Err(Error::Cancelled),
                        _ = &mut deadline => Ok(heard),
                    };
                }
            },
        }
    }
}

async fn find_peripheral(adapter: &Adapter, address: &str) -> Result<Peripheral> {
    for peripheral in adapter.peripherals().await? {
        if let Some(properties) = peripheral.properties().await?
            && link_address(&properties, &peripheral.id()) == address
        {
            return Ok(peripheral);
        }
    }
    Err(Error::device_not_found(address))
}

#[async_trait]
impl Radio for BtleRadio {
    async fn open(&self) -> Result<()> {
        let mut slot = self.adapter.write().await;
        if slot.is_some() {
            return Ok(());
        }

        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(Error::NoAdapter)?;

        info!("Bluetooth adapter opened");
        *slot = Some(adapter);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(adapter) = self.adapter.write().await.take() {
            if let Err(e) = adapter.stop_scan().await {
                debug!("stop_scan on close failed: {}", e);
            }
            info!("Bluetooth adapter closed");
        }
        Ok(())
    }

    async fn scan(
        &self,
        duration: Duration,
        filter: &ScanFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Advertisement>> {
        let adapter = self.adapter().await?;

        // Subscribe first so nothing heard at scan start is missed
        let mut events = adapter.events().await?;
        debug!("Starting BLE scan for {:?}", duration);
        adapter.start_scan(BleScanFilter::default()).await?;

        let heard = collect_heard(&mut events, duration, cancel, advertised_id).await;

        adapter.stop_scan().await?;
        let heard = heard?;
        debug!("Heard {} peripheral(s) during the scan", heard.len());

        let mut accepted = Vec::new();
        for id in heard {
            let peripheral = match adapter.peripheral(&id).await {
                Ok(p) => p,
                Err(e) => {
                    debug!("Peripheral vanished after the scan: {}", e);
                    continue;
                }
            };
            let properties = match peripheral.properties().await {
                Ok(Some(p)) => p,
                Ok(None) => continue,
                Err(e) => {
                    debug!("Error reading peripheral properties: {}", e);
                    continue;
                }
            };

            let advertisement = Advertisement {
                address: link_address(&properties, &peripheral.id()),
                connectable: true,
                manufacturer_data: manufacturer_payload(&properties),
                rssi: properties.rssi,
            };

            if filter(&advertisement) {
                accepted.push(advertisement);
            }
        }

        debug!("Scan complete, {} advertisement(s) accepted", accepted.len());
        Ok(accepted)
    }

    async fn connect(
        &self,
        address: &str,
        connect_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn Connection>> {
        let adapter = self.adapter().await?;
        let peripheral = find_peripheral(&adapter, address).await?;

        // Subscribe before connecting so a fast disconnect is not missed
        let mut events = adapter.events().await?;
        let target = peripheral.id();
        let (tx, rx) = oneshot::channel();
        let watcher = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event
                    && id == target
                {
                    let _ = tx.send(());
                    break;
                }
            }
        });

        let connected = tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = timeout(connect_timeout, peripheral.connect()) => match result {
                Ok(inner) => inner.map_err(Error::from),
                Err(_) => Err(Error::timeout("connect to device", connect_timeout)),
            },
        };

        if let Err(e) = connected {
            watcher.abort();
            // The stack may have half-opened the link
            if let Err(cleanup) = peripheral.disconnect().await {
                debug!("disconnect after failed connect failed: {}", cleanup);
            }
            return Err(e);
        }

        debug!(address, "Connected");
        Ok(Box::new(BtleConnection {
            address: address.to_string(),
            peripheral,
            service: None,
            characteristic: None,
            disconnected: Some(rx),
            watcher,
            timeout: connect_timeout,
        }))
    }
}

/// An open btleplug link.
struct BtleConnection {
    address: String,
    peripheral: Peripheral,
    service: Option<Service>,
    characteristic: Option<Characteristic>,
    disconnected: Option<oneshot::Receiver<()>>,
    watcher: JoinHandle<()>,
    timeout: Duration,
}

#[async_trait]
impl Connection for BtleConnection {
    fn address(&self) -> &str {
        &self.address
    }

    async fn discover_service(&mut self, service: Uuid) -> Result<()> {
        timeout(self.timeout, self.peripheral.discover_services())
            .await
            .map_err(|_| Error::timeout("discover services", self.timeout))??;

        let services = self.peripheral.services();
        let service_count = services.len();
        debug!("Found {} services", service_count);

        self.service = Some(
            services
                .into_iter()
                .find(|s| s.uuid == service)
                .ok_or_else(|| Error::characteristic_not_found(service.to_string(), service_count))?,
        );
        Ok(())
    }

    async fn discover_characteristic(&mut self, characteristic: Uuid) -> Result<()> {
        let service = self
            .service
            .as_ref()
            .ok_or_else(|| Error::characteristic_not_found(characteristic.to_string(), 0))?;

        self.characteristic = Some(
            service
                .characteristics
                .iter()
                .find(|c| c.uuid == characteristic)
                .cloned()
                .ok_or_else(|| Error::characteristic_not_found(characteristic.to_string(), 1))?,
        );
        Ok(())
    }

    async fn read_characteristic(&mut self) -> Result<Vec<u8>> {
        let characteristic = self.characteristic.as_ref().ok_or(Error::NotConnected)?;
        let data = timeout(self.timeout, self.peripheral.read(characteristic))
            .await
            .map_err(|_| Error::timeout("read characteristic", self.timeout))??;
        Ok(data)
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }

    async fn wait_disconnected(&mut self) -> Result<()> {
        let Some(rx) = self.disconnected.take() else {
            return Ok(());
        };

        if !self.peripheral.is_connected().await.unwrap_or(true) {
            return Ok(());
        }

        match timeout(self.timeout, rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => {
                // Event stream ended without a disconnect event
                warn!(address = %self.address, "Disconnect not confirmed by the stack");
                Ok(())
            }
            Err(_) => Err(Error::timeout("wait for disconnect", self.timeout)),
        }
    }
}

impl Drop for BtleConnection {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}
