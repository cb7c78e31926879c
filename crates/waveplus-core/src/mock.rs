//! Mock radio implementation for testing.
//!
//! This module provides a [`Radio`] that can be used for unit testing
//! without requiring actual BLE hardware.
//!
//! # Features
//!
//! - **Scripted advertisements**: Register devices with a serial and a frame
//! - **Failure injection**: Fail scans, connects, or reads a set number of times
//! - **Stalls**: Hold reads for a set time to exercise timeouts and shutdown
//! - **Accounting**: Count every open, close, scan, connect and disconnect, and
//!   track how many links are open at once

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use waveplus_types::uuid::{MANUFACTURER_SIGNATURE, SENSOR_CHARACTERISTIC, SENSOR_SERVICE};

use crate::error::{Error, Result};
use crate::radio::{Advertisement, Connection, Radio, ScanFilter};

/// Scripted behaviour of one simulated device.
#[derive(Debug, Clone, Default)]
struct MockPeripheral {
    frame: Vec<u8>,
    connect_failures: u32,
    read_failures: u32,
    read_delay: Duration,
    missing_characteristic: bool,
}

#[derive(Debug, Default)]
struct Inner {
    advertisements: Mutex<Vec<Advertisement>>,
    peripherals: Mutex<HashMap<String, MockPeripheral>>,
    scan_failures: AtomicU32,
    open: AtomicBool,
    opens: AtomicU32,
    closes: AtomicU32,
    scans: AtomicU32,
    connects: AtomicU32,
    disconnects: AtomicU32,
    waits: AtomicU32,
    active: AtomicU32,
    max_active: AtomicU32,
    leaked: AtomicU32,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counter snapshot taken from a [`MockRadio`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockStats {
    /// Calls to [`Radio::open`].
    pub opens: u32,
    /// Calls to [`Radio::close`].
    pub closes: u32,
    /// Calls to [`Radio::scan`].
    pub scans: u32,
    /// Calls to [`Radio::connect`], successful or not.
    pub connects: u32,
    /// Calls to [`Connection::disconnect`].
    pub disconnects: u32,
    /// Calls to [`Connection::wait_disconnected`].
    pub waits: u32,
    /// Links currently open.
    pub active: u32,
    /// Most links ever open at the same time.
    pub max_active: u32,
    /// Connections dropped without a disconnect.
    pub leaked: u32,
}

/// A simulated radio for testing.
///
/// Cloning shares the underlying state, so a test can keep a handle for
/// assertions while the pipeline owns another.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
/// use waveplus_core::mock::MockRadio;
/// use waveplus_core::radio::Radio;
///
/// #[tokio::main]
/// async fn main() {
///     let radio = MockRadio::new().with_device("AA:01", 1234, vec![0u8; 20]);
///     radio.open().await.unwrap();
///
///     let found = radio
///         .scan(Duration::from_millis(10), &|_| true, &CancellationToken::new())
///         .await
///         .unwrap();
///     assert_eq!(found.len(), 1);
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockRadio {
    inner: Arc<Inner>,
}

impl MockRadio {
    /// Create a mock radio with no devices in range.
    pub fn new() -> Self {
        Self::default()
    }

    /// Manufacturer payload a Wave Plus with `serial` would advertise.
    pub fn manufacturer_data(serial: u32) -> Vec<u8> {
        let mut data = MANUFACTURER_SIGNATURE.to_vec();
        data.extend_from_slice(&serial.to_le_bytes());
        data
    }

    /// Add a connectable Wave Plus at `address` that serves `frame`.
    #[must_use]
    pub fn with_device(self, address: &str, serial: u32, frame: Vec<u8>) -> Self {
        self.advertise(Advertisement::new(address, Self::manufacturer_data(serial)));
        self.set_frame(address, frame);
        self
    }

    /// Add a raw advertisement to what scans return.
    pub fn advertise(&self, advertisement: Advertisement) {
        lock(&self.inner.advertisements).push(advertisement);
    }

    /// Remove every advertisement.
    pub fn clear_advertisements(&self) {
        lock(&self.inner.advertisements).clear();
    }

    /// Set the frame served by the device at `address`.
    pub fn set_frame(&self, address: &str, frame: Vec<u8>) {
        lock(&self.inner.peripherals)
            .entry(address.to_string())
            .or_default()
            .frame = frame;
    }

    /// Fail the next `count` scans.
    pub fn fail_scans(&self, count: u32) {
        self.inner.scan_failures.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` connects to `address`.
    pub fn fail_connects(&self, address: &str, count: u32) {
        lock(&self.inner.peripherals)
            .entry(address.to_string())
            .or_default()
            .connect_failures = count;
    }

    /// Fail the next `count` reads from `address`. `u32::MAX` fails forever.
    pub fn fail_reads(&self, address: &str, count: u32) {
        lock(&self.inner.peripherals)
            .entry(address.to_string())
            .or_default()
            .read_failures = count;
    }

    /// Make every read from `address` take `delay` before completing.
    pub fn delay_reads(&self, address: &str, delay: Duration) {
        lock(&self.inner.peripherals)
            .entry(address.to_string())
            .or_default()
            .read_delay = delay;
    }

    /// Hide the sensor characteristic on `address`.
    pub fn hide_characteristic(&self, address: &str, hidden: bool) {
        lock(&self.inner.peripherals)
            .entry(address.to_string())
            .or_default()
            .missing_characteristic = hidden;
    }

    /// Whether the radio is currently open.
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Snapshot the counters.
    pub fn stats(&self) -> MockStats {
        let i = &self.inner;
        MockStats {
            opens: i.opens.load(Ordering::SeqCst),
            closes: i.closes.load(Ordering::SeqCst),
            scans: i.scans.load(Ordering::SeqCst),
            connects: i.connects.load(Ordering::SeqCst),
            disconnects: i.disconnects.load(Ordering::SeqCst),
            waits: i.waits.load(Ordering::SeqCst),
            active: i.active.load(Ordering::SeqCst),
            max_active: i.max_active.load(Ordering::SeqCst),
            leaked: i.leaked.load(Ordering::SeqCst),
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::RadioClosed)
        }
    }
}

/// Decrement a remaining-failures counter. `u32::MAX` never runs out.
fn take_failure(remaining: &mut u32) -> bool {
    match *remaining {
        0 => false,
        u32::MAX => true,
        _ => {
            *remaining -= 1;
            true
        }
    }
}

#[async_trait]
impl Radio for MockRadio {
    async fn open(&self) -> Result<()> {
        self.inner.opens.fetch_add(1, Ordering::SeqCst);
        self.inner.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.inner.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn scan(
        &self,
        duration: Duration,
        filter: &ScanFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Advertisement>> {
        self.inner.scans.fetch_add(1, Ordering::SeqCst);
        self.check_open()?;

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = sleep(duration) => {}
        }

        let failures = &self.inner.scan_failures;
        if failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::radio("mock scan failure"));
        }

        Ok(lock(&self.inner.advertisements)
            .iter()
            .filter(|adv| filter(adv))
            .cloned()
            .collect())
    }

    async fn connect(
        &self,
        address: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn Connection>> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        self.check_open()?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let peripheral = {
            let mut peripherals = lock(&self.inner.peripherals);
            let peripheral = peripherals
                .get_mut(address)
                .ok_or_else(|| Error::device_not_found(address))?;
            if take_failure(&mut peripheral.connect_failures) {
                return Err(Error::timeout("connect to device", timeout));
            }
            peripheral.clone()
        };

        let active = self.inner.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_active.fetch_max(active, Ordering::SeqCst);

        Ok(Box::new(MockConnection {
            radio: self.clone(),
            address: address.to_string(),
            frame: peripheral.frame,
            read_delay: peripheral.read_delay,
            missing_characteristic: peripheral.missing_characteristic,
            service_found: false,
            characteristic_found: false,
            connected: true,
        }))
    }
}

/// A simulated link handed out by [`MockRadio::connect`].
#[derive(Debug)]
struct MockConnection {
    radio: MockRadio,
    address: String,
    frame: Vec<u8>,
    read_delay: Duration,
    missing_characteristic: bool,
    service_found: bool,
    characteristic_found: bool,
    connected: bool,
}

impl MockConnection {
    fn check_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    fn release(&mut self) {
        if self.connected {
            self.connected = false;
            self.radio.inner.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn address(&self) -> &str {
        &self.address
    }

    async fn discover_service(&mut self, service: Uuid) -> Result<()> {
        self.check_connected()?;
        if service != SENSOR_SERVICE {
            return Err(Error::characteristic_not_found(service.to_string(), 1));
        }
        self.service_found = true;
        Ok(())
    }

    async fn discover_characteristic(&mut self, characteristic: Uuid) -> Result<()> {
        self.check_connected()?;
        if !self.service_found || self.missing_characteristic || characteristic != SENSOR_CHARACTERISTIC
        {
            return Err(Error::characteristic_not_found(characteristic.to_string(), 1));
        }
        self.characteristic_found = true;
        Ok(())
    }

    async fn read_characteristic(&mut self) -> Result<Vec<u8>> {
        self.check_connected()?;
        if !self.characteristic_found {
            return Err(Error::NotConnected);
        }
        if !self.read_delay.is_zero() {
            sleep(self.read_delay).await;
        }

        let failed = lock(&self.radio.inner.peripherals)
            .get_mut(&self.address)
            .is_some_and(|p| take_failure(&mut p.read_failures));
        if failed {
            return Err(Error::radio("mock read failure"));
        }

        Ok(self.frame.clone())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.radio.inner.disconnects.fetch_add(1, Ordering::SeqCst);
        self.release();
        Ok(())
    }

    async fn wait_disconnected(&mut self) -> Result<()> {
        self.radio.inner.waits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        if self.connected {
            self.radio.inner.leaked.fetch_add(1, Ordering::SeqCst);
            self.release();
        }
    }
}
