//! BLE acquisition pipeline for Airthings Wave Plus sensors.
//!
//! This crate finds Wave Plus devices over Bluetooth Low Energy, reads their
//! current measurements one device at a time, and hands decoded values to a
//! [`Sink`]. A watchdog ends the loop when nothing has been read for too long
//! so that a process supervisor can restart it.
//!
//! # Features
//!
//! - **Discovery**: Find Wave Plus devices by their manufacturer data
//! - **Stable identity**: Devices are keyed by serial number, not link address
//! - **Bounded retries**: Every scan and read has a fixed attempt budget
//! - **Clean links**: Every connection is torn down and confirmed before the next
//! - **Recovery**: Failed cycles reopen the radio before trying again
//! - **Watchdog**: Sustained silence is reported as [`Exit::WatchdogExpired`]
//!
//! # Platform Differences
//!
//! On Linux and Windows sessions connect by Bluetooth MAC address. On macOS,
//! CoreBluetooth hides MAC addresses, so the peripheral UUID is used instead.
//! Either way the serial number in the advertisement is what identifies a
//! device across scans.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use waveplus_core::{AcquisitionConfig, AcquisitionLoop, BtleRadio, LogSink};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let radio = Arc::new(BtleRadio::new());
//!     let acquisition =
//!         AcquisitionLoop::new(radio, Arc::new(LogSink), AcquisitionConfig::default());
//!
//!     let exit = acquisition.run(&CancellationToken::new()).await?;
//!     println!("Stopped: {:?}", exit);
//!     Ok(())
//! }
//! ```

pub mod acquisition;
pub mod btle;
pub mod error;
pub mod mock;
pub mod radio;
pub mod retry;
pub mod scan;
pub mod session;
pub mod sink;
pub mod watchdog;

// Core exports
pub use acquisition::{AcquisitionConfig, AcquisitionLoop, Exit, Recovery, ReopenRadio, State};
pub use btle::BtleRadio;
pub use error::{Error, Result};
pub use mock::{MockRadio, MockStats};
pub use radio::{Advertisement, Connection, Radio};
pub use retry::{RetryConfig, with_retry};
pub use scan::{DiscoveryResult, ScanOptions, Scanner, wave_plus_filter};
pub use session::{SensorSession, SessionConfig};
pub use sink::{CycleReport, LogSink, Sink};
pub use watchdog::{WatchdogConfig, WatchdogHandle};

// Re-export from waveplus-types
pub use waveplus_types::uuid as uuids;
pub use waveplus_types::{DeviceIdentity, SensorValues, frame, identity};
