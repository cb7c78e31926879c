//! Platform-agnostic types for Airthings Wave Plus sensors.
//!
//! This crate provides the data model and the pure decoding logic shared by
//! the BLE pipeline (waveplus-core) and anything that consumes its output.
//!
//! # Features
//!
//! - [`SensorValues`]: one decoded set of measurements
//! - [`DeviceIdentity`]: serial-number identity that survives address rotation
//! - [`frame::decode`]: the 20-byte telemetry frame codec
//! - [`identity::resolve`]: serial number extraction from manufacturer data
//! - UUID and advertisement constants
//!
//! # Example
//!
//! ```
//! use waveplus_types::{frame, identity};
//!
//! let id = identity::resolve(&[0x34, 0x03, 0x01, 0x00, 0x00, 0x00])?;
//! let values = frame::decode(&[0u8; frame::FRAME_LEN])?;
//! assert_eq!(id.to_string(), "1");
//! assert_eq!(values.radon_short, 0);
//! # Ok::<(), waveplus_types::ParseError>(())
//! ```

pub mod error;
pub mod frame;
pub mod identity;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use types::{DeviceIdentity, SensorValues};
pub use uuid as uuids;
