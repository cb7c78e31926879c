//! Bluetooth identifiers for Airthings Wave Plus devices.
//!
//! This module contains the UUIDs and advertisement constants needed to find
//! and read a Wave Plus over Bluetooth Low Energy.

use uuid::{Uuid, uuid};

// --- Airthings Service UUIDs ---

/// Custom service exposing the current sensor readings.
pub const SENSOR_SERVICE: Uuid = uuid!("b42e1c08-ade7-11e4-89d3-123b93f75cba");

// --- Airthings Characteristic UUIDs ---

/// Current readings characteristic (20-byte telemetry frame).
pub const SENSOR_CHARACTERISTIC: Uuid = uuid!("b42e2a68-ade7-11e4-89d3-123b93f75cba");

// --- Advertisement constants ---

/// Airthings Bluetooth SIG company identifier.
pub const AIRTHINGS_COMPANY_ID: u16 = 0x0334;

/// Leading bytes of a Wave Plus manufacturer payload.
///
/// This is the company identifier in advertisement byte order (little-endian).
pub const MANUFACTURER_SIGNATURE: [u8; 2] = AIRTHINGS_COMPANY_ID.to_le_bytes();

/// Minimum manufacturer payload length: signature plus a 4-byte serial number.
pub const MIN_MANUFACTURER_DATA_LEN: usize = 6;
