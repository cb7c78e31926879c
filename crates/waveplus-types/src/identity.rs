//! Serial-number identity derived from advertisements.
//!
//! A Wave Plus broadcasts manufacturer data laid out as
//! `[0x34, 0x03, s0, s1, s2, s3, ...]`: the Airthings company identifier
//! followed by the device serial number as a little-endian `u32`. The serial
//! is the only stable handle on a device, since BLE link addresses may rotate.
//!
//! Two units that happen to broadcast the same serial bytes resolve to the same
//! identity. That is a limitation of the advertisement format and is not
//! disambiguated here.

use bytes::Buf;

use crate::error::{ParseError, ParseResult};
use crate::types::DeviceIdentity;
use crate::uuid::{MANUFACTURER_SIGNATURE, MIN_MANUFACTURER_DATA_LEN};

/// Resolve a device identity from a raw manufacturer payload.
///
/// Only bytes 2..=5 are read; the signature bytes are not checked here (the
/// scanner filters on them).
///
/// # Errors
///
/// Returns [`ParseError::InvalidAdvertisement`] if the payload is shorter than
/// six bytes.
///
/// # Examples
///
/// ```
/// use waveplus_types::identity::resolve;
///
/// let id = resolve(&[0x34, 0x03, 0x01, 0x00, 0x00, 0x00]).unwrap();
/// assert_eq!(id.to_string(), "1");
/// ```
pub fn resolve(manufacturer_data: &[u8]) -> ParseResult<DeviceIdentity> {
    if manufacturer_data.len() < MIN_MANUFACTURER_DATA_LEN {
        return Err(ParseError::InvalidAdvertisement {
            minimum: MIN_MANUFACTURER_DATA_LEN,
            actual: manufacturer_data.len(),
        });
    }

    let mut buf = &manufacturer_data[2..MIN_MANUFACTURER_DATA_LEN];
    Ok(DeviceIdentity::new(buf.get_u32_le()))
}

/// Whether a manufacturer payload carries the Wave Plus signature.
///
/// The payload must be long enough to resolve and start with `0x34, 0x03`.
#[must_use]
pub fn has_signature(manufacturer_data: &[u8]) -> bool {
    manufacturer_data.len() >= MIN_MANUFACTURER_DATA_LEN
        && manufacturer_data[..2] == MANUFACTURER_SIGNATURE
}
