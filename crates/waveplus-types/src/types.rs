//! Core types for Wave Plus sensor data.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One decoded set of measurements from a Wave Plus.
///
/// Values are produced once per successful read and never mutated afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorValues {
    /// Relative humidity in percent.
    pub humidity: f32,
    /// Short-term radon average in Bq/m³.
    pub radon_short: u16,
    /// Long-term radon average in Bq/m³.
    pub radon_long: u16,
    /// Temperature in degrees Celsius.
    pub temperature: f32,
    /// Atmospheric pressure in hPa.
    pub pressure: f32,
    /// CO₂ concentration in ppm.
    pub co2: f32,
    /// Volatile organic compounds in ppb.
    pub voc: f32,
}

/// Stable identity of a physical Wave Plus.
///
/// The identity is the serial number the device broadcasts in its
/// manufacturer data, so it survives link address rotation. It renders as the
/// decimal serial number.
///
/// # Examples
///
/// ```
/// use waveplus_types::DeviceIdentity;
///
/// let id = DeviceIdentity::new(2930012345);
/// assert_eq!(id.to_string(), "2930012345");
/// assert_eq!("2930012345".parse::<DeviceIdentity>().unwrap(), id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct DeviceIdentity(u32);

impl DeviceIdentity {
    /// Wrap a raw serial number.
    #[must_use]
    pub const fn new(serial: u32) -> Self {
        Self(serial)
    }

    /// The numeric serial number.
    #[must_use]
    pub const fn serial(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeviceIdentity {
    type Err = core::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl From<u32> for DeviceIdentity {
    fn from(serial: u32) -> Self {
        Self(serial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_display_is_decimal() {
        assert_eq!(DeviceIdentity::new(1).to_string(), "1");
        assert_eq!(DeviceIdentity::new(u32::MAX).to_string(), "4294967295");
    }

    #[test]
    fn test_identity_from_str_rejects_garbage() {
        assert!("abc".parse::<DeviceIdentity>().is_err());
        assert!("-1".parse::<DeviceIdentity>().is_err());
    }

    #[test]
    fn test_identity_ordering_follows_serial() {
        assert!(DeviceIdentity::new(5) < DeviceIdentity::new(10));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_identity_serializes_as_number() {
        let json = serde_json::to_string(&DeviceIdentity::new(42)).unwrap();
        assert_eq!(json, "42");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_sensor_values_serde() {
        let values = SensorValues {
            humidity: 45.5,
            radon_short: 12,
            radon_long: 30,
            temperature: 21.25,
            pressure: 1001.0,
            co2: 650.0,
            voc: 90.0,
        };
        let json = serde_json::to_string(&values).unwrap();
        assert!(json.contains("\"radon_short\":12"));
        let back: SensorValues = serde_json::from_str(&json).unwrap();
        assert_eq!(back, values);
    }
}
