//! Telemetry frame decoding.
//!
//! The current-readings characteristic returns a fixed 20-byte little-endian
//! frame:
//!
//! | Offset | Size | Field | Conversion |
//! |--------|------|-------|------------|
//! | 0 | 1 | reserved | - |
//! | 1 | 1 | humidity | raw / 2 = %RH |
//! | 2 | 2 | reserved | - |
//! | 4 | 2 | radon short | Bq/m³ |
//! | 6 | 2 | radon long | Bq/m³ |
//! | 8 | 2 | temperature | raw / 100 = °C |
//! | 10 | 2 | pressure | raw / 50 = hPa |
//! | 12 | 2 | CO₂ | ppm |
//! | 14 | 2 | VOC | ppb |
//! | 16 | 4 | reserved | - |

use bytes::Buf;

use crate::error::{ParseError, ParseResult};
use crate::types::SensorValues;

/// Length of a current-readings frame in bytes.
pub const FRAME_LEN: usize = 20;

/// The frame split into its twelve raw fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RawFrame {
    humidity: u8,
    radon_short: u16,
    radon_long: u16,
    temperature: u16,
    pressure: u16,
    co2: u16,
    voc: u16,
}

impl RawFrame {
    fn read(mut buf: &[u8]) -> Self {
        let _reserved0 = buf.get_u8();
        let humidity = buf.get_u8();
        let _reserved2 = buf.get_u8();
        let _reserved3 = buf.get_u8();
        let radon_short = buf.get_u16_le();
        let radon_long = buf.get_u16_le();
        let temperature = buf.get_u16_le();
        let pressure = buf.get_u16_le();
        let co2 = buf.get_u16_le();
        let voc = buf.get_u16_le();
        let _reserved10 = buf.get_u16_le();
        let _reserved11 = buf.get_u16_le();

        Self {
            humidity,
            radon_short,
            radon_long,
            temperature,
            pressure,
            co2,
            voc,
        }
    }

    fn refine(self) -> SensorValues {
        SensorValues {
            humidity: f32::from(self.humidity) / 2.0,
            radon_short: self.radon_short,
            radon_long: self.radon_long,
            temperature: f32::from(self.temperature) / 100.0,
            pressure: f32::from(self.pressure) / 50.0,
            co2: f32::from(self.co2),
            voc: f32::from(self.voc),
        }
    }
}

/// Decode a current-readings frame into physical measurements.
///
/// # Errors
///
/// Returns [`ParseError::MalformedFrame`] unless `data` is exactly
/// [`FRAME_LEN`] bytes long. No partial decode is attempted.
///
/// # Examples
///
/// ```
/// use waveplus_types::frame::decode;
///
/// let frame = [
///     0, 100, 0, 0, 0x64, 0x00, 0xC8, 0x00, 0x29, 0x0E,
///     0xE8, 0x88, 0x59, 0x00, 0x64, 0x00, 0, 0, 0, 0,
/// ];
/// let values = decode(&frame).unwrap();
/// assert_eq!(values.humidity, 50.0);
/// assert_eq!(values.radon_short, 100);
/// assert_eq!(values.radon_long, 200);
/// ```
#[must_use = "decoding returns a Result that should be handled"]
pub fn decode(data: &[u8]) -> ParseResult<SensorValues> {
    if data.len() != FRAME_LEN {
        return Err(ParseError::MalformedFrame {
            expected: FRAME_LEN,
            actual: data.len(),
        });
    }

    Ok(RawFrame::read(data).refine())
}
