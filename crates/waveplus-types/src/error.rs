//! Error types for frame and advertisement parsing in waveplus-types.

use thiserror::Error;

/// Errors that can occur when parsing Wave Plus data.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in waveplus-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The telemetry frame did not have the fixed frame length.
    #[error("Malformed frame: expected {expected} bytes, got {actual}")]
    MalformedFrame {
        /// Required frame length.
        expected: usize,
        /// Length of the buffer that was handed to the decoder.
        actual: usize,
    },

    /// The manufacturer payload is too short to carry a serial number.
    #[error("Invalid advertisement: manufacturer payload has {actual} bytes, need at least {minimum}")]
    InvalidAdvertisement {
        /// Minimum payload length.
        minimum: usize,
        /// Length of the payload that was received.
        actual: usize,
    },
}

/// Result type alias using waveplus-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
