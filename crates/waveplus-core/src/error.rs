//! Error types for waveplus-core.
//!
//! This module defines all error types that can occur while discovering and
//! reading Wave Plus devices over Bluetooth Low Energy.
//!
//! # Error Recovery Strategies
//!
//! | Error Type | Strategy | Rationale |
//! |------------|----------|-----------|
//! | [`Error::Timeout`] | Retry | Transient BLE congestion |
//! | [`Error::Bluetooth`] | Retry | Usually transient, stack may need a reset |
//! | [`Error::Radio`] | Retry | Same as above, for non-btleplug backends |
//! | [`Error::CharacteristicNotFound`] | Retry | GATT discovery is flaky on BlueZ |
//! | [`Error::MalformedFrame`] | Retry the session | The read may have been garbled |
//! | [`Error::DeviceNotFound`] | Retry | Device may reappear on the next scan |
//! | [`Error::Cancelled`] | Never retry | Shutdown was requested |
//! | [`Error::ScanExhausted`] | Cooldown | Retry budget already spent |
//! | [`Error::ReceiveExhausted`] | Skip device | Retry budget already spent |
//! | [`Error::InvalidConfig`] | Never retry | Fix configuration and restart |
//!
//! Classification lives in [`crate::retry::classify`].

use std::time::Duration;

use thiserror::Error;

use waveplus_types::DeviceIdentity;

/// Errors that can occur when talking to Wave Plus devices.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error from btleplug.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Radio backend failure not covered by btleplug.
    #[error("Radio error: {0}")]
    Radio(String),

    /// No Bluetooth adapter is available.
    #[error("No Bluetooth adapter available")]
    NoAdapter,

    /// The radio device is closed.
    #[error("Radio device is not open")]
    RadioClosed,

    /// Device with the given link address is not known to the radio.
    #[error("Device not found: {address}")]
    DeviceNotFound {
        /// The link address that was looked up.
        address: String,
    },

    /// Operation attempted while not connected to device.
    #[error("Not connected to device")]
    NotConnected,

    /// Required GATT service or characteristic not found on device.
    #[error("Characteristic not found: {uuid} (searched in {service_count} services)")]
    CharacteristicNotFound {
        /// The UUID that was not found.
        uuid: String,
        /// Number of services that were searched.
        service_count: usize,
    },

    /// The telemetry frame had the wrong length.
    #[error("Malformed frame: expected {expected} bytes, got {actual}")]
    MalformedFrame {
        /// Expected frame size.
        expected: usize,
        /// Actual size received.
        actual: usize,
    },

    /// Manufacturer data too short to carry a serial number.
    #[error("Invalid advertisement: {actual} bytes of manufacturer data, need {minimum}")]
    InvalidAdvertisement {
        /// Minimum payload length.
        minimum: usize,
        /// Actual payload length.
        actual: usize,
    },

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Operation was cancelled by the shutdown signal.
    #[error("Operation cancelled")]
    Cancelled,

    /// Every scan attempt failed.
    #[error("Scan failed after {attempts} attempts: {source}")]
    ScanExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The last underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// Every receive attempt for one device failed.
    #[error("Receive from {identity} failed after {attempts} attempts: {source}")]
    ReceiveExhausted {
        /// Device whose reads failed.
        identity: DeviceIdentity,
        /// Number of attempts made.
        attempts: u32,
        /// The last underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a characteristic not found error.
    pub fn characteristic_not_found(uuid: impl Into<String>, service_count: usize) -> Self {
        Self::CharacteristicNotFound {
            uuid: uuid.into(),
            service_count,
        }
    }

    /// Create a device not found error for a link address.
    pub fn device_not_found(address: impl Into<String>) -> Self {
        Self::DeviceNotFound {
            address: address.into(),
        }
    }

    /// Create a generic radio error.
    pub fn radio(message: impl Into<String>) -> Self {
        Self::Radio(message.into())
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Whether this error, or the cause an exhausted retry wraps, is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::ScanExhausted { source, .. } | Self::ReceiveExhausted { source, .. } => {
                source.is_cancelled()
            }
            _ => false,
        }
    }
}

impl From<waveplus_types::ParseError> for Error {
    fn from(err: waveplus_types::ParseError) -> Self {
        match err {
            waveplus_types::ParseError::MalformedFrame { expected, actual } => {
                Error::MalformedFrame { expected, actual }
            }
            waveplus_types::ParseError::InvalidAdvertisement { minimum, actual } => {
                Error::InvalidAdvertisement { minimum, actual }
            }
            // Handle future ParseError variants (non_exhaustive)
            other => Error::Radio(format!("Parse error: {}", other)),
        }
    }
}

/// Result type alias using waveplus-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::device_not_found("AA:BB:CC:DD:EE:FF");
        assert!(err.to_string().contains("AA:BB:CC:DD:EE:FF"));

        let err = Error::NotConnected;
        assert_eq!(err.to_string(), "Not connected to device");

        let err = Error::characteristic_not_found("b42e2a68", 3);
        assert!(err.to_string().contains("b42e2a68"));
        assert!(err.to_string().contains("3 services"));

        let err = Error::timeout("connect", Duration::from_secs(4));
        assert!(err.to_string().contains("connect"));
        assert!(err.to_string().contains("4s"));
    }

    #[test]
    fn test_exhausted_wraps_last_cause() {
        let err = Error::ReceiveExhausted {
            identity: DeviceIdentity::new(1234),
            attempts: 3,
            source: Box::new(Error::timeout("read", Duration::from_secs(1))),
        };
        let message = err.to_string();
        assert!(message.contains("1234"));
        assert!(message.contains("3 attempts"));
        assert!(message.contains("read"));

        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().contains("timed out"));
    }

    #[test]
    fn test_is_cancelled_looks_through_exhaustion() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(
            Error::ScanExhausted {
                attempts: 1,
                source: Box::new(Error::Cancelled),
            }
            .is_cancelled()
        );
        assert!(!Error::NotConnected.is_cancelled());
    }

    #[test]
    fn test_parse_error_conversion() {
        let err: Error = waveplus_types::ParseError::MalformedFrame {
            expected: 20,
            actual: 4,
        }
        .into();
        assert!(matches!(
            err,
            Error::MalformedFrame {
                expected: 20,
                actual: 4
            }
        ));

        let err: Error = waveplus_types::ParseError::InvalidAdvertisement {
            minimum: 6,
            actual: 1,
        }
        .into();
        assert!(matches!(err, Error::InvalidAdvertisement { actual: 1, .. }));
    }

    #[test]
    fn test_btleplug_error_conversion() {
        fn _assert_from_impl<T: From<btleplug::Error>>() {}
        _assert_from_impl::<Error>();
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "adapter gone");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("adapter gone"));
    }
}
