//! Error types for thermolog-core.
//!
//! Every acquisition failure is recoverable: the caller decides whether to
//! retry (see [`crate::with_retry`]). None of these errors should terminate
//! the process.
//!
//! | Error | Typical cause |
//! |-------|---------------|
//! | [`Error::ConnectTimeout`] | Sensor out of range, asleep, or busy with another central |
//! | [`Error::ProfileDiscoveryFailed`] | Link dropped during GATT discovery |
//! | [`Error::CharacteristicNotFound`] | Wrong device at that address, or firmware mismatch |
//! | [`Error::SubscribeFailed`] | CCCD write rejected or link lost |
//! | [`Error::NotificationTimeout`] | Neither a notification nor the direct read produced data |
//! | [`Error::MalformedPayload`] | Only short (< 3 byte) payloads arrived |
//! | [`Error::Bluetooth`] | Adapter contention or other stack errors |

use std::time::Duration;

use thiserror::Error;

use thermolog_types::MacAddress;

/// Errors that can occur while acquiring a reading.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No Bluetooth adapter is available on this host.
    #[error("No Bluetooth adapter available")]
    NoAdapter,

    /// The device was not found or did not accept a connection in time.
    #[error("Timed out connecting to {address} after {duration:?}")]
    ConnectTimeout {
        /// The address that was searched for.
        address: MacAddress,
        /// The connect timeout that elapsed.
        duration: Duration,
    },

    /// Service discovery failed after connecting.
    #[error("Profile discovery failed: {reason}")]
    ProfileDiscoveryFailed {
        /// Description of the failure.
        reason: String,
    },

    /// Required BLE characteristic not found on device.
    #[error("Characteristic not found: {uuid} (searched in {service_count} services)")]
    CharacteristicNotFound {
        /// The UUID that was not found.
        uuid: String,
        /// Number of services that were searched.
        service_count: usize,
    },

    /// Enabling notifications on the characteristic failed.
    #[error("Failed to subscribe to characteristic {uuid}: {reason}")]
    SubscribeFailed {
        /// The characteristic UUID.
        uuid: String,
        /// Description of the failure.
        reason: String,
    },

    /// No valid payload arrived before the notification wait elapsed.
    #[error("No data received within {duration:?}")]
    NotificationTimeout {
        /// The wait that elapsed.
        duration: Duration,
    },

    /// Only payloads too short to decode were received.
    #[error("Malformed payload: {len} bytes (need at least 3)")]
    MalformedPayload {
        /// Length of the last malformed payload.
        len: usize,
    },

    /// The notification stream ended and the direct read produced nothing.
    #[error("Link closed before any data arrived")]
    LinkClosed,
}

impl Error {
    /// Create a connect timeout error.
    pub fn connect_timeout(address: MacAddress, duration: Duration) -> Self {
        Self::ConnectTimeout { address, duration }
    }

    /// Create a characteristic not found error.
    pub fn characteristic_not_found(uuid: impl Into<String>, service_count: usize) -> Self {
        Self::CharacteristicNotFound {
            uuid: uuid.into(),
            service_count,
        }
    }

    /// Create a profile discovery error.
    pub fn discovery_failed(reason: impl Into<String>) -> Self {
        Self::ProfileDiscoveryFailed {
            reason: reason.into(),
        }
    }

    /// Create a subscribe error.
    pub fn subscribe_failed(uuid: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SubscribeFailed {
            uuid: uuid.into(),
            reason: reason.into(),
        }
    }
}

impl From<thermolog_types::ParseError> for Error {
    fn from(err: thermolog_types::ParseError) -> Self {
        match err {
            thermolog_types::ParseError::InsufficientBytes { actual, .. } => {
                Error::MalformedPayload { len: actual }
            }
            // Address errors only arise from configuration, which is validated
            // before the engine is built.
            other => Error::ProfileDiscoveryFailed {
                reason: other.to_string(),
            },
        }
    }
}

/// Result type alias using thermolog-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let addr = MacAddress::new([0xA4, 0xC1, 0x38, 0, 0, 1]);
        let err = Error::connect_timeout(addr, Duration::from_secs(20));
        assert!(err.to_string().contains("A4:C1:38:00:00:01"));
        assert!(err.to_string().contains("20s"));

        let err = Error::characteristic_not_found("ebe0ccc1", 5);
        assert!(err.to_string().contains("ebe0ccc1"));
        assert!(err.to_string().contains("5 services"));

        let err = Error::NotificationTimeout {
            duration: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "No data received within 30s");

        let err = Error::subscribe_failed("ebe0ccc1", "not permitted");
        assert!(err.to_string().contains("not permitted"));
    }

    #[test]
    fn test_parse_error_conversion() {
        let err: Error = thermolog_types::Reading::from_bytes(&[1, 2])
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::MalformedPayload { len: 2 }));
    }

    #[test]
    fn test_btleplug_error_conversion() {
        fn _assert_from_impl<T: From<btleplug::Error>>() {}
        _assert_from_impl::<Error>();
    }
}
