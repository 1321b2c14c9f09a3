//! Error types for data parsing in thermolog-types.

use thiserror::Error;

/// Errors that can occur when parsing sensor payloads or configuration values.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in thermolog-core).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The payload is shorter than the wire format requires.
    #[error("Insufficient bytes: payload requires {expected} bytes, got {actual}")]
    InsufficientBytes {
        /// Minimum payload length.
        expected: usize,
        /// Length actually received.
        actual: usize,
    },

    /// A hardware address could not be parsed.
    #[error("Invalid hardware address '{0}': expected six hex octets like AA:BB:CC:DD:EE:FF")]
    InvalidAddress(String),
}

/// Result type alias using thermolog-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
