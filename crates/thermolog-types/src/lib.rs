//! Platform-agnostic types for BLE temperature/humidity loggers.
//!
//! This crate provides the types shared by the acquisition engine
//! (thermolog-core), the reading store (thermolog-store) and the service.
//!
//! # Features
//!
//! - [`Reading`] and its wire decoding
//! - [`MacAddress`] parsing and normalization
//! - [`DeviceTarget`] describing the one sensor being polled
//! - UUID constants for the data characteristic
//!
//! # Example
//!
//! ```
//! use thermolog_types::Reading;
//!
//! // 25.50 °C, 60 %
//! let reading = Reading::from_bytes(&[0xF6, 0x09, 60]).unwrap();
//! assert_eq!(reading.temperature, 25.5);
//! assert_eq!(reading.humidity, 60);
//! ```

pub mod error;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use types::{DeviceTarget, MIN_PAYLOAD_BYTES, MacAddress, Reading};
pub use uuid as uuids;
