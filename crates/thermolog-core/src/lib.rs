//! BLE acquisition engine for temperature/humidity sensors.
//!
//! This crate connects to a single sensor over Bluetooth Low Energy,
//! subscribes to its data characteristic and returns one decoded
//! [`Reading`](thermolog_types::Reading) per acquisition.
//!
//! # Features
//!
//! - **Targeted scanning**: find one device by MAC address
//! - **First-payload race**: a notification and a direct read race, first valid payload wins
//! - **Fixed-delay retry**: [`with_retry`] with a [`RetryPolicy`]
//! - **Mock sensor**: [`MockSensor`] for tests without hardware
//!
//! # Platform Differences
//!
//! Devices are matched by MAC address. On macOS, CoreBluetooth does not
//! expose peripheral MAC addresses, so targeted scanning only works on Linux
//! (BlueZ) and Windows.
//!
//! # Quick Start
//!
//! ```no_run
//! use thermolog_core::{AcquireOptions, BleSensor, RetryPolicy, SensorSource, with_retry};
//! use thermolog_types::DeviceTarget;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let target = DeviceTarget::new("A4:C1:38:00:00:01".parse()?);
//!     let sensor = BleSensor::new(target, AcquireOptions::default()).await?;
//!
//!     let reading = with_retry(&RetryPolicy::default(), "acquire", || sensor.acquire()).await?;
//!     println!("{}", reading);
//!
//!     Ok(())
//! }
//! ```

pub mod acquire;
pub mod device;
pub mod error;
pub mod mock;
pub mod retry;
pub mod scan;
pub mod traits;

// Re-export the types crate's modules for convenience
pub use thermolog_types::types;
pub use thermolog_types::uuid;

pub use acquire::{BleSensor, PayloadSource, first_payload};
pub use device::{AcquireOptions, Link};
pub use error::{Error, Result};
pub use mock::{MockSensor, MockSensorBuilder};
pub use retry::{RetryPolicy, with_retry};
pub use traits::{LinkOpener, SensorLink, SensorSource};

/// Type alias for a shared sensor reference.
pub type SharedSensor = std::sync::Arc<dyn SensorSource>;
