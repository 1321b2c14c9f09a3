//! Trait abstractions over reading sources and connections.
//!
//! [`SensorSource`] lets the scheduler drive either a real BLE sensor
//! ([`crate::BleSensor`]) or a [`crate::MockSensor`] in tests.
//! [`LinkOpener`] and [`SensorLink`] sit one level lower, between
//! [`crate::BleSensor`] and the btleplug connection ([`crate::Link`]).

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;

use thermolog_types::{DeviceTarget, Reading};

use crate::device::AcquireOptions;
use crate::error::Result;

/// Something that can produce one reading on demand.
///
/// # Example
///
/// ```ignore
/// use thermolog_core::{SensorSource, Result};
///
/// async fn print_reading<S: SensorSource>(sensor: &S) -> Result<()> {
///     let reading = sensor.acquire().await?;
///     println!("{}: {}", sensor.target().address, reading);
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait SensorSource: Send + Sync {
    /// Perform one acquisition attempt.
    ///
    /// Implementations must release any connection they open before
    /// returning, on success and on error alike.
    async fn acquire(&self) -> Result<Reading>;

    /// The device this source reads from.
    fn target(&self) -> &DeviceTarget;
}

/// One open connection to the sensor, used for a single attempt.
#[async_trait]
pub trait SensorLink: Send + Sync {
    /// Enable notifications and return the notified values.
    async fn subscribe(&self) -> Result<BoxStream<'static, Vec<u8>>>;

    /// A direct read of the current value, independent of `self`'s lifetime.
    fn read(&self) -> BoxFuture<'static, Result<Vec<u8>>>;

    /// Release the connection. Must be safe to call more than once.
    async fn close(&self) -> Result<()>;
}

/// Opens [`SensorLink`]s to a target device.
#[async_trait]
pub trait LinkOpener: Send + Sync {
    /// The link type produced.
    type Link: SensorLink;

    /// Find, connect to and profile `target`.
    ///
    /// On error nothing is left connected.
    async fn open(&self, target: &DeviceTarget, options: &AcquireOptions) -> Result<Self::Link>;
}
