//! A single connection to the sensor.
//!
//! A [`Link`] lives for exactly one acquisition attempt: it is opened,
//! subscribed and read once, then closed. Links are never reused across
//! attempts, so a half-broken connection cannot leak into the next tick.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Characteristic, Peripheral as _};
use btleplug::platform::{Adapter, Peripheral};
use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::scan::find_device;
use crate::traits::{LinkOpener, SensorLink};
use thermolog_types::DeviceTarget;

/// Default time limit for finding and connecting to the device.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Default time limit for GATT service discovery once connected.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default wait for the first valid payload after subscribing.
pub const DEFAULT_NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeouts for one acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquireOptions {
    /// Time limit for scanning and connecting, shared by both steps.
    pub connect_timeout: Duration,
    /// Time limit for service discovery after connection.
    pub discovery_timeout: Duration,
    /// How long to wait for a notification or direct read to produce data.
    pub notification_timeout: Duration,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            notification_timeout: DEFAULT_NOTIFICATION_TIMEOUT,
        }
    }
}

impl AcquireOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the discovery timeout.
    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the notification timeout.
    #[must_use]
    pub fn notification_timeout(mut self, timeout: Duration) -> Self {
        self.notification_timeout = timeout;
        self
    }
}

/// An open BLE connection to the target device.
///
/// # Cleanup
///
/// Call [`Link::close`] before dropping. If a `Link` is dropped without
/// closing (for example because the surrounding future was cancelled), a
/// best-effort disconnect is spawned and a warning is logged.
pub struct Link {
    /// Kept alive for the lifetime of the peripheral connection.
    #[allow(dead_code)]
    adapter: Adapter,
    peripheral: Peripheral,
    characteristic: Characteristic,
    target: DeviceTarget,
    closed: AtomicBool,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("target", &self.target)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Link {
    /// Find, connect to, and profile the target device.
    ///
    /// Scanning and connecting share `options.connect_timeout`; service
    /// discovery gets its own timeout. If anything after the connection fails,
    /// the device is disconnected before the error is returned.
    #[tracing::instrument(level = "info", skip_all, fields(address = %target.address))]
    pub async fn open(
        adapter: Adapter,
        target: &DeviceTarget,
        options: &AcquireOptions,
    ) -> Result<Self> {
        let connect_timeout = options.connect_timeout;
        let deadline = Instant::now() + connect_timeout;

        info!("Attempting to connect...");
        let peripheral = find_device(&adapter, target.address, connect_timeout).await?;
        if Instant::now() >= deadline {
            return Err(Error::connect_timeout(target.address, connect_timeout));
        }

        connect_or_release(
            deadline,
            async { peripheral.connect().await.map_err(Error::from) },
            async { peripheral.disconnect().await.map_err(Error::from) },
            Error::connect_timeout(target.address, connect_timeout),
        )
        .await?;
        info!("Connected. Discovering services...");

        match locate_characteristic(&peripheral, target, options.discovery_timeout).await {
            Ok(characteristic) => Ok(Self {
                adapter,
                peripheral,
                characteristic,
                target: target.clone(),
                closed: AtomicBool::new(false),
            }),
            Err(e) => {
                if let Err(disconnect_err) = peripheral.disconnect().await {
                    debug!("Disconnect after failed discovery: {}", disconnect_err);
                }
                Err(e)
            }
        }
    }

    /// The device this link is connected to.
    pub fn target(&self) -> &DeviceTarget {
        &self.target
    }

    /// Enable notifications and return the stream of notified values.
    ///
    /// The notification stream is opened before notifications are enabled so
    /// a value pushed immediately after the CCCD write is not missed. Only
    /// values for the target characteristic are yielded.
    pub async fn subscribe(&self) -> Result<BoxStream<'static, Vec<u8>>> {
        let uuid = self.characteristic.uuid;
        let subscribe_failed =
            |e: btleplug::Error| Error::subscribe_failed(uuid.to_string(), e.to_string());

        let stream = self.peripheral.notifications().await.map_err(subscribe_failed)?;
        self.peripheral
            .subscribe(&self.characteristic)
            .await
            .map_err(subscribe_failed)?;
        debug!("Subscribed to {}", uuid);

        Ok(stream
            .filter_map(move |notification| async move {
                (notification.uuid == uuid).then_some(notification.value)
            })
            .boxed())
    }

    /// A direct read of the characteristic's current value.
    ///
    /// The returned future owns its handles, so it can be spawned and raced
    /// against the notification stream.
    pub fn read(&self) -> BoxFuture<'static, Result<Vec<u8>>> {
        let peripheral = self.peripheral.clone();
        let characteristic = self.characteristic.clone();
        Box::pin(async move { Ok(peripheral.read(&characteristic).await?) })
    }

    /// Disconnect from the device.
    #[tracing::instrument(level = "debug", skip(self), fields(address = %self.target.address))]
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("Disconnecting...");
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

/// Run `connect` until `deadline`, releasing the connection if it fails.
///
/// Dropping a pending connect does not cancel it on every platform, so on
/// timeout or error `release` is awaited before the error is returned. A
/// failed release is only logged.
pub(crate) async fn connect_or_release<C, R>(
    deadline: Instant,
    connect: C,
    release: R,
    timed_out: Error,
) -> Result<()>
where
    C: Future<Output = Result<()>>,
    R: Future<Output = Result<()>>,
{
    let outcome = match timeout_at(deadline, connect).await {
        Ok(result) => result,
        Err(_) => Err(timed_out),
    };

    if let Err(e) = &outcome {
        debug!("Connect failed ({}), releasing connection", e);
        if let Err(release_err) = release.await {
            debug!("Disconnect after failed connect: {}", release_err);
        }
    }

    outcome
}

#[async_trait]
impl SensorLink for Link {
    async fn subscribe(&self) -> Result<BoxStream<'static, Vec<u8>>> {
        Link::subscribe(self).await
    }

    fn read(&self) -> BoxFuture<'static, Result<Vec<u8>>> {
        Link::read(self)
    }

    async fn close(&self) -> Result<()> {
        Link::close(self).await
    }
}

#[async_trait]
impl LinkOpener for Adapter {
    type Link = Link;

    async fn open(&self, target: &DeviceTarget, options: &AcquireOptions) -> Result<Link> {
        Link::open(self.clone(), target, options).await
    }
}

/// Discover services and find the target characteristic.
async fn locate_characteristic(
    peripheral: &Peripheral,
    target: &DeviceTarget,
    discovery_timeout: Duration,
) -> Result<Characteristic> {
    timeout(discovery_timeout, peripheral.discover_services())
        .await
        .map_err(|_| {
            Error::discovery_failed(format!("timed out after {:?}", discovery_timeout))
        })?
        .map_err(|e| Error::discovery_failed(e.to_string()))?;

    let services = peripheral.services();
    debug!("Found {} services", services.len());

    services
        .iter()
        .flat_map(|service| service.characteristics.iter())
        .find(|c| c.uuid == target.characteristic)
        .cloned()
        .ok_or_else(|| {
            Error::characteristic_not_found(target.characteristic.to_string(), services.len())
        })
}

impl Drop for Link {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        warn!(
            address = %self.target.address,
            "Link dropped without calling close() - performing best-effort disconnect"
        );

        let peripheral = self.peripheral.clone();
        let address = self.target.address;

        // The runtime may already be shutting down.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = peripheral.disconnect().await {
                    debug!(device_address = %address, error = %e, "Best-effort disconnect failed");
                } else {
                    debug!(device_address = %address, "Best-effort disconnect completed");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use thermolog_types::MacAddress;

    #[test]
    fn test_acquire_options_defaults() {
        let options = AcquireOptions::default();
        assert_eq!(options.connect_timeout, Duration::from_secs(20));
        assert_eq!(options.discovery_timeout, Duration::from_secs(10));
        assert_eq!(options.notification_timeout, Duration::from_secs(30));
    }

    fn counted_release(count: Arc<AtomicUsize>) -> impl Future<Output = Result<()>> {
        async move {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn timed_out() -> Error {
        Error::connect_timeout(MacAddress::new([0xA4, 0xC1, 0x38, 0, 0, 1]), CONNECT)
    }

    const CONNECT: Duration = Duration::from_secs(20);

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_releases_connection() {
        let released = Arc::new(AtomicUsize::new(0));
        let start = Instant::now();

        let result = connect_or_release(
            start + CONNECT,
            std::future::pending::<Result<()>>(),
            counted_release(Arc::clone(&released)),
            timed_out(),
        )
        .await;

        assert!(matches!(result, Err(Error::ConnectTimeout { .. })));
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), CONNECT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_error_releases_connection() {
        let released = Arc::new(AtomicUsize::new(0));

        let result = connect_or_release(
            Instant::now() + CONNECT,
            async { Err::<(), _>(Error::LinkClosed) },
            counted_release(Arc::clone(&released)),
            timed_out(),
        )
        .await;

        assert!(matches!(result, Err(Error::LinkClosed)));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_success_keeps_connection() {
        let released = Arc::new(AtomicUsize::new(0));

        connect_or_release(
            Instant::now() + CONNECT,
            async { Ok::<(), Error>(()) },
            counted_release(Arc::clone(&released)),
            timed_out(),
        )
        .await
        .unwrap();

        assert_eq!(released.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_release_keeps_connect_error() {
        let result = connect_or_release(
            Instant::now() + CONNECT,
            std::future::pending::<Result<()>>(),
            async { Err::<(), _>(Error::NoAdapter) },
            timed_out(),
        )
        .await;

        assert!(matches!(result, Err(Error::ConnectTimeout { .. })));
    }

    #[test]
    fn test_acquire_options_builder() {
        let options = AcquireOptions::new()
            .connect_timeout(Duration::from_secs(5))
            .notification_timeout(Duration::from_millis(1500));
        assert_eq!(options.connect_timeout, Duration::from_secs(5));
        assert_eq!(options.discovery_timeout, DEFAULT_DISCOVERY_TIMEOUT);
        assert_eq!(options.notification_timeout, Duration::from_millis(1500));
    }
}
