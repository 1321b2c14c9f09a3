//! One-shot acquisition of a reading.
//!
//! After subscribing, the sensor may deliver its value either as a
//! notification or in response to a direct read, and either may arrive
//! first. Both are started concurrently and the first valid payload wins.
//!
//! ```text
//!   notifications ──┐
//!                   ├──> FirstPayload (single slot) ──> Reading
//!   direct read ────┘
//! ```
//!
//! The slot accepts exactly one value; anything arriving afterwards is
//! discarded. Both producers are aborted as soon as the caller returns.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::platform::Adapter;
use futures::future::BoxFuture;
use futures::{Stream, StreamExt};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::device::AcquireOptions;
use crate::error::{Error, Result};
use crate::scan::get_adapter;
use crate::traits::{LinkOpener, SensorLink, SensorSource};
use thermolog_types::{DeviceTarget, Reading};

/// Where a payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSource {
    /// Pushed by the device after subscribing.
    Notification,
    /// Returned by an explicit characteristic read.
    DirectRead,
}

impl fmt::Display for PayloadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadSource::Notification => write!(f, "notification"),
            PayloadSource::DirectRead => write!(f, "direct read"),
        }
    }
}

/// Single-slot hand-off between the producers and the waiter.
///
/// Only producers hold this, so once both have finished the sender is dropped
/// and the waiter wakes up instead of sitting out the full timeout.
struct FirstPayload {
    sender: Mutex<Option<oneshot::Sender<(Reading, PayloadSource)>>>,
}

impl FirstPayload {
    fn new(sender: oneshot::Sender<(Reading, PayloadSource)>) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }

    /// Decode `bytes` and deliver them if the slot is still empty.
    fn offer(&self, bytes: &[u8], source: PayloadSource, seen: &Observed) {
        let reading = match Reading::from_bytes(bytes) {
            Ok(reading) => reading,
            Err(e) => {
                warn!("Malformed {} payload ({} bytes): {}", source, bytes.len(), e);
                seen.record_malformed(bytes.len());
                return;
            }
        };

        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match sender {
            Some(tx) => {
                // The waiter may have timed out already.
                let _ = tx.send((reading, source));
            }
            None => debug!("Discarding {} ({}): reading already delivered", source, reading),
        }
    }
}

/// What the producers saw, used to pick an error when no reading arrives.
#[derive(Default)]
struct Observed {
    malformed_len: Mutex<Option<usize>>,
}

impl Observed {
    fn record_malformed(&self, len: usize) {
        *self
            .malformed_len
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(len);
    }

    fn malformed(&self) -> Option<Error> {
        let len = *self
            .malformed_len
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        len.map(|len| Error::MalformedPayload { len })
    }

    /// Both producers finished without a valid payload.
    fn exhausted(&self) -> Error {
        self.malformed().unwrap_or(Error::LinkClosed)
    }

    /// The wait timed out.
    fn timed_out(&self, duration: Duration) -> Error {
        self.malformed()
            .unwrap_or(Error::NotificationTimeout { duration })
    }
}

/// Aborts the wrapped tasks when dropped.
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Race a notification stream against a direct read.
///
/// Returns the first payload that decodes into a [`Reading`]. Malformed
/// payloads are logged and skipped; they never fill the slot.
///
/// # Errors
///
/// - [`Error::MalformedPayload`] if only short payloads were seen.
/// - [`Error::NotificationTimeout`] if nothing arrived within `wait`.
/// - [`Error::LinkClosed`] if the stream ended and the read failed before
///   `wait` elapsed.
pub async fn first_payload<S>(
    notifications: S,
    read: BoxFuture<'static, Result<Vec<u8>>>,
    wait: Duration,
) -> Result<Reading>
where
    S: Stream<Item = Vec<u8>> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let slot = Arc::new(FirstPayload::new(tx));
    let seen = Arc::new(Observed::default());

    let notify_task = tokio::spawn({
        let slot = Arc::clone(&slot);
        let seen = Arc::clone(&seen);
        async move {
            let mut notifications = std::pin::pin!(notifications);
            while let Some(bytes) = notifications.next().await {
                slot.offer(&bytes, PayloadSource::Notification, &seen);
            }
            debug!("Notification stream ended");
        }
    });

    let read_task = tokio::spawn({
        let seen = Arc::clone(&seen);
        async move {
            match read.await {
                Ok(bytes) => slot.offer(&bytes, PayloadSource::DirectRead, &seen),
                Err(e) => debug!("Direct read failed: {}", e),
            }
        }
    });

    let _producers = AbortOnDrop(vec![notify_task.abort_handle(), read_task.abort_handle()]);

    match timeout(wait, rx).await {
        Ok(Ok((reading, source))) => {
            debug!("Received {} via {}", reading, source);
            Ok(reading)
        }
        Ok(Err(_)) => Err(seen.exhausted()),
        Err(_) => Err(seen.timed_out(wait)),
    }
}

/// A [`SensorSource`] backed by a real BLE device.
///
/// Every call to [`SensorSource::acquire`] opens a fresh link, races the
/// notification against a direct read, and closes the link again, whatever
/// the outcome. Concurrent calls are serialized on an internal radio guard,
/// so at most one link is open at a time.
///
/// The opener defaults to a btleplug [`Adapter`]; any [`LinkOpener`] works.
pub struct BleSensor<O: LinkOpener = Adapter> {
    opener: O,
    target: DeviceTarget,
    options: AcquireOptions,
    radio: tokio::sync::Mutex<()>,
}

impl<O: LinkOpener> fmt::Debug for BleSensor<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BleSensor")
            .field("target", &self.target)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl BleSensor<Adapter> {
    /// Create a sensor on the first available Bluetooth adapter.
    pub async fn new(target: DeviceTarget, options: AcquireOptions) -> Result<Self> {
        let adapter = get_adapter().await?;
        Ok(Self::with_adapter(adapter, target, options))
    }

    /// Create a sensor on a specific adapter.
    pub fn with_adapter(adapter: Adapter, target: DeviceTarget, options: AcquireOptions) -> Self {
        Self::with_opener(adapter, target, options)
    }
}

impl<O: LinkOpener> BleSensor<O> {
    /// Create a sensor that opens its links through `opener`.
    pub fn with_opener(opener: O, target: DeviceTarget, options: AcquireOptions) -> Self {
        Self {
            opener,
            target,
            options,
            radio: tokio::sync::Mutex::new(()),
        }
    }

    /// The timeouts used for each attempt.
    pub fn options(&self) -> &AcquireOptions {
        &self.options
    }

    async fn acquire_once(&self) -> Result<Reading> {
        let _radio = self.radio.lock().await;

        let link = self.opener.open(&self.target, &self.options).await?;
        let result = self.collect(&link).await;

        if let Err(e) = link.close().await {
            warn!("Failed to disconnect from {}: {}", self.target.address, e);
        }

        result
    }

    async fn collect(&self, link: &O::Link) -> Result<Reading> {
        let notifications = link.subscribe().await?;
        info!("Subscribed. Waiting for data...");
        first_payload(notifications, link.read(), self.options.notification_timeout).await
    }
}

#[async_trait]
impl<O: LinkOpener> SensorSource for BleSensor<O> {
    async fn acquire(&self) -> Result<Reading> {
        let reading = self.acquire_once().await?;
        info!("Read {} from {}", reading, self.target.address);
        Ok(reading)
    }

    fn target(&self) -> &DeviceTarget {
        &self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream::{self, BoxStream};
    use std::future;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use thermolog_types::MacAddress;
    use tokio::time::Instant;

    const WAIT: Duration = Duration::from_secs(30);

    fn pending_read() -> BoxFuture<'static, Result<Vec<u8>>> {
        Box::pin(future::pending())
    }

    fn failed_read() -> BoxFuture<'static, Result<Vec<u8>>> {
        Box::pin(async { Err(Error::LinkClosed) })
    }

    fn delayed_read(delay: Duration, bytes: Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>>> {
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            Ok(bytes)
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_notification_wins() {
        let notifications = stream::iter(vec![vec![0xF6, 0x09, 60]]).chain(stream::pending::<Vec<u8>>());

        let reading = first_payload(notifications, pending_read(), WAIT).await.unwrap();

        assert_eq!(reading, Reading::new(25.5, 60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_read_wins_when_no_notification() {
        let read = delayed_read(Duration::from_secs(1), vec![0xB0, 0x09, 58, 0x8C, 0x0B]);

        let reading = first_payload(stream::pending::<Vec<u8>>(), read, WAIT).await.unwrap();

        assert_eq!(reading.temperature, 24.8);
        assert_eq!(reading.humidity, 58);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_first_payload_is_delivered() {
        // Read answers at 1s, notification at 2s; the later one is discarded.
        let notifications = stream::once(async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            vec![0x00, 0x00, 10]
        })
        .chain(stream::pending::<Vec<u8>>());
        let read = delayed_read(Duration::from_secs(1), vec![0xF6, 0x09, 60]);

        let reading = first_payload(notifications, read, WAIT).await.unwrap();

        assert_eq!(reading, Reading::new(25.5, 60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_payload_does_not_fill_slot() {
        let notifications =
            stream::iter(vec![vec![0x01], vec![0xF6, 0x09, 60]]).chain(stream::pending::<Vec<u8>>());

        let reading = first_payload(notifications, pending_read(), WAIT).await.unwrap();

        assert_eq!(reading.humidity, 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_without_data() {
        let err = first_payload(stream::pending::<Vec<u8>>(), pending_read(), WAIT)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NotificationTimeout { duration } if duration == WAIT));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_with_only_malformed_payloads() {
        let notifications = stream::iter(vec![vec![0x01, 0x02]]).chain(stream::pending::<Vec<u8>>());

        let err = first_payload(notifications, pending_read(), WAIT)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MalformedPayload { len: 2 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_closed_when_both_producers_finish() {
        let start = tokio::time::Instant::now();

        let err = first_payload(stream::empty::<Vec<u8>>(), failed_read(), WAIT)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::LinkClosed));
        assert!(start.elapsed() < WAIT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_producers_are_aborted_on_return() {
        struct CountOnDrop(Arc<AtomicUsize>);
        impl Drop for CountOnDrop {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicUsize::new(0));
        let guard = CountOnDrop(Arc::clone(&dropped));
        let read: BoxFuture<'static, Result<Vec<u8>>> = Box::pin(async move {
            let _guard = guard;
            future::pending::<()>().await;
            Ok(Vec::new())
        });
        let notifications = stream::iter(vec![vec![0xF6, 0x09, 60]]).chain(stream::pending::<Vec<u8>>());

        first_payload(notifications, read, WAIT).await.unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    /// How each fake link behaves once opened.
    #[derive(Clone)]
    enum Script {
        RefuseOpen,
        SubscribeFails,
        Silent,
        Notify(Vec<u8>),
        SlowRead(Duration, Vec<u8>),
    }

    #[derive(Default)]
    struct LinkCounters {
        opened: AtomicUsize,
        closed: AtomicUsize,
        open_now: AtomicUsize,
        max_open: AtomicUsize,
    }

    impl LinkCounters {
        fn get(counter: &AtomicUsize) -> usize {
            counter.load(Ordering::SeqCst)
        }
    }

    struct FakeOpener {
        script: Script,
        counters: Arc<LinkCounters>,
    }

    struct FakeLink {
        script: Script,
        counters: Arc<LinkCounters>,
    }

    #[async_trait]
    impl LinkOpener for FakeOpener {
        type Link = FakeLink;

        async fn open(&self, target: &DeviceTarget, options: &AcquireOptions) -> Result<FakeLink> {
            // Give a competing caller the chance to interleave.
            tokio::task::yield_now().await;

            if let Script::RefuseOpen = self.script {
                return Err(Error::connect_timeout(target.address, options.connect_timeout));
            }

            self.counters.opened.fetch_add(1, Ordering::SeqCst);
            let open_now = self.counters.open_now.fetch_add(1, Ordering::SeqCst) + 1;
            self.counters.max_open.fetch_max(open_now, Ordering::SeqCst);

            Ok(FakeLink {
                script: self.script.clone(),
                counters: Arc::clone(&self.counters),
            })
        }
    }

    #[async_trait]
    impl SensorLink for FakeLink {
        async fn subscribe(&self) -> Result<BoxStream<'static, Vec<u8>>> {
            match &self.script {
                Script::SubscribeFails => Err(Error::subscribe_failed("ebe0ccc1", "not permitted")),
                Script::Notify(bytes) => Ok(stream::iter(vec![bytes.clone()])
                    .chain(stream::pending())
                    .boxed()),
                _ => Ok(stream::pending().boxed()),
            }
        }

        fn read(&self) -> BoxFuture<'static, Result<Vec<u8>>> {
            match &self.script {
                Script::SlowRead(delay, bytes) => delayed_read(*delay, bytes.clone()),
                _ => pending_read(),
            }
        }

        async fn close(&self) -> Result<()> {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
            self.counters.open_now.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fake_sensor(script: Script) -> (BleSensor<FakeOpener>, Arc<LinkCounters>) {
        let counters = Arc::new(LinkCounters::default());
        let opener = FakeOpener {
            script,
            counters: Arc::clone(&counters),
        };
        let target = DeviceTarget::new(MacAddress::new([0xA4, 0xC1, 0x38, 0x00, 0x00, 0x01]));
        (
            BleSensor::with_opener(opener, target, AcquireOptions::default()),
            counters,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_closes_link_after_success() {
        let (sensor, counters) = fake_sensor(Script::Notify(vec![0xF6, 0x09, 60]));

        assert_eq!(sensor.acquire().await.unwrap(), Reading::new(25.5, 60));

        assert_eq!(LinkCounters::get(&counters.opened), 1);
        assert_eq!(LinkCounters::get(&counters.closed), 1);
        assert_eq!(LinkCounters::get(&counters.open_now), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_closes_link_after_subscribe_failure() {
        let (sensor, counters) = fake_sensor(Script::SubscribeFails);

        let err = sensor.acquire().await.unwrap_err();

        assert!(matches!(err, Error::SubscribeFailed { .. }));
        assert_eq!(LinkCounters::get(&counters.closed), 1);
        assert_eq!(LinkCounters::get(&counters.open_now), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_closes_link_after_notification_timeout() {
        let (sensor, counters) = fake_sensor(Script::Silent);
        let start = Instant::now();

        let err = sensor.acquire().await.unwrap_err();

        assert!(matches!(err, Error::NotificationTimeout { .. }));
        assert_eq!(start.elapsed(), sensor.options().notification_timeout);
        assert_eq!(LinkCounters::get(&counters.closed), 1);
        assert_eq!(LinkCounters::get(&counters.open_now), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_failed_open_leaves_nothing_to_close() {
        let (sensor, counters) = fake_sensor(Script::RefuseOpen);

        let err = sensor.acquire().await.unwrap_err();

        assert!(matches!(err, Error::ConnectTimeout { .. }));
        assert_eq!(LinkCounters::get(&counters.opened), 0);
        assert_eq!(LinkCounters::get(&counters.closed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquires_never_overlap_links() {
        let (sensor, counters) =
            fake_sensor(Script::SlowRead(Duration::from_secs(1), vec![0xB0, 0x09, 58]));
        let sensor = Arc::new(sensor);
        let start = Instant::now();

        let a = tokio::spawn({
            let sensor = Arc::clone(&sensor);
            async move { sensor.acquire().await }
        });
        let b = tokio::spawn({
            let sensor = Arc::clone(&sensor);
            async move { sensor.acquire().await }
        });
        assert_eq!(a.await.unwrap().unwrap().humidity, 58);
        assert_eq!(b.await.unwrap().unwrap().humidity, 58);

        assert_eq!(LinkCounters::get(&counters.opened), 2);
        assert_eq!(LinkCounters::get(&counters.closed), 2);
        assert_eq!(LinkCounters::get(&counters.max_open), 1);
        // The second attempt waited for the first to release the radio.
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[test]
    fn test_payload_source_display() {
        assert_eq!(PayloadSource::Notification.to_string(), "notification");
        assert_eq!(PayloadSource::DirectRead.to_string(), "direct read");
    }
}
