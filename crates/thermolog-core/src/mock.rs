//! Mock sensor implementation for testing.
//!
//! [`MockSensor`] implements [`SensorSource`] without touching any Bluetooth
//! hardware, so the scheduler and service can be tested deterministically.
//!
//! # Features
//!
//! - **Scripted outcomes**: queue successes and failures in call order
//! - **Latency simulation**: delay each call to exercise timing
//! - **Concurrency tracking**: record the peak number of overlapping calls

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use thermolog_types::{DeviceTarget, MacAddress, Reading};

use crate::device::DEFAULT_NOTIFICATION_TIMEOUT;
use crate::error::{Error, Result};
use crate::traits::SensorSource;

/// A scripted stand-in for a BLE sensor.
///
/// Each call to [`SensorSource::acquire`] pops the next scripted outcome.
/// When the script is empty the fallback reading is returned, or a
/// [`Error::NotificationTimeout`] if no fallback was set.
///
/// # Example
///
/// ```
/// use thermolog_core::{Error, MockSensor, SensorSource};
/// use thermolog_types::Reading;
///
/// #[tokio::main]
/// async fn main() {
///     let sensor = MockSensor::builder()
///         .fail_with(Error::LinkClosed)
///         .succeed_with(Reading::new(21.5, 40))
///         .build();
///
///     assert!(sensor.acquire().await.is_err());
///     assert_eq!(sensor.acquire().await.unwrap().humidity, 40);
///     assert_eq!(sensor.call_count(), 2);
/// }
/// ```
pub struct MockSensor {
    target: DeviceTarget,
    script: Mutex<VecDeque<Result<Reading>>>,
    fallback: Option<Reading>,
    latency: Duration,
    calls: AtomicU32,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl std::fmt::Debug for MockSensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSensor")
            .field("target", &self.target)
            .field("fallback", &self.fallback)
            .field("calls", &self.calls.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl MockSensor {
    /// A sensor that always returns `reading`.
    pub fn constant(reading: Reading) -> Self {
        MockSensorBuilder::new().fallback(reading).build()
    }

    /// A sensor that always fails.
    pub fn unreachable() -> Self {
        MockSensorBuilder::new().build()
    }

    /// Start building a scripted sensor.
    pub fn builder() -> MockSensorBuilder {
        MockSensorBuilder::new()
    }

    /// Append an outcome to the script.
    pub fn push(&self, outcome: Result<Reading>) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(outcome);
    }

    /// Number of times `acquire` has been called.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of `acquire` calls that were running at the same time.
    pub fn max_concurrent_calls(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> Result<Reading> {
        let scripted = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        match (scripted, self.fallback) {
            (Some(outcome), _) => outcome,
            (None, Some(reading)) => Ok(reading),
            (None, None) => Err(Error::NotificationTimeout {
                duration: DEFAULT_NOTIFICATION_TIMEOUT,
            }),
        }
    }
}

#[async_trait]
impl SensorSource for MockSensor {
    async fn acquire(&self) -> Result<Reading> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let outcome = self.next_outcome();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    fn target(&self) -> &DeviceTarget {
        &self.target
    }
}

/// Builder for [`MockSensor`].
#[derive(Debug)]
pub struct MockSensorBuilder {
    target: DeviceTarget,
    script: VecDeque<Result<Reading>>,
    fallback: Option<Reading>,
    latency: Duration,
}

impl Default for MockSensorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSensorBuilder {
    /// Create a builder with an empty script and no fallback.
    pub fn new() -> Self {
        Self {
            target: DeviceTarget::new(MacAddress::new([0xA4, 0xC1, 0x38, 0x00, 0x00, 0x01])),
            script: VecDeque::new(),
            fallback: None,
            latency: Duration::ZERO,
        }
    }

    /// Set the device target reported by the sensor.
    #[must_use]
    pub fn target(mut self, target: DeviceTarget) -> Self {
        self.target = target;
        self
    }

    /// Queue a successful acquisition.
    #[must_use]
    pub fn succeed_with(mut self, reading: Reading) -> Self {
        self.script.push_back(Ok(reading));
        self
    }

    /// Queue a failed acquisition.
    #[must_use]
    pub fn fail_with(mut self, error: Error) -> Self {
        self.script.push_back(Err(error));
        self
    }

    /// Queue `count` consecutive failures built by `make_error`.
    #[must_use]
    pub fn fail_times(mut self, count: usize, make_error: impl Fn() -> Error) -> Self {
        self.script.extend((0..count).map(|_| Err(make_error())));
        self
    }

    /// Reading returned once the script is exhausted.
    #[must_use]
    pub fn fallback(mut self, reading: Reading) -> Self {
        self.fallback = Some(reading);
        self
    }

    /// Delay applied to every call.
    #[must_use]
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Build the sensor.
    pub fn build(self) -> MockSensor {
        MockSensor {
            target: self.target,
            script: Mutex::new(self.script),
            fallback: self.fallback,
            latency: self.latency,
            calls: AtomicU32::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}
