//! Acquisition task.
//!
//! One cycle ("tick") runs the bounded-retry acquisition and appends the
//! result to the store. Ticks never overlap: the next one starts only after
//! the previous tick and the poll interval have both elapsed.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use thermolog_core::{RetryPolicy, SensorSource, with_retry};
use thermolog_store::StoredReading;

use crate::state::AppState;

/// Result of a single acquisition cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// A reading was acquired and stored.
    Saved(StoredReading),
    /// A reading was acquired but the insert failed.
    StoreFailed,
    /// Every attempt failed; nothing was stored.
    NoReading,
}

/// Background collector that polls the sensor on the configured interval.
pub struct Collector {
    state: Arc<AppState>,
    sensor: Arc<dyn SensorSource>,
    policy: RetryPolicy,
    poll_interval: Duration,
}

impl Collector {
    /// Create a new collector using the retry policy and poll interval from
    /// the shared configuration.
    pub fn new(state: Arc<AppState>, sensor: Arc<dyn SensorSource>) -> Self {
        let policy = state.config.retry_policy();
        let poll_interval = state.config.poll_interval();
        Self {
            state,
            sensor,
            policy,
            poll_interval,
        }
    }

    /// Run one acquisition cycle.
    pub async fn tick(&self) -> TickOutcome {
        let address = self.sensor.target().address;
        info!("Attempting to collect data from {}", address);

        let reading = match with_retry(&self.policy, "acquire", || self.sensor.acquire()).await {
            Ok(reading) => reading,
            Err(e) => {
                error!(
                    "Failed to collect data from {} after {} attempt(s): {}",
                    address,
                    self.policy.max_attempts.max(1),
                    e
                );
                return TickOutcome::NoReading;
            }
        };

        let store = self.state.store.lock().await;
        match store.append(&reading) {
            Ok(stored) => {
                info!(
                    id = stored.id,
                    temperature = reading.temperature,
                    humidity = reading.humidity,
                    "Saved reading {}",
                    reading
                );
                TickOutcome::Saved(stored)
            }
            Err(e) => {
                warn!("Failed to save reading {}: {}", reading, e);
                TickOutcome::StoreFailed
            }
        }
    }

    /// Poll until `shutdown` is cancelled.
    ///
    /// The first tick runs immediately.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            "Starting collector for {} (interval: {:?})",
            self.sensor.target(),
            self.poll_interval
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.tick() => {}
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(self.poll_interval) => {}
            }
        }

        info!("Collector stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use thermolog_core::{Error, MockSensor};
    use thermolog_store::{SortOrder, Store};
    use thermolog_types::Reading;

    use crate::config::Config;

    fn test_state(store: Store) -> Arc<AppState> {
        let mut config = Config::new(vec!["A4:C1:38:00:00:01".to_string()], 5);
        config.retry_delay_seconds = 5;
        AppState::new(store, config)
    }

    fn drop_readings_table(path: &Path) {
        let conn = rusqlite::Connection::open(path).unwrap();
        conn.execute_batch("DROP TABLE sensor_readings").unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_saves_reading() {
        let state = test_state(Store::open_in_memory().unwrap());
        let sensor = Arc::new(MockSensor::constant(Reading::new(25.5, 60)));
        let collector = Collector::new(Arc::clone(&state), sensor.clone());

        let outcome = collector.tick().await;

        let TickOutcome::Saved(stored) = outcome else {
            panic!("expected a saved reading, got {outcome:?}");
        };
        assert_eq!(stored.to_reading(), Reading::new(25.5, 60));
        assert_eq!(state.store.lock().await.latest().unwrap(), Some(stored));
        assert_eq!(sensor.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_retries_until_success() {
        let state = test_state(Store::open_in_memory().unwrap());
        let sensor = Arc::new(
            MockSensor::builder()
                .fail_times(2, || Error::NotificationTimeout {
                    duration: Duration::from_secs(30),
                })
                .succeed_with(Reading::new(24.8, 58))
                .build(),
        );
        let collector = Collector::new(Arc::clone(&state), sensor.clone());

        let outcome = collector.tick().await;

        assert!(matches!(outcome, TickOutcome::Saved(_)));
        assert_eq!(sensor.call_count(), 3);
        assert_eq!(state.store.lock().await.count().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_gives_up_after_max_attempts() {
        let state = test_state(Store::open_in_memory().unwrap());
        let sensor = Arc::new(MockSensor::unreachable());
        let collector = Collector::new(Arc::clone(&state), sensor.clone());

        let outcome = collector.tick().await;

        assert_eq!(outcome, TickOutcome::NoReading);
        assert_eq!(sensor.call_count(), 3);
        assert_eq!(state.store.lock().await.count().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_store_failure_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sensor_data.db");
        let store = Store::open(&path).unwrap();
        drop_readings_table(&path);

        let state = test_state(store);
        let sensor = Arc::new(MockSensor::constant(Reading::new(25.5, 60)));
        let collector = Collector::new(state, sensor.clone());

        assert_eq!(collector.tick().await, TickOutcome::StoreFailed);
        assert_eq!(sensor.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_immediately_then_every_interval() {
        let state = test_state(Store::open_in_memory().unwrap());
        let sensor = Arc::new(MockSensor::constant(Reading::new(21.0, 45)));
        let collector = Collector::new(Arc::clone(&state), sensor.clone());
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(collector.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sensor.call_count(), 1);

        // Poll interval is 5 minutes
        tokio::time::sleep(Duration::from_secs(5 * 60)).await;
        assert_eq!(sensor.call_count(), 2);

        tokio::time::sleep(Duration::from_secs(5 * 60)).await;
        assert_eq!(sensor.call_count(), 3);

        shutdown.cancel();
        handle.await.unwrap();

        let rows = state
            .store
            .lock()
            .await
            .query_all(None, SortOrder::Ascending)
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(sensor.max_concurrent_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tick_does_not_stop_the_loop() {
        let state = test_state(Store::open_in_memory().unwrap());
        let sensor = Arc::new(
            MockSensor::builder()
                .fail_times(3, || Error::LinkClosed)
                .fallback(Reading::new(22.0, 50))
                .build(),
        );
        let collector = Collector::new(Arc::clone(&state), sensor.clone());
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(collector.run(shutdown.clone()));

        // First tick: three failures, 10 s of retry delay, then the interval.
        tokio::time::sleep(Duration::from_secs(5 * 60 + 11)).await;
        assert_eq!(sensor.call_count(), 4);
        assert_eq!(state.store.lock().await.count().unwrap(), 1);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_during_slow_acquisition() {
        let state = test_state(Store::open_in_memory().unwrap());
        let sensor = Arc::new(
            MockSensor::builder()
                .fallback(Reading::new(22.0, 50))
                .latency(Duration::from_secs(60))
                .build(),
        );
        let collector = Collector::new(Arc::clone(&state), sensor.clone());
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(collector.run(shutdown.clone()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(sensor.call_count(), 1);
        assert_eq!(state.store.lock().await.count().unwrap(), 0);
    }
}
