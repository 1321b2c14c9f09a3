//! Retention task.
//!
//! Deletes readings older than the configured window once at startup and
//! then every 24 hours.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::state::AppState;

/// Time between retention sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Background task that prunes old readings.
pub struct Retention {
    state: Arc<AppState>,
    window: Duration,
    every: Duration,
}

impl Retention {
    /// Create a retention task using the window from the shared configuration.
    pub fn new(state: Arc<AppState>) -> Self {
        let window = state.config.retention();
        Self {
            state,
            window,
            every: SWEEP_INTERVAL,
        }
    }

    /// Delete every reading older than the retention window.
    ///
    /// The cutoff is computed from the store's clock while holding the store
    /// lock, so rows appended afterwards are never affected.
    pub async fn sweep(&self) -> thermolog_store::Result<usize> {
        let store = self.state.store.lock().await;
        let cutoff = store.now() - self.window;
        let deleted = store.prune_older_than(cutoff)?;

        let days = self.window.as_secs() / (24 * 60 * 60);
        if deleted > 0 {
            info!("Deleted {} records older than {} day(s)", deleted, days);
        } else {
            info!("No data older than {} day(s) to delete", days);
        }

        Ok(deleted)
    }

    /// Sweep immediately, then every 24 hours, until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!("Failed to delete old records: {}", e);
                    }
                }
            }
        }

        info!("Retention task stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use thermolog_store::{Clock, SortOrder, Store};
    use thermolog_types::Reading;
    use time::PrimitiveDateTime;
    use time::macros::datetime;

    use crate::config::Config;

    fn state_at(start: PrimitiveDateTime) -> (Arc<AppState>, Arc<Mutex<PrimitiveDateTime>>) {
        let now = Arc::new(Mutex::new(start));
        let handle = Arc::clone(&now);
        let clock: Clock = Arc::new(move || *handle.lock().unwrap());
        let store = Store::open_in_memory().unwrap().with_clock(clock);
        let config = Config::new(vec!["A4:C1:38:00:00:01".to_string()], 5);
        (AppState::new(store, config), now)
    }

    async fn append_at(state: &AppState, now: &Mutex<PrimitiveDateTime>, at: PrimitiveDateTime) {
        *now.lock().unwrap() = at;
        state
            .store
            .lock()
            .await
            .append(&Reading::new(20.0, 50))
            .unwrap();
    }

    #[tokio::test]
    async fn test_sweep_deletes_only_older_than_window() {
        let (state, now) = state_at(datetime!(2025-08-05 12:00));
        append_at(&state, &now, datetime!(2025-08-04 11:59:59.999)).await;
        append_at(&state, &now, datetime!(2025-08-04 12:00:00.000)).await;
        append_at(&state, &now, datetime!(2025-08-05 11:00:00.000)).await;
        *now.lock().unwrap() = datetime!(2025-08-05 12:00);

        let retention = Retention::new(Arc::clone(&state));
        assert_eq!(retention.sweep().await.unwrap(), 1);

        let rows = state
            .store
            .lock()
            .await
            .query_all(None, SortOrder::Ascending)
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp, datetime!(2025-08-04 12:00));
    }

    #[tokio::test]
    async fn test_sweep_on_empty_store() {
        let (state, _) = state_at(datetime!(2025-08-05 12:00));
        let retention = Retention::new(state);
        assert_eq!(retention.sweep().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_sweeps_immediately_and_daily() {
        let (state, now) = state_at(datetime!(2025-08-01 00:00));
        append_at(&state, &now, datetime!(2025-08-01 00:00)).await;
        append_at(&state, &now, datetime!(2025-08-03 00:00)).await;
        *now.lock().unwrap() = datetime!(2025-08-03 12:00);

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(Retention::new(Arc::clone(&state)).run(shutdown.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(state.store.lock().await.count().unwrap(), 1);

        // A day later the remaining row is out of the window too.
        *now.lock().unwrap() = datetime!(2025-08-04 12:00);
        tokio::time::sleep(SWEEP_INTERVAL).await;
        assert_eq!(state.store.lock().await.count().unwrap(), 0);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
