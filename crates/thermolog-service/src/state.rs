//! Application state shared across tasks and handlers.

use std::sync::Arc;

use thermolog_store::Store;
use tokio::sync::Mutex;

use crate::config::Config;

/// Shared application state.
///
/// The store is the only thing the acquisition task, the retention task and
/// the HTTP handlers share. The configuration is read-only.
pub struct AppState {
    /// The reading store (wrapped in Mutex for thread-safe access).
    pub store: Mutex<Store>,
    /// Configuration, fixed at startup.
    pub config: Config,
}

impl AppState {
    /// Create new application state.
    pub fn new(store: Store, config: Config) -> Arc<Self> {
        Arc::new(Self {
            store: Mutex::new(store),
            config,
        })
    }
}
