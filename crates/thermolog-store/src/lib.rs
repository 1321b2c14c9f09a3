//! Local data persistence for temperature/humidity readings.
//!
//! This crate provides SQLite-based storage for sensor readings with
//! windowed retention.
//!
//! # Features
//!
//! - Append-only inserts stamped with the store's wall clock
//! - Retention pruning by cutoff time
//! - Latest, range, calendar-day and limited queries in either order
//! - WAL journaling so a separate reader process can query concurrently
//!
//! # Example
//!
//! ```no_run
//! use thermolog_store::{SortOrder, Store};
//! use thermolog_types::Reading;
//!
//! let store = Store::open_default()?;
//! store.append(&Reading::new(25.5, 60))?;
//!
//! let newest = store.query_all(Some(10), SortOrder::Descending)?;
//! # Ok::<(), thermolog_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;
pub mod timestamp;

pub use error::{Error, Result};
pub use models::StoredReading;
pub use queries::{InvalidSortOrder, ReadingQuery, SortOrder};
pub use store::{Clock, Store, offset_clock};

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/thermolog/sensor_data.db`
/// - macOS: `~/Library/Application Support/thermolog/sensor_data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\thermolog\sensor_data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("thermolog")
        .join("sensor_data.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_db_path_file_name() {
        let path = default_db_path();
        assert_eq!(path.file_name().unwrap(), "sensor_data.db");
        assert!(path.parent().unwrap().ends_with("thermolog"));
    }
}
