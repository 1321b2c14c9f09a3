//! Polling scheduler and read-only HTTP API for a BLE temperature/humidity
//! sensor.
//!
//! This crate provides a service that:
//! - Polls one configured sensor on a fixed interval, with bounded retry
//! - Appends each reading to the local SQLite store
//! - Prunes readings older than the retention window once a day
//! - Exposes a read-only REST API over the stored readings
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health check
//! - `GET /api/latest` - Most recent reading
//! - `GET /api/history?limit=N&order=asc|desc` - All readings, newest first by default
//! - `GET /api/daily_history/{YYYY-MM-DD}` - One calendar day, oldest first
//!
//! # Configuration
//!
//! The service reads `config.json` from the executable's directory unless
//! `--config` is given:
//!
//! ```json
//! {
//!   "mac_addresses": ["A4:C1:38:00:00:01"],
//!   "poll_interval_minutes": 5,
//!   "database_path": "/var/www/sensor-data/sensor_data.db"
//! }
//! ```

pub mod api;
pub mod collector;
pub mod config;
pub mod retention;
pub mod state;

pub use collector::{Collector, TickOutcome};
pub use config::{Config, ConfigError, ValidationError};
pub use retention::Retention;
pub use state::AppState;
