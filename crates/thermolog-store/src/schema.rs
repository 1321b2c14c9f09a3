//! Database schema.
//!
//! The table layout is shared with external readers (the query API may run
//! as a separate process against the same file), so column names and the
//! timestamp text format must not change.

use rusqlite::Connection;
use tracing::debug;

use crate::error::Result;

/// Current schema version, tracked in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i32 = 1;

/// Ensure the readings table and its timestamp index exist.
///
/// Safe to call on every start, and on databases created by other tools
/// with the same layout.
pub fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS sensor_readings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp DATETIME NOT NULL,
            temperature REAL,
            humidity INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_timestamp ON sensor_readings(timestamp);
        "#,
    )?;

    let version = get_schema_version(conn)?;
    if version < SCHEMA_VERSION {
        debug!("Setting schema version {} -> {}", version, SCHEMA_VERSION);
        set_schema_version(conn, SCHEMA_VERSION)?;
    }

    Ok(())
}

/// Get the current schema version.
fn get_schema_version(conn: &Connection) -> Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version)
}

/// Set the schema version.
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}
