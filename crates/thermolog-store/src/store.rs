//! Main store implementation.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use rusqlite::{Connection, Row, params_from_iter};
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};
use tracing::{debug, info, warn};

use thermolog_types::Reading;

use crate::error::{Error, Result};
use crate::models::StoredReading;
use crate::queries::{ReadingQuery, SortOrder};
use crate::{schema, timestamp};

/// Source of "now" for stamping inserted rows.
pub type Clock = Arc<dyn Fn() -> PrimitiveDateTime + Send + Sync>;

/// A clock returning the current wall-clock time at a fixed UTC offset.
pub fn offset_clock(offset: UtcOffset) -> Clock {
    Arc::new(move || {
        let now = OffsetDateTime::now_utc().to_offset(offset);
        PrimitiveDateTime::new(now.date(), now.time())
    })
}

/// SQLite-based store for sensor readings.
///
/// Rows are append-only: the only mutations are [`Store::append`] and
/// [`Store::prune_older_than`]. Every inserted row is stamped by the store's
/// clock; callers cannot supply their own timestamp.
pub struct Store {
    conn: Connection,
    clock: Clock,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.conn.path())
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open or create a database at the given path.
    ///
    /// The connection uses WAL journaling so a separate reader process can
    /// query while readings are being written.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self::with_connection(conn))
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self::with_connection(conn))
    }

    fn with_connection(conn: Connection) -> Self {
        Self {
            conn,
            clock: offset_clock(UtcOffset::UTC),
        }
    }

    /// Stamp rows with wall-clock time at `offset` (typically the local
    /// offset captured at startup).
    #[must_use]
    pub fn with_offset(self, offset: UtcOffset) -> Self {
        self.with_clock(offset_clock(offset))
    }

    /// Replace the clock used to stamp rows and compute "now".
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Current time according to the store's clock.
    pub fn now(&self) -> PrimitiveDateTime {
        (self.clock)()
    }

    /// Re-run schema initialization. Idempotent.
    pub fn initialize(&self) -> Result<()> {
        schema::initialize(&self.conn)
    }

    // === Writes ===

    /// Insert a reading stamped with the current time.
    ///
    /// The insert is a single statement, so a row is either stored whole or
    /// not at all.
    pub fn append(&self, reading: &Reading) -> Result<StoredReading> {
        let text = timestamp::format(self.now())?;

        self.conn.execute(
            "INSERT INTO sensor_readings (timestamp, temperature, humidity) VALUES (?1, ?2, ?3)",
            rusqlite::params![text, reading.temperature, reading.humidity],
        )?;
        let id = self.conn.last_insert_rowid();

        debug!("Stored reading {} at {}", id, text);

        Ok(StoredReading {
            id,
            timestamp: timestamp::parse(&text)?,
            temperature: reading.temperature,
            humidity: reading.humidity,
        })
    }

    /// Delete every row stamped strictly before `cutoff`.
    ///
    /// Returns the number of rows deleted.
    pub fn prune_older_than(&self, cutoff: PrimitiveDateTime) -> Result<usize> {
        let cutoff = timestamp::format(cutoff)?;
        let deleted = self.conn.execute(
            &format!("DELETE FROM sensor_readings WHERE {} < ?1", timestamp::SQL_COLUMN),
            [&cutoff],
        )?;
        debug!("Pruned {} rows older than {}", deleted, cutoff);
        Ok(deleted)
    }

    // === Reads ===

    /// Query readings with filters.
    pub fn query(&self, query: &ReadingQuery) -> Result<Vec<StoredReading>> {
        let (where_clause, params) = query.build_where()?;
        let sql = query.build_sql(&where_clause);

        debug!("Executing query: {}", sql);

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(params.iter()), RawRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows.into_iter().filter_map(RawRow::into_stored).collect())
    }

    /// The most recently stored reading, if any.
    pub fn latest(&self) -> Result<Option<StoredReading>> {
        let mut readings = self.query(&ReadingQuery::new().limit(1))?;
        Ok(readings.pop())
    }

    /// Readings with `start <= timestamp < end`.
    pub fn query_range(
        &self,
        start: PrimitiveDateTime,
        end: PrimitiveDateTime,
        order: SortOrder,
    ) -> Result<Vec<StoredReading>> {
        self.query(&ReadingQuery::new().since(start).until(end).order(order))
    }

    /// All readings, optionally limited.
    pub fn query_all(&self, limit: Option<u32>, order: SortOrder) -> Result<Vec<StoredReading>> {
        let mut query = ReadingQuery::new().order(order);
        query.limit = limit;
        self.query(&query)
    }

    /// Readings stamped on the given calendar day.
    pub fn query_day(&self, date: Date, order: SortOrder) -> Result<Vec<StoredReading>> {
        let mut query = ReadingQuery::new()
            .since(PrimitiveDateTime::new(date, Time::MIDNIGHT))
            .order(order);
        if let Some(next) = date.next_day() {
            query = query.until(PrimitiveDateTime::new(next, Time::MIDNIGHT));
        }
        self.query(&query)
    }

    /// Total number of stored rows.
    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM sensor_readings", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

/// A row as read from SQLite, before validation.
struct RawRow {
    id: i64,
    timestamp: String,
    temperature: f64,
    humidity: i64,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            temperature: row.get(2)?,
            humidity: row.get(3)?,
        })
    }

    /// Validate the row; rows written by other tools may not parse.
    fn into_stored(self) -> Option<StoredReading> {
        let timestamp = match timestamp::parse(&self.timestamp) {
            Ok(ts) => ts,
            Err(e) => {
                warn!("Skipping row {}: {}", self.id, e);
                return None;
            }
        };

        let Ok(humidity) = u8::try_from(self.humidity) else {
            warn!(
                "Skipping row {}: humidity {} out of range",
                self.id, self.humidity
            );
            return None;
        };

        Some(StoredReading {
            id: self.id,
            timestamp,
            temperature: self.temperature,
            humidity,
        })
    }
}
