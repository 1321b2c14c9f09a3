//! Query builder for stored readings.
//!
//! # Example
//!
//! ```
//! use thermolog_store::{ReadingQuery, SortOrder, Store};
//! use time::macros::datetime;
//!
//! let store = Store::open_in_memory()?;
//!
//! // One calendar day, oldest first
//! let query = ReadingQuery::new()
//!     .since(datetime!(2025-08-05 00:00))
//!     .until(datetime!(2025-08-06 00:00))
//!     .order(SortOrder::Ascending);
//!
//! let readings = store.query(&query)?;
//! # Ok::<(), thermolog_store::Error>(())
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::PrimitiveDateTime;

use crate::error::Result;
use crate::timestamp;

/// Result ordering by timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    /// Oldest first.
    #[serde(rename = "asc")]
    Ascending,
    /// Newest first.
    #[default]
    #[serde(rename = "desc")]
    Descending,
}

impl SortOrder {
    fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Ascending => write!(f, "asc"),
            SortOrder::Descending => write!(f, "desc"),
        }
    }
}

/// Error returned when parsing an unknown sort order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid order {0:?}: expected 'asc' or 'desc'")]
pub struct InvalidSortOrder(pub String);

impl FromStr for SortOrder {
    type Err = InvalidSortOrder;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("asc") {
            Ok(SortOrder::Ascending)
        } else if s.eq_ignore_ascii_case("desc") {
            Ok(SortOrder::Descending)
        } else {
            Err(InvalidSortOrder(s.to_string()))
        }
    }
}

/// Fluent query builder for stored readings.
///
/// Use this to construct queries for [`Store::query`](crate::Store::query).
/// All filter methods are optional and can be chained in any order.
///
/// By default, queries return every row, newest first.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReadingQuery {
    /// Include readings at or after this time.
    pub since: Option<PrimitiveDateTime>,
    /// Include readings strictly before this time.
    pub until: Option<PrimitiveDateTime>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Result ordering.
    pub order: SortOrder,
}

impl ReadingQuery {
    /// Create a new query with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter to readings at or after this time.
    #[must_use]
    pub fn since(mut self, time: PrimitiveDateTime) -> Self {
        self.since = Some(time);
        self
    }

    /// Filter to readings strictly before this time.
    #[must_use]
    pub fn until(mut self, time: PrimitiveDateTime) -> Self {
        self.until = Some(time);
        self
    }

    /// Limit the maximum number of results returned.
    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the result ordering.
    #[must_use]
    pub fn order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    /// Build the SQL WHERE clause and parameters.
    ///
    /// Rows with a NULL measurement are never returned.
    pub(crate) fn build_where(&self) -> Result<(String, Vec<String>)> {
        let mut conditions = vec![
            "temperature IS NOT NULL".to_string(),
            "humidity IS NOT NULL".to_string(),
        ];
        let mut params = Vec::new();

        if let Some(since) = self.since {
            conditions.push(format!("{} >= ?", timestamp::SQL_COLUMN));
            params.push(timestamp::format(since)?);
        }

        if let Some(until) = self.until {
            conditions.push(format!("{} < ?", timestamp::SQL_COLUMN));
            params.push(timestamp::format(until)?);
        }

        Ok((format!("WHERE {}", conditions.join(" AND ")), params))
    }

    /// Build the full SQL query.
    pub(crate) fn build_sql(&self, where_clause: &str) -> String {
        // id breaks ties between rows stamped in the same millisecond
        let order = self.order.as_sql();
        let mut sql = format!(
            "SELECT id, timestamp, temperature, humidity FROM sensor_readings {} \
             ORDER BY timestamp {}, id {}",
            where_clause, order, order
        );

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        sql
    }
}
