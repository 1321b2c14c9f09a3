//! Text encoding of stored timestamps.
//!
//! Timestamps are stored as local wall-clock text, `YYYY-MM-DD HH:MM:SS.mmm`.
//! The fixed-width layout makes lexical order equal chronological order, so
//! SQLite can compare and index the column as plain text.

use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, PrimitiveDateTime};

use crate::error::{Error, Result};

/// Stored timestamp layout, millisecond precision.
pub const FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]");

/// Layout without fractional seconds, accepted when reading rows written by
/// other tools.
const FORMAT_SECONDS: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// SQL expression for the timestamp column in the millisecond layout.
///
/// Rows written by other tools may lack the fractional part, and
/// `"12:00:00"` sorts before `"12:00:00.000"`, so comparisons against
/// formatted bounds go through this expression.
pub(crate) const SQL_COLUMN: &str = "substr(timestamp || '.000', 1, 23)";

/// Calendar date layout, `YYYY-MM-DD`.
pub const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Format a timestamp for storage.
pub fn format(timestamp: PrimitiveDateTime) -> Result<String> {
    timestamp
        .format(FORMAT)
        .map_err(|e| Error::InvalidTimestamp(e.to_string()))
}

/// Parse a stored timestamp.
pub fn parse(text: &str) -> Result<PrimitiveDateTime> {
    PrimitiveDateTime::parse(text, FORMAT)
        .or_else(|_| PrimitiveDateTime::parse(text, FORMAT_SECONDS))
        .map_err(|e| Error::InvalidTimestamp(format!("{text:?}: {e}")))
}

/// Parse a `YYYY-MM-DD` calendar date.
pub fn parse_date(text: &str) -> Result<Date> {
    Date::parse(text, DATE_FORMAT).map_err(|e| Error::InvalidTimestamp(format!("{text:?}: {e}")))
}

/// Serde support for the stored text layout.
pub mod text {
    use serde::{Deserialize, Deserializer, Serializer, de};
    use time::PrimitiveDateTime;

    /// Serialize as `YYYY-MM-DD HH:MM:SS.mmm`.
    pub fn serialize<S: Serializer>(
        timestamp: &PrimitiveDateTime,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let text = super::format(*timestamp).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&text)
    }

    /// Deserialize from `YYYY-MM-DD HH:MM:SS[.mmm]`.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<PrimitiveDateTime, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::parse(&text).map_err(de::Error::custom)
    }
}
