//! Data models for stored data.

use serde::{Deserialize, Serialize};
use time::{Date, PrimitiveDateTime};

use thermolog_types::Reading;

/// A reading stored in the database.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    /// Database row ID.
    pub id: i64,
    /// Local wall-clock time the row was inserted, millisecond precision.
    #[serde(with = "crate::timestamp::text")]
    pub timestamp: PrimitiveDateTime,
    /// Temperature in Celsius.
    pub temperature: f64,
    /// Relative humidity percentage.
    pub humidity: u8,
}

impl StoredReading {
    /// The calendar date of the timestamp.
    pub fn date(&self) -> Date {
        self.timestamp.date()
    }

    /// Convert back to a bare [`Reading`].
    pub fn to_reading(&self) -> Reading {
        Reading::new(self.temperature, self.humidity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    #[test]
    fn test_stored_reading_serde() {
        let stored = StoredReading {
            id: 7,
            timestamp: datetime!(2025-08-05 18:00:00.250),
            temperature: 24.8,
            humidity: 58,
        };

        let json = serde_json::to_value(stored).unwrap();
        assert_eq!(json["timestamp"], "2025-08-05 18:00:00.250");
        assert_eq!(json["humidity"], 58);

        let back: StoredReading = serde_json::from_value(json).unwrap();
        assert_eq!(back, stored);
    }

    #[test]
    fn test_stored_reading_accessors() {
        let stored = StoredReading {
            id: 1,
            timestamp: datetime!(2025-08-05 23:59:59.999),
            temperature: -1.25,
            humidity: 90,
        };

        assert_eq!(stored.date(), date!(2025 - 08 - 05));
        assert_eq!(stored.to_reading(), Reading::new(-1.25, 90));
    }
}
