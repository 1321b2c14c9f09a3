//! Core types for sensor data and device addressing.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Minimum number of bytes in a data characteristic payload.
pub const MIN_PAYLOAD_BYTES: usize = 3;

/// One temperature/humidity measurement decoded from the sensor.
///
/// A `Reading` carries no timestamp: the store stamps it with the wall-clock
/// time at insert.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reading {
    /// Temperature in degrees Celsius.
    pub temperature: f64,
    /// Relative humidity percentage (0-100).
    pub humidity: u8,
}

impl Reading {
    /// Create a reading from already-decoded values.
    pub fn new(temperature: f64, humidity: u8) -> Self {
        Self {
            temperature,
            humidity,
        }
    }

    /// Parse a `Reading` from a data characteristic payload.
    ///
    /// The byte format is:
    /// - bytes 0-1: Temperature (i16 LE, divide by 100 for Celsius)
    /// - byte 2: Humidity (u8)
    ///
    /// Trailing bytes are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InsufficientBytes`] if `data` contains fewer than
    /// [`MIN_PAYLOAD_BYTES`] (3) bytes.
    #[must_use = "parsing returns a Result that should be handled"]
    pub fn from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        use bytes::Buf;

        if data.len() < MIN_PAYLOAD_BYTES {
            return Err(ParseError::InsufficientBytes {
                expected: MIN_PAYLOAD_BYTES,
                actual: data.len(),
            });
        }

        let mut buf = data;
        let temp_raw = buf.get_i16_le();
        let humidity = buf.get_u8();

        Ok(Reading {
            temperature: f64::from(temp_raw) / 100.0,
            humidity,
        })
    }

    /// Temperature in hundredths of a degree, as sent on the wire.
    pub fn raw_temperature(&self) -> i16 {
        (self.temperature * 100.0).round() as i16
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T={:.2}°C, H={}%", self.temperature, self.humidity)
    }
}

/// A Bluetooth link-layer (MAC) address.
///
/// Parsing accepts `AA:BB:CC:DD:EE:FF`, `aa-bb-cc-dd-ee-ff` and
/// `AABBCCDDEEFF`. Display is always uppercase and colon separated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "String", into = "String")
)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Create an address from raw octets.
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// The six address octets, most significant first.
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for MacAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidAddress(s.to_string());
        let trimmed = s.trim();

        let hex: String = if trimmed.contains(':') || trimmed.contains('-') {
            let parts: Vec<&str> = trimmed.split([':', '-']).collect();
            if parts.len() != 6 || parts.iter().any(|p| p.len() != 2) {
                return Err(invalid());
            }
            parts.concat()
        } else {
            trimmed.to_string()
        };

        if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        let mut octets = [0u8; 6];
        for (i, octet) in octets.iter_mut().enumerate() {
            *octet = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
        }
        Ok(Self(octets))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddress> for String {
    fn from(value: MacAddress) -> Self {
        value.to_string()
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a, b, c, d, e, g
        )
    }
}

/// The single device the logger talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceTarget {
    /// Link-layer address of the sensor.
    pub address: MacAddress,
    /// Characteristic that carries the measurement.
    pub characteristic: uuid::Uuid,
}

impl DeviceTarget {
    /// Target the standard data characteristic on `address`.
    pub fn new(address: MacAddress) -> Self {
        Self {
            address,
            characteristic: crate::uuid::DATA_CHARACTERISTIC,
        }
    }

    /// Target a custom characteristic on `address`.
    #[must_use]
    pub fn with_characteristic(mut self, characteristic: uuid::Uuid) -> Self {
        self.characteristic = characteristic;
        self
    }
}

impl fmt::Display for DeviceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.address, self.characteristic)
    }
}
