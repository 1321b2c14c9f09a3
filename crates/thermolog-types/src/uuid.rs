//! Bluetooth UUIDs used by the temperature/humidity sensor.

use uuid::{Uuid, uuid};

/// Data characteristic carrying temperature and humidity.
///
/// Notified (and readable) value layout:
/// - bytes 0-1: temperature in hundredths of a degree (i16 LE)
/// - byte 2: relative humidity in percent (u8)
///
/// Some firmware appends two bytes of battery voltage, which are ignored.
pub const DATA_CHARACTERISTIC: Uuid = uuid!("ebe0ccc1-7a0a-4b0c-8a1a-6ff2997da3a6");
