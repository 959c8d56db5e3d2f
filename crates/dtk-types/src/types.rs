//! Core types for DTK sensor data.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::PrimitiveDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;

/// Text layout of [`SensorRecord::captured_at`]: `YYYY-MM-DD HH:MM:SS`.
pub const CAPTURED_AT_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

#[cfg(feature = "serde")]
time::serde::format_description!(
    captured_at_text,
    PrimitiveDateTime,
    "[year]-[month]-[day] [hour]:[minute]:[second]"
);

/// Measurement columns of a reading, used to name the field a parse failed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Field {
    /// Relative humidity.
    Humidity,
    /// Temperature.
    Temperature,
    /// Electrical conductivity.
    Ec,
}

impl Field {
    /// Measurement fields in line order (after the device id).
    pub const ALL: [Field; 3] = [Field::Humidity, Field::Temperature, Field::Ec];
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::Humidity => "humidity",
            Field::Temperature => "temperature",
            Field::Ec => "ec",
        };
        write!(f, "{}", name)
    }
}

/// The four values carried by one accepted serial line.
///
/// No range validation is applied: any device id and any finite or
/// non-finite float the numeric parser accepts is kept as-is.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reading {
    /// Originating device. Not checked against any registry.
    pub device_id: i64,
    /// Relative humidity.
    pub humidity: f64,
    /// Temperature.
    pub temperature: f64,
    /// Electrical conductivity.
    pub ec: f64,
}

impl Reading {
    /// Create a reading from its four values.
    #[must_use]
    pub fn new(device_id: i64, humidity: f64, temperature: f64, ec: f64) -> Self {
        Self {
            device_id,
            humidity,
            temperature,
            ec,
        }
    }

    /// Value of one measurement field.
    #[must_use]
    pub fn value(&self, field: Field) -> f64 {
        match field {
            Field::Humidity => self.humidity,
            Field::Temperature => self.temperature,
            Field::Ec => self.ec,
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "device {}: humidity={} temperature={} ec={}",
            self.device_id, self.humidity, self.temperature, self.ec
        )
    }
}

/// A persisted sensor reading.
///
/// `id` is assigned by the store, strictly increasing and never reused; it is
/// the only ordering key for recency. `captured_at` is the store's wall clock
/// at insertion time, second resolution, and may collide across records.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SensorRecord {
    /// Store-assigned row id.
    pub id: i64,
    /// Originating device.
    pub device_id: i64,
    /// Relative humidity.
    pub humidity: f64,
    /// Temperature.
    pub temperature: f64,
    /// Electrical conductivity.
    pub ec: f64,
    /// When the store accepted the record.
    #[cfg_attr(feature = "serde", serde(with = "captured_at_text"))]
    pub captured_at: PrimitiveDateTime,
}

impl SensorRecord {
    /// Combine a reading with its store-assigned id and timestamp.
    #[must_use]
    pub fn from_reading(id: i64, reading: &Reading, captured_at: PrimitiveDateTime) -> Self {
        Self {
            id,
            device_id: reading.device_id,
            humidity: reading.humidity,
            temperature: reading.temperature,
            ec: reading.ec,
            captured_at,
        }
    }

    /// The measured values without id and timestamp.
    #[must_use]
    pub fn reading(&self) -> Reading {
        Reading::new(self.device_id, self.humidity, self.temperature, self.ec)
    }

    /// `captured_at` rendered as `YYYY-MM-DD HH:MM:SS`.
    #[must_use]
    pub fn captured_at_text(&self) -> String {
        format_captured_at(self.captured_at)
    }
}

/// Render a timestamp in [`CAPTURED_AT_FORMAT`].
#[must_use]
pub fn format_captured_at(at: PrimitiveDateTime) -> String {
    at.format(CAPTURED_AT_FORMAT).unwrap_or_default()
}

/// Parse a timestamp stored in [`CAPTURED_AT_FORMAT`].
pub fn parse_captured_at(text: &str) -> Result<PrimitiveDateTime, time::error::Parse> {
    PrimitiveDateTime::parse(text, CAPTURED_AT_FORMAT)
}
