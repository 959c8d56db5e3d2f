//! Record types and line parser for DTK soil sensor readings.
//!
//! This crate holds the I/O-free part of the ingestion pipeline and is shared
//! by the store (`dtk-store`) and the ingestion service (`dtk-service`).
//!
//! # Features
//!
//! - [`Reading`]: the four values carried by one serial line
//! - [`SensorRecord`]: a reading after the store assigned its id and timestamp
//! - [`parse_line`]: total, side-effect free line parser
//! - [`ParseError`]: why a line was rejected
//!
//! # Example
//!
//! ```
//! use dtk_types::{Reading, parse_line};
//!
//! let reading = parse_line("Node 3: 18 55.2 21.3 1200")?;
//! assert_eq!(reading, Reading::new(18, 55.2, 21.3, 1200.0));
//! # Ok::<(), dtk_types::ParseError>(())
//! ```

pub mod error;
pub mod line;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use line::{DELIMITER, FIELD_COUNT, parse_line};
pub use types::{
    CAPTURED_AT_FORMAT, Field, Reading, SensorRecord, format_captured_at, parse_captured_at,
};

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn sample_record() -> SensorRecord {
        SensorRecord::from_reading(
            42,
            &Reading::new(18, 55.2, 21.3, 1200.0),
            datetime!(2024-05-01 08:30:15),
        )
    }

    #[test]
    fn test_record_from_reading_round_trip() {
        let record = sample_record();
        assert_eq!(record.id, 42);
        assert_eq!(record.reading(), Reading::new(18, 55.2, 21.3, 1200.0));
    }

    #[test]
    fn test_captured_at_text() {
        assert_eq!(sample_record().captured_at_text(), "2024-05-01 08:30:15");
    }

    #[test]
    fn test_parse_captured_at() {
        let at = parse_captured_at("2024-05-01 08:30:15").unwrap();
        assert_eq!(at, datetime!(2024-05-01 08:30:15));
        assert!(parse_captured_at("2024-05-01T08:30:15Z").is_err());
    }

    #[test]
    fn test_reading_value_by_field() {
        let reading = Reading::new(1, 10.0, 20.0, 30.0);
        let values: Vec<f64> = Field::ALL.iter().map(|f| reading.value(*f)).collect();
        assert_eq!(values, vec![10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_reading_display() {
        let reading = Reading::new(18, 55.2, 21.3, 1200.0);
        assert_eq!(
            reading.to_string(),
            "device 18: humidity=55.2 temperature=21.3 ec=1200"
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_record_serialization_uses_text_timestamp() {
        let json = serde_json::to_string(&sample_record()).unwrap();
        assert!(json.contains("\"captured_at\":\"2024-05-01 08:30:15\""));
        assert!(json.contains("\"device_id\":18"));

        let back: SensorRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sample_record());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_field_serialization() {
        assert_eq!(serde_json::to_string(&Field::Ec).unwrap(), "\"ec\"");
    }
}
