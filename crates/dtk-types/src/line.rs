//! Parsing of raw serial lines into [`Reading`]s.
//!
//! Sensor nodes print lines of the form
//!
//! ```text
//! <prefix>: <device_id> <humidity> <temperature> <ec>[ <ignored>...]
//! ```
//!
//! The prefix is arbitrary text; everything after the first `": "` is split on
//! single spaces and the first four tokens are converted positionally. Tokens
//! past the fourth are ignored.
//!
//! # Example
//!
//! ```
//! use dtk_types::{ParseError, parse_line};
//!
//! let reading = parse_line("Reading: 18 55.2 21.3 1200").unwrap();
//! assert_eq!(reading.device_id, 18);
//! assert_eq!(reading.ec, 1200.0);
//!
//! assert_eq!(
//!     parse_line("Reading 18 55.2 21.3 1200"),
//!     Err(ParseError::MissingDelimiter)
//! );
//! ```

use std::str::FromStr;

use crate::error::{ParseError, ParseResult};
use crate::types::{Field, Reading};

/// Separator between the free-form prefix and the data fields.
pub const DELIMITER: &str = ": ";

/// Number of positional fields a line must carry.
pub const FIELD_COUNT: usize = 4;

/// Parse one line (trailing newline already stripped) into a [`Reading`].
///
/// Pure function: it never panics and never returns a partial reading.
pub fn parse_line(line: &str) -> ParseResult<Reading> {
    let (_, payload) = line
        .split_once(DELIMITER)
        .ok_or(ParseError::MissingDelimiter)?;

    // Single-space split on purpose: "a  b" yields an empty token that then
    // fails numeric conversion.
    let tokens: Vec<&str> = payload.split(' ').collect();
    if tokens.len() < FIELD_COUNT {
        return Err(ParseError::TooFewFields {
            found: tokens.len(),
        });
    }

    let device_id = tokens[0]
        .parse::<i64>()
        .map_err(|_| ParseError::InvalidDeviceId {
            token: tokens[0].to_string(),
        })?;

    let mut values = [0.0f64; 3];
    for (slot, (field, token)) in values
        .iter_mut()
        .zip(Field::ALL.iter().zip(&tokens[1..FIELD_COUNT]))
    {
        *slot = parse_measurement(*field, token)?;
    }

    Ok(Reading::new(device_id, values[0], values[1], values[2]))
}

// `nan` and `inf` parse as f64 but cannot be stored as REAL values
fn parse_measurement(field: Field, token: &str) -> ParseResult<f64> {
    token
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| ParseError::InvalidMeasurement {
            field,
            token: token.to_string(),
        })
}

impl FromStr for Reading {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_line(s)
    }
}
