//! Error types for line parsing in dtk-types.

use thiserror::Error;

use crate::types::Field;

/// Reasons a raw serial line is rejected by the parser.
///
/// Every variant means the whole line is dropped; a partially filled
/// [`Reading`](crate::Reading) is never produced.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new rejection
/// reasons without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The line does not contain the `": "` delimiter.
    #[error("missing \": \" delimiter")]
    MissingDelimiter,

    /// Fewer than four space-separated tokens follow the delimiter.
    #[error("expected at least 4 fields, found {found}")]
    TooFewFields { found: usize },

    /// The first field is not an integer.
    #[error("device id {token:?} is not an integer")]
    InvalidDeviceId { token: String },

    /// A measurement field is not a finite floating-point number.
    #[error("{field} {token:?} is not a number")]
    InvalidMeasurement { field: Field, token: String },
}

/// Result type alias using dtk-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
