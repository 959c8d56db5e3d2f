//! Error types for dtk-service.
//!
//! | Error | Raised by | Handling |
//! |-------|-----------|----------|
//! | [`IngestError::MalformedInput`] | line parser | logged, line dropped, loop continues |
//! | [`IngestError::StorageUnavailable`] | store write or read | write: logged, record dropped; read: returned to the consumer |
//! | [`IngestError::DeviceOpen`] | initial connect | fatal, the loop never starts reading |
//! | [`IngestError::DeviceIo`] | non-timeout read error | closes the loop unless reconnection is enabled |

use std::io;

use dtk_types::ParseError;

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestError>;

/// Errors produced while ingesting serial lines.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// A line failed the delimiter, field-count or numeric checks.
    #[error("Malformed input: {0}")]
    MalformedInput(#[from] ParseError),

    /// The store could not complete the operation.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] dtk_store::Error),

    /// The serial device could not be opened.
    #[error("Failed to open {device}: {source}")]
    DeviceOpen {
        device: String,
        #[source]
        source: io::Error,
    },

    /// A non-timeout I/O error while reading from the device.
    #[error("I/O error on {device}: {source}")]
    DeviceIo {
        device: String,
        #[source]
        source: io::Error,
    },

    /// The ingestion thread panicked.
    #[error("Ingestion thread panicked")]
    Panicked,
}

impl IngestError {
    /// Whether the error ends the ingestion loop.
    ///
    /// Malformed lines and failed writes are recovered inside the loop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IngestError::DeviceOpen { .. } | IngestError::DeviceIo { .. } | IngestError::Panicked
        )
    }
}
