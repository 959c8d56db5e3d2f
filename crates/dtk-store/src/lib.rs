//! SQLite persistence for DTK soil sensor records.
//!
//! This crate owns the durable, append-only record table. Every accepted
//! serial line becomes exactly one row; rows are never updated and are only
//! removed by [`Store::clear_all`].
//!
//! # Features
//!
//! - Idempotent schema setup with version tracking
//! - Monotonic, never reused record ids (the only recency key)
//! - Rolling-window, device list, full dump and "newer than id" queries
//! - Transactional clear of all records
//! - CSV export of the full dump
//!
//! # Example
//!
//! ```no_run
//! use dtk_store::{DEFAULT_WINDOW, Store};
//! use dtk_types::Reading;
//!
//! let store = Store::open_default()?;
//! store.insert(&Reading::new(18, 55.2, 21.3, 1200.0))?;
//!
//! // Last 15 records of device 18, oldest first
//! let window = store.query_recent(18, DEFAULT_WINDOW)?;
//! # Ok::<(), dtk_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::DeviceSummary;
pub use queries::RecordQuery;
pub use schema::SCHEMA_VERSION;
pub use store::{DEFAULT_WINDOW, Store};

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/dtk/sensor_data.db`
/// - macOS: `~/Library/Application Support/dtk/sensor_data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\dtk\sensor_data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("dtk")
        .join("sensor_data.db")
}
