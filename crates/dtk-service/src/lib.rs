//! Serial ingestion and query service for DTK soil sensors.
//!
//! This crate provides:
//! - An ingestion loop that reads `<prefix>: <device_id> <humidity> <temperature> <ec>`
//!   lines from a serial device and appends every valid one to the store
//! - A query service for display consumers (rolling window per device,
//!   device list, full dump, clear, CSV export)
//! - A poller that refreshes a consumer's rolling window on an interval
//! - The `dtk` command-line binary
//!
//! Ingestion runs on its own thread; consumers are async. Both share one
//! [`SharedStore`].
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/dtk/dtk.toml`:
//!
//! ```toml
//! [serial]
//! path = "/dev/ttyUSB0"
//! baud_rate = 115200
//! read_timeout_ms = 1000
//!
//! [storage]
//! path = "~/.local/share/dtk/sensor_data.db"
//!
//! [query]
//! window = 15
//! poll_interval_ms = 1000
//!
//! [reconnect]
//! max_attempts = 0   # close on the first I/O error
//! ```
//!
//! # Example
//!
//! ```no_run
//! use dtk_service::{IngestLoop, QueryService, Session, SerialConnector, shared_store};
//! use dtk_store::Store;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = shared_store(Store::open_default()?);
//! let connector = SerialConnector::new("/dev/ttyUSB0", 115_200, Duration::from_secs(1));
//! let ingest = IngestLoop::new(connector, store.clone()).spawn(CancellationToken::new())?;
//!
//! let queries = QueryService::new(store);
//! let window = queries.window(&Session::new(15).with_device(18)).await?;
//! println!("{} records", window.len());
//!
//! ingest.cancel();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod ingest;
pub mod mock;
pub mod query;
pub mod reconnect;
pub mod source;
pub mod state;

pub use config::{
    Config, ConfigError, QueryConfig, ReconnectConfig, SerialConfig, StorageConfig,
    ValidationError,
};
pub use error::IngestError;
pub use ingest::{CloseReason, IngestHandle, IngestLoop};
pub use query::{Poller, QueryService, Session};
pub use reconnect::ReconnectOptions;
pub use source::{Connector, LineReader, LineSource, ReadOutcome, SerialConnector};
pub use state::{IngestSnapshot, IngestState, IngestStats, SharedStore, shared_store};
