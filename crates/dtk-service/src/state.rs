//! State shared between the ingestion thread and query consumers.
//!
//! The store sits behind a single [`tokio::sync::Mutex`]: the ingestion
//! thread takes it with `blocking_lock`, async consumers with `lock().await`.
//! Every insert, query and clear is therefore serialized.

use std::sync::atomic::{AtomicI64, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use dtk_store::Store;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::Mutex;

/// Store handle shared by the producer and all consumers.
pub type SharedStore = Arc<Mutex<Store>>;

/// Wrap a store for sharing.
pub fn shared_store(store: Store) -> SharedStore {
    Arc::new(Mutex::new(store))
}

/// Current phase of the ingestion loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum IngestState {
    /// Opening (or reopening) the device.
    Connecting = 0,
    /// Waiting for the next line.
    Reading = 1,
    /// Validating a received line.
    Parsing = 2,
    /// Writing a parsed reading to the store.
    Persisting = 3,
    /// The loop has exited.
    Closed = 4,
}

impl IngestState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => IngestState::Connecting,
            1 => IngestState::Reading,
            2 => IngestState::Parsing,
            3 => IngestState::Persisting,
            _ => IngestState::Closed,
        }
    }
}

/// Counters updated by the ingestion loop, readable from any thread.
pub struct IngestStats {
    state: AtomicU8,
    lines_read: AtomicU64,
    stored: AtomicU64,
    rejected: AtomicU64,
    storage_failures: AtomicU64,
    reconnects: AtomicU64,
    /// Unix timestamp of the last stored record (0 = never).
    last_stored_at: AtomicI64,
    /// Id of the last stored record (0 = none).
    last_record_id: AtomicI64,
    last_error: RwLock<Option<String>>,
}

impl IngestStats {
    /// Create zeroed stats in the `Connecting` state.
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(IngestState::Connecting as u8),
            lines_read: AtomicU64::new(0),
            stored: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            storage_failures: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            last_stored_at: AtomicI64::new(0),
            last_record_id: AtomicI64::new(0),
            last_error: RwLock::new(None),
        }
    }

    pub fn state(&self) -> IngestState {
        IngestState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: IngestState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub(crate) fn line_read(&self) {
        self.lines_read.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stored(&self, id: i64) {
        self.stored.fetch_add(1, Ordering::Relaxed);
        self.last_record_id.store(id, Ordering::SeqCst);
        self.last_stored_at.store(
            OffsetDateTime::now_utc().unix_timestamp(),
            Ordering::SeqCst,
        );
    }

    pub(crate) fn line_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn storage_failed(&self, message: String) {
        self.storage_failures.fetch_add(1, Ordering::Relaxed);
        self.set_last_error(message);
    }

    pub(crate) fn reconnected(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_last_error(&self, message: String) {
        if let Ok(mut last) = self.last_error.write() {
            *last = Some(message);
        }
    }

    /// Number of records written so far.
    pub fn stored(&self) -> u64 {
        self.stored.load(Ordering::Relaxed)
    }

    /// Number of lines dropped by the parser.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Take a consistent-enough copy for display or JSON output.
    pub fn snapshot(&self) -> IngestSnapshot {
        let last_stored_at = match self.last_stored_at.load(Ordering::SeqCst) {
            0 => None,
            ts => OffsetDateTime::from_unix_timestamp(ts).ok(),
        };
        let last_record_id = match self.last_record_id.load(Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        };
        IngestSnapshot {
            state: self.state(),
            lines_read: self.lines_read.load(Ordering::Relaxed),
            stored: self.stored(),
            rejected: self.rejected(),
            storage_failures: self.storage_failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            last_stored_at,
            last_record_id,
            last_error: self.last_error.read().ok().and_then(|e| e.clone()),
        }
    }
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`IngestStats`].
#[derive(Debug, Clone, Serialize)]
pub struct IngestSnapshot {
    pub state: IngestState,
    pub lines_read: u64,
    pub stored: u64,
    pub rejected: u64,
    pub storage_failures: u64,
    pub reconnects: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_stored_at: Option<OffsetDateTime>,
    pub last_record_id: Option<i64>,
    pub last_error: Option<String>,
}
