//! Read-side access for display consumers.
//!
//! [`QueryService`] wraps the shared store with async methods. A consumer
//! keeps its own [`Session`] (selected device and window size) and either
//! queries on demand or hands the session to a [`Poller`] that re-queries on
//! a fixed interval.
//!
//! Queries and clears are serialized with ingestion by the store mutex. A
//! clear issued while a line is being persisted waits for that insert to
//! commit and then removes it along with everything else; records inserted
//! after the clear returns are kept.

use std::io::Write;
use std::time::Duration;

use dtk_store::{DEFAULT_WINDOW, DeviceSummary, Result};
use dtk_types::SensorRecord;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::state::SharedStore;

/// Consumer-owned view state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Device whose window is shown. `None` shows nothing.
    pub selected_device: Option<i64>,
    /// Number of records in the rolling window.
    pub window: u32,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl Session {
    /// A session with no device selected.
    pub fn new(window: u32) -> Self {
        Self {
            selected_device: None,
            window,
        }
    }

    /// Select a device.
    pub fn select(&mut self, device_id: i64) {
        self.selected_device = Some(device_id);
    }

    /// Builder form of [`Session::select`].
    pub fn with_device(mut self, device_id: i64) -> Self {
        self.select(device_id);
        self
    }

    /// Clear the selection.
    pub fn deselect(&mut self) {
        self.selected_device = None;
    }
}

/// Async query front-end over the shared store.
#[derive(Clone)]
pub struct QueryService {
    store: SharedStore,
}

impl QueryService {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// The most recent `limit` records of a device, oldest first.
    pub async fn recent(&self, device_id: i64, limit: u32) -> Result<Vec<SensorRecord>> {
        let store = self.store.lock().await;
        store.query_recent(device_id, limit)
    }

    /// The rolling window for a session; empty when no device is selected.
    pub async fn window(&self, session: &Session) -> Result<Vec<SensorRecord>> {
        match session.selected_device {
            Some(device_id) => self.recent(device_id, session.window).await,
            None => Ok(Vec::new()),
        }
    }

    /// Distinct device ids with at least one record, ascending.
    pub async fn device_ids(&self) -> Result<Vec<i64>> {
        let store = self.store.lock().await;
        store.query_device_ids()
    }

    /// Per-device record counts and latest capture times.
    pub async fn device_summaries(&self) -> Result<Vec<DeviceSummary>> {
        let store = self.store.lock().await;
        store.device_summaries()
    }

    /// Every record, newest first.
    pub async fn all(&self) -> Result<Vec<SensorRecord>> {
        let store = self.store.lock().await;
        store.query_all()
    }

    /// Records with an id greater than `after_id`, oldest first.
    ///
    /// Feeding the last seen id back in yields each new record once.
    pub async fn after(&self, after_id: i64, limit: Option<u32>) -> Result<Vec<SensorRecord>> {
        let store = self.store.lock().await;
        store.query_after(after_id, limit)
    }

    /// Id of the newest record, if any.
    pub async fn latest_id(&self) -> Result<Option<i64>> {
        let store = self.store.lock().await;
        store.latest_id()
    }

    /// Delete every record. Returns the number removed.
    pub async fn clear(&self) -> Result<usize> {
        let store = self.store.lock().await;
        store.clear_all()
    }

    /// Write the full dump as CSV. Returns the number of rows written.
    pub async fn export_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let store = self.store.lock().await;
        store.export_csv(writer)
    }
}

/// Re-queries a session's rolling window on a fixed interval.
pub struct Poller {
    service: QueryService,
    period: Duration,
}

impl Poller {
    pub fn new(service: QueryService, period: Duration) -> Self {
        Self { service, period }
    }

    /// Poll until cancelled, passing each window to `on_window`.
    ///
    /// The session is read from `session` on every tick, so the consumer can
    /// change the selected device between polls. A failed query is logged and
    /// handed to the callback; polling continues. Returns the number of polls.
    pub async fn run<F>(
        &self,
        session: watch::Receiver<Session>,
        cancel: CancellationToken,
        mut on_window: F,
    ) -> u64
    where
        F: FnMut(&Session, Result<Vec<SensorRecord>>),
    {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut polls = 0u64;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let current = session.borrow().clone();
                    let result = self.service.window(&current).await;
                    if let Err(e) = &result {
                        warn!("Window query failed: {}", e);
                    }
                    polls += 1;
                    on_window(&current, result);
                }
            }
        }

        debug!("Poller stopped after {} poll(s)", polls);
        polls
    }
}
