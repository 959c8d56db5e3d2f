//! The serial ingestion loop.
//!
//! One loop owns one device. For every line it reads it runs
//! `Reading -> Parsing -> Persisting -> Reading`; a rejected line or a failed
//! write is logged and dropped, and only device failures or cancellation end
//! the loop. Lines are processed strictly in arrival order, so ids assigned
//! by the store follow the order lines came off the wire.
//!
//! The loop is synchronous and runs on its own thread (see
//! [`IngestLoop::spawn`]). It takes the shared store with `blocking_lock`,
//! so [`IngestLoop::run`] must not be called from inside an async task.

use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use dtk_types::{SensorRecord, parse_line};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{IngestError, Result};
use crate::reconnect::ReconnectOptions;
use crate::source::{Connector, LineSource, ReadOutcome};
use crate::state::{IngestState, IngestStats, SharedStore};

/// Granularity of cancellation checks while sleeping between reconnects.
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Consecutive storage failures logged at `error` before the loop goes quiet.
const LOUD_STORAGE_FAILURES: u32 = 3;

/// Why the loop stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The cancellation token fired.
    Cancelled,
    /// The device reported end of stream.
    EndOfStream,
}

/// Reads lines from a device and appends every valid one to the store.
pub struct IngestLoop<C: Connector> {
    connector: C,
    store: SharedStore,
    reconnect: ReconnectOptions,
    stats: Arc<IngestStats>,
    consecutive_storage_failures: u32,
}

impl<C: Connector> IngestLoop<C> {
    /// Create a loop with reconnection disabled.
    pub fn new(connector: C, store: SharedStore) -> Self {
        Self {
            connector,
            store,
            reconnect: ReconnectOptions::disabled(),
            stats: Arc::new(IngestStats::new()),
            consecutive_storage_failures: 0,
        }
    }

    /// Set the reconnection policy.
    pub fn with_reconnect(mut self, reconnect: ReconnectOptions) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Shared counters for this loop.
    pub fn stats(&self) -> Arc<IngestStats> {
        Arc::clone(&self.stats)
    }

    /// Run until cancelled, end of stream, or a device failure.
    ///
    /// Cancellation is observed between lines and while waiting to
    /// reconnect; a line that is already being persisted is finished first.
    pub fn run(mut self, cancel: &CancellationToken) -> Result<CloseReason> {
        let device = self.connector.describe();
        self.stats.set_state(IngestState::Connecting);

        let source = match self.connector.connect() {
            Ok(source) => source,
            Err(e) => {
                error!("Failed to open {}: {}", device, e);
                self.stats.set_last_error(e.to_string());
                self.stats.set_state(IngestState::Closed);
                return Err(IngestError::DeviceOpen { device, source: e });
            }
        };
        info!("Reading from {}", device);

        let result = self.pump(source, &device, cancel);
        self.stats.set_state(IngestState::Closed);

        match &result {
            Ok(reason) => info!(
                "Ingestion from {} stopped ({:?}), {} record(s) stored",
                device,
                reason,
                self.stats.stored()
            ),
            Err(e) => error!("Ingestion from {} failed: {}", device, e),
        }
        result
    }

    fn pump(
        &mut self,
        source: C::Source,
        device: &str,
        cancel: &CancellationToken,
    ) -> Result<CloseReason> {
        let mut source = Some(source);

        loop {
            if cancel.is_cancelled() {
                return Ok(CloseReason::Cancelled);
            }
            let Some(current) = source.as_mut() else {
                return Ok(CloseReason::Cancelled);
            };

            self.stats.set_state(IngestState::Reading);
            match current.read_line() {
                Ok(ReadOutcome::Idle) => continue,
                Ok(ReadOutcome::Closed) => return Ok(CloseReason::EndOfStream),
                Ok(ReadOutcome::Line(line)) => {
                    self.stats.line_read();
                    self.handle_line(&line);
                }
                Err(e) => {
                    // Release the device before trying to reopen it
                    drop(source.take());
                    match self.reopen(device, e, cancel)? {
                        Some(reopened) => source = Some(reopened),
                        None => return Ok(CloseReason::Cancelled),
                    }
                }
            }
        }
    }

    fn handle_line(&mut self, line: &str) {
        match self.process_line(line) {
            Ok(record) => {
                if self.consecutive_storage_failures > 0 {
                    info!(
                        "Storage recovered after {} failed write(s)",
                        self.consecutive_storage_failures
                    );
                    self.consecutive_storage_failures = 0;
                }
                self.stats.record_stored(record.id);
                debug!("Stored record {} for device {}", record.id, record.device_id);
            }
            Err(IngestError::MalformedInput(reason)) => {
                self.stats.line_rejected();
                warn!("Rejected line {:?}: {}", line, reason);
            }
            Err(e) => {
                self.consecutive_storage_failures += 1;
                self.stats.storage_failed(e.to_string());
                if self.consecutive_storage_failures <= LOUD_STORAGE_FAILURES {
                    error!(
                        "Dropped reading: {} (failure {})",
                        e, self.consecutive_storage_failures
                    );
                } else if self.consecutive_storage_failures == LOUD_STORAGE_FAILURES + 1 {
                    error!(
                        "Storage failed {} times in a row, further failures are logged at debug",
                        self.consecutive_storage_failures
                    );
                } else {
                    debug!("Dropped reading: {}", e);
                }
            }
        }
    }

    /// Parse and persist one line.
    fn process_line(&self, line: &str) -> Result<SensorRecord> {
        self.stats.set_state(IngestState::Parsing);
        let reading = parse_line(line)?;

        self.stats.set_state(IngestState::Persisting);
        let store = self.store.blocking_lock();
        let record = store.insert(&reading)?;
        Ok(record)
    }

    /// Reopen the device after a read failure.
    ///
    /// Returns `Ok(None)` when cancelled while waiting.
    fn reopen(
        &mut self,
        device: &str,
        cause: io::Error,
        cancel: &CancellationToken,
    ) -> Result<Option<C::Source>> {
        self.stats.set_last_error(cause.to_string());
        if !self.reconnect.enabled() {
            return Err(IngestError::DeviceIo {
                device: device.to_string(),
                source: cause,
            });
        }

        warn!("I/O error on {}: {}, reconnecting", device, cause);
        let mut last_error = cause;
        let attempts = self.reconnect.max_attempts;

        for attempt in 0..attempts {
            self.stats.set_state(IngestState::Connecting);
            let delay = self.reconnect.delay_for_attempt(attempt);
            if !sleep_unless_cancelled(delay, cancel) {
                info!("Reconnection to {} cancelled", device);
                return Ok(None);
            }

            match self.connector.connect() {
                Ok(source) => {
                    self.stats.reconnected();
                    info!("Reconnected to {} (attempt {}/{})", device, attempt + 1, attempts);
                    return Ok(Some(source));
                }
                Err(e) => {
                    warn!(
                        "Reconnect to {} failed: {} (attempt {}/{})",
                        device,
                        e,
                        attempt + 1,
                        attempts
                    );
                    self.stats.set_last_error(e.to_string());
                    last_error = e;
                }
            }
        }

        Err(IngestError::DeviceIo {
            device: device.to_string(),
            source: last_error,
        })
    }
}

impl<C: Connector + 'static> IngestLoop<C> {
    /// Run the loop on a dedicated thread.
    pub fn spawn(self, cancel: CancellationToken) -> io::Result<IngestHandle> {
        let stats = self.stats();
        let token = cancel.clone();
        let thread = std::thread::Builder::new()
            .name("dtk-ingest".to_string())
            .spawn(move || self.run(&token))?;
        Ok(IngestHandle {
            cancel,
            stats,
            thread,
        })
    }
}

/// Sleep for `delay`, waking early on cancellation.
///
/// Returns `false` if cancelled.
fn sleep_unless_cancelled(delay: Duration, cancel: &CancellationToken) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(CANCEL_POLL));
    }
}

/// Handle to a spawned ingestion thread.
pub struct IngestHandle {
    cancel: CancellationToken,
    stats: Arc<IngestStats>,
    thread: JoinHandle<Result<CloseReason>>,
}

impl IngestHandle {
    /// Ask the loop to stop after the current line.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that cancels this loop.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        Arc::clone(&self.stats)
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Block until the loop exits.
    pub fn join(self) -> Result<CloseReason> {
        self.thread.join().map_err(|_| IngestError::Panicked)?
    }

    /// Cancel and wait for the loop to exit.
    pub fn shutdown(self) -> Result<CloseReason> {
        self.cancel();
        self.join()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockConnector, MockEnd, MockEvent};
    use crate::state::shared_store;
    use dtk_store::Store;
    use std::collections::VecDeque;
    use std::path::Path;
    use tempfile::TempDir;

    fn memory_store() -> SharedStore {
        shared_store(Store::open_in_memory().unwrap())
    }

    fn file_store(dir: &TempDir) -> SharedStore {
        shared_store(Store::open(dir.path().join("sensor_data.db")).unwrap())
    }

    /// Drop the record table behind the store's back.
    fn drop_records_table(path: &Path) {
        let conn = rusqlite::Connection::open(path).unwrap();
        conn.execute_batch("DROP TABLE sensor_data").unwrap();
    }

    /// One step of a scripted session.
    enum Step {
        Line(&'static str),
        /// Runs between lines, then reads as a timeout.
        Run(Box<dyn FnOnce() + Send>),
    }

    struct ScriptedSource(VecDeque<Step>);

    impl LineSource for ScriptedSource {
        fn read_line(&mut self) -> io::Result<ReadOutcome> {
            match self.0.pop_front() {
                Some(Step::Line(line)) => Ok(ReadOutcome::Line(line.to_string())),
                Some(Step::Run(action)) => {
                    action();
                    Ok(ReadOutcome::Idle)
                }
                None => Ok(ReadOutcome::Closed),
            }
        }
    }

    /// Connects once to a session that can act on the store between lines.
    struct ScriptedConnector(Option<ScriptedSource>);

    impl ScriptedConnector {
        fn new(steps: Vec<Step>) -> Self {
            Self(Some(ScriptedSource(steps.into())))
        }
    }

    impl Connector for ScriptedConnector {
        type Source = ScriptedSource;

        fn connect(&mut self) -> io::Result<ScriptedSource> {
            self.0
                .take()
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    fn fast_reconnect(attempts: u32) -> ReconnectOptions {
        ReconnectOptions::new()
            .max_attempts(attempts)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(5))
    }

    #[test]
    fn test_valid_lines_are_stored_in_order() {
        let store = memory_store();
        let connector = MockConnector::new().lines([
            "Reading: 18 55.2 21.3 1200",
            "Reading: 18 56.0 21.4 1210",
            "Reading: 7 40 19.5 800",
        ]);

        let ingest = IngestLoop::new(connector, store.clone());
        let stats = ingest.stats();
        let reason = ingest.run(&CancellationToken::new()).unwrap();
        assert_eq!(reason, CloseReason::EndOfStream);

        let all = store.blocking_lock().query_all().unwrap();
        assert_eq!(all.len(), 3);
        // query_all is newest first
        assert_eq!(all[2].humidity, 55.2);
        assert_eq!(all[1].humidity, 56.0);
        assert_eq!(all[0].device_id, 7);
        assert!(all[0].id > all[1].id && all[1].id > all[2].id);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.state, IngestState::Closed);
        assert_eq!(snapshot.lines_read, 3);
        assert_eq!(snapshot.stored, 3);
        assert_eq!(snapshot.last_record_id, Some(all[0].id));
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let store = memory_store();
        let connector = MockConnector::new().lines([
            "garbage",
            "Reading: 18 55.2",
            "Reading: 18 55.2 abc 1200",
            "Reading: x 1 2 3",
            "",
            "Reading: 18 55.2 21.3 1200",
        ]);

        let ingest = IngestLoop::new(connector, store.clone());
        let stats = ingest.stats();
        ingest.run(&CancellationToken::new()).unwrap();

        assert_eq!(store.blocking_lock().count(None).unwrap(), 1);
        assert_eq!(stats.rejected(), 5);
        assert_eq!(stats.stored(), 1);
    }

    #[test]
    fn test_non_finite_measurement_is_rejected_not_a_storage_failure() {
        let store = memory_store();
        let connector = MockConnector::new().lines([
            "Reading: 1 nan 2 3",
            "Reading: 1 2 inf 3",
            "Reading: 1 2 3 4",
        ]);

        let ingest = IngestLoop::new(connector, store.clone());
        let stats = ingest.stats();
        let reason = ingest.run(&CancellationToken::new()).unwrap();
        assert_eq!(reason, CloseReason::EndOfStream);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.rejected, 2);
        assert_eq!(snapshot.storage_failures, 0);
        assert_eq!(snapshot.stored, 1);
        assert_eq!(store.blocking_lock().count(None).unwrap(), 1);
    }

    #[test]
    fn test_write_failures_do_not_stop_ingestion() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sensor_data.db");
        let store = file_store(&dir);

        let recreate = store.clone();
        let mut steps = vec![
            Step::Line("Reading: 5 1 1 1"),
            Step::Run(Box::new(move || drop_records_table(&path))),
        ];
        // Enough failures in a row to go past the error-level logging
        for _ in 0..LOUD_STORAGE_FAILURES + 2 {
            steps.push(Step::Line("Reading: 5 2 2 2"));
        }
        steps.push(Step::Run(Box::new(move || {
            recreate.blocking_lock().initialize().unwrap()
        })));
        steps.push(Step::Line("Reading: 5 3 3 3"));

        let ingest = IngestLoop::new(ScriptedConnector::new(steps), store.clone());
        let stats = ingest.stats();
        let reason = ingest.run(&CancellationToken::new()).unwrap();
        assert_eq!(reason, CloseReason::EndOfStream);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.lines_read, 7);
        assert_eq!(snapshot.stored, 2);
        assert_eq!(snapshot.storage_failures, LOUD_STORAGE_FAILURES as u64 + 2);
        assert_eq!(snapshot.rejected, 0);

        // Only the line written after the table came back is in it
        let all = store.blocking_lock().query_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].humidity, 3.0);
        assert_eq!(snapshot.last_record_id, Some(all[0].id));
    }

    #[test]
    fn test_storage_failure_streak_resets_after_a_write() {
        let dir = TempDir::new().unwrap();
        let store = file_store(&dir);
        let mut ingest = IngestLoop::new(MockConnector::new(), store.clone());

        drop_records_table(&dir.path().join("sensor_data.db"));
        for expected in 1..=LOUD_STORAGE_FAILURES + 2 {
            ingest.handle_line("Reading: 2 1 1 1");
            assert_eq!(ingest.consecutive_storage_failures, expected);
        }
        // Malformed input does not touch the streak
        ingest.handle_line("no delimiter");
        assert_eq!(ingest.consecutive_storage_failures, LOUD_STORAGE_FAILURES + 2);

        store.blocking_lock().initialize().unwrap();
        ingest.handle_line("Reading: 2 1 1 1");
        assert_eq!(ingest.consecutive_storage_failures, 0);
        assert_eq!(ingest.stats().stored(), 1);
        assert!(ingest.stats().snapshot().last_error.is_some());
    }

    #[test]
    fn test_timeouts_are_not_errors() {
        let store = memory_store();
        let connector = MockConnector::new().session([
            MockEvent::Idle,
            MockEvent::Line("Reading: 1 2 3 4".to_string()),
            MockEvent::Idle,
            MockEvent::Idle,
            MockEvent::Line("Reading: 1 5 6 7".to_string()),
        ]);

        let reason = IngestLoop::new(connector, store.clone())
            .run(&CancellationToken::new())
            .unwrap();
        assert_eq!(reason, CloseReason::EndOfStream);
        assert_eq!(store.blocking_lock().count(Some(1)).unwrap(), 2);
    }

    #[test]
    fn test_open_failure() {
        let connector = MockConnector::new().refuse(io::ErrorKind::PermissionDenied);
        let err = IngestLoop::new(connector, memory_store())
            .run(&CancellationToken::new())
            .unwrap_err();
        match err {
            IngestError::DeviceOpen { device, source } => {
                assert_eq!(device, "mock");
                assert_eq!(source.kind(), io::ErrorKind::PermissionDenied);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_io_error_closes_loop_without_reconnect() {
        let store = memory_store();
        let connector = MockConnector::new()
            .session([
                MockEvent::Line("Reading: 3 1 2 3".to_string()),
                MockEvent::Fail(io::ErrorKind::BrokenPipe),
                MockEvent::Line("Reading: 3 9 9 9".to_string()),
            ])
            .lines(["Reading: 3 4 5 6"]);
        let observer = connector.clone();

        let err = IngestLoop::new(connector, store.clone())
            .run(&CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, IngestError::DeviceIo { .. }));
        assert_eq!(observer.connect_count(), 1);
        // The record stored before the failure is kept
        assert_eq!(store.blocking_lock().count(None).unwrap(), 1);
    }

    #[test]
    fn test_reconnect_resumes_ingestion() {
        let store = memory_store();
        let connector = MockConnector::new()
            .session([
                MockEvent::Line("Reading: 3 1 2 3".to_string()),
                MockEvent::Fail(io::ErrorKind::BrokenPipe),
            ])
            .refuse(io::ErrorKind::NotFound)
            .lines(["Reading: 3 4 5 6"]);
        let observer = connector.clone();

        let ingest = IngestLoop::new(connector, store.clone()).with_reconnect(fast_reconnect(3));
        let stats = ingest.stats();
        let reason = ingest.run(&CancellationToken::new()).unwrap();

        assert_eq!(reason, CloseReason::EndOfStream);
        assert_eq!(observer.connect_count(), 3);
        assert_eq!(stats.snapshot().reconnects, 1);
        assert_eq!(store.blocking_lock().count(Some(3)).unwrap(), 2);
    }

    #[test]
    fn test_reconnect_gives_up() {
        let connector = MockConnector::new()
            .session([MockEvent::Fail(io::ErrorKind::BrokenPipe)])
            .refuse(io::ErrorKind::NotFound)
            .refuse(io::ErrorKind::NotFound);
        let observer = connector.clone();

        let err = IngestLoop::new(connector, memory_store())
            .with_reconnect(fast_reconnect(2))
            .run(&CancellationToken::new())
            .unwrap_err();

        match err {
            IngestError::DeviceIo { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::NotFound)
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(observer.connect_count(), 3);
    }

    #[test]
    fn test_cancel_before_first_line() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let store = memory_store();
        let connector = MockConnector::new().lines(["Reading: 1 2 3 4"]);

        let reason = IngestLoop::new(connector, store.clone())
            .run(&cancel)
            .unwrap();
        assert_eq!(reason, CloseReason::Cancelled);
        assert_eq!(store.blocking_lock().count(None).unwrap(), 0);
    }

    #[test]
    fn test_spawned_loop_stops_on_cancel() {
        let store = memory_store();
        let connector = MockConnector::new()
            .lines(["Reading: 5 1 2 3"])
            .end_with(MockEnd::Idle);

        let handle = IngestLoop::new(connector, store.clone())
            .spawn(CancellationToken::new())
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.stats().stored() < 1 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!handle.is_finished());

        let reason = handle.shutdown().unwrap();
        assert_eq!(reason, CloseReason::Cancelled);
        assert_eq!(store.blocking_lock().count(Some(5)).unwrap(), 1);
    }

    #[test]
    fn test_cancel_during_reconnect_backoff() {
        let connector = MockConnector::new().session([MockEvent::Fail(io::ErrorKind::BrokenPipe)]);
        let reconnect = ReconnectOptions::new()
            .max_attempts(5)
            .initial_delay(Duration::from_secs(30))
            .max_delay(Duration::from_secs(30));

        let handle = IngestLoop::new(connector, memory_store())
            .with_reconnect(reconnect)
            .spawn(CancellationToken::new())
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.stats().snapshot().last_error.is_none() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }

        let started = Instant::now();
        let reason = handle.shutdown().unwrap();
        assert_eq!(reason, CloseReason::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_sleep_unless_cancelled() {
        let cancel = CancellationToken::new();
        assert!(sleep_unless_cancelled(Duration::from_millis(1), &cancel));
        cancel.cancel();
        assert!(!sleep_unless_cancelled(Duration::from_secs(60), &cancel));
    }
}
