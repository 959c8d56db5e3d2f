//! Scripted line sources for testing.
//!
//! [`MockConnector`] replays a queue of sessions; each successful
//! [`Connector::connect`] pops the next one. Sessions are lists of
//! [`MockEvent`]s, which lets tests drive the ingestion loop through
//! malformed lines, timeouts, I/O failures and reconnections without a
//! serial device.
//!
//! # Example
//!
//! ```
//! use dtk_service::mock::{MockConnector, MockEvent};
//! use dtk_service::source::{Connector, LineSource, ReadOutcome};
//!
//! let mut connector = MockConnector::new()
//!     .lines(["Reading: 18 55.2 21.3 1200"]);
//! let mut source = connector.connect().unwrap();
//! assert_eq!(
//!     source.read_line().unwrap(),
//!     ReadOutcome::Line("Reading: 18 55.2 21.3 1200".to_string()),
//! );
//! assert_eq!(source.read_line().unwrap(), ReadOutcome::Closed);
//! assert_eq!(connector.connect_count(), 1);
//! ```

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::source::{Connector, LineSource, ReadOutcome};

/// One scripted step of a mock session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    /// Deliver a line.
    Line(String),
    /// Report a read timeout.
    Idle,
    /// Fail the read with an I/O error of this kind.
    Fail(io::ErrorKind),
    /// Report end of stream.
    Closed,
}

/// What a session does once its script is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockEnd {
    /// Report end of stream.
    #[default]
    Closed,
    /// Report timeouts forever, pausing briefly between them.
    Idle,
}

#[derive(Debug, Default)]
struct MockState {
    sessions: VecDeque<Result<Vec<MockEvent>, io::ErrorKind>>,
    connects: u32,
}

/// Connector that hands out scripted sessions.
///
/// Clones share the same script, so a test can keep one clone to inspect
/// [`MockConnector::connect_count`] after moving another into the loop.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
    end: MockEnd,
    idle_pause: Duration,
}

impl MockConnector {
    /// Create a connector with no sessions; connecting fails with `NotFound`.
    pub fn new() -> Self {
        Self {
            idle_pause: Duration::from_millis(1),
            ..Default::default()
        }
    }

    /// Queue a session replaying the given events.
    pub fn session(self, events: impl IntoIterator<Item = MockEvent>) -> Self {
        self.lock()
            .sessions
            .push_back(Ok(events.into_iter().collect()));
        self
    }

    /// Queue a session delivering the given lines.
    pub fn lines<I, S>(self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.session(lines.into_iter().map(|l| MockEvent::Line(l.into())))
    }

    /// Queue a connection attempt that fails.
    pub fn refuse(self, kind: io::ErrorKind) -> Self {
        self.lock().sessions.push_back(Err(kind));
        self
    }

    /// Set what exhausted sessions report.
    pub fn end_with(mut self, end: MockEnd) -> Self {
        self.end = end;
        self
    }

    /// Number of connection attempts so far, successful or not.
    pub fn connect_count(&self) -> u32 {
        self.lock().connects
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Connector for MockConnector {
    type Source = MockLineSource;

    fn connect(&mut self) -> io::Result<Self::Source> {
        let mut state = self.lock();
        state.connects += 1;
        match state.sessions.pop_front() {
            Some(Ok(events)) => Ok(MockLineSource {
                events: events.into(),
                end: self.end,
                idle_pause: self.idle_pause,
            }),
            Some(Err(kind)) => Err(io::Error::new(kind, "mock connection refused")),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                "no mock sessions left",
            )),
        }
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

/// Source replaying one scripted session.
#[derive(Debug)]
pub struct MockLineSource {
    events: VecDeque<MockEvent>,
    end: MockEnd,
    idle_pause: Duration,
}

impl MockLineSource {
    /// Create a standalone source from events.
    pub fn new(events: impl IntoIterator<Item = MockEvent>) -> Self {
        Self {
            events: events.into_iter().collect(),
            end: MockEnd::Closed,
            idle_pause: Duration::from_millis(1),
        }
    }
}

impl LineSource for MockLineSource {
    fn read_line(&mut self) -> io::Result<ReadOutcome> {
        match self.events.pop_front() {
            Some(MockEvent::Line(line)) => Ok(ReadOutcome::Line(line)),
            Some(MockEvent::Idle) => Ok(ReadOutcome::Idle),
            Some(MockEvent::Fail(kind)) => Err(io::Error::new(kind, "mock read failure")),
            Some(MockEvent::Closed) => Ok(ReadOutcome::Closed),
            None => match self.end {
                MockEnd::Closed => Ok(ReadOutcome::Closed),
                MockEnd::Idle => {
                    std::thread::sleep(self.idle_pause);
                    Ok(ReadOutcome::Idle)
                }
            },
        }
    }
}
