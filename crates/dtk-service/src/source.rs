//! Line-oriented input sources.
//!
//! [`LineSource`] abstracts over the serial port and scripted sources used in
//! tests; [`Connector`] opens (and reopens) a source.

use std::io::{self, BufRead, BufReader, Read};
use std::time::Duration;

use tracing::debug;

/// Upper bound for a line without a newline. A longer run is handed to the
/// parser as-is and the rest of it, up to the next newline, is dropped, so a
/// noisy link cannot grow the buffer without limit.
pub const MAX_LINE_BYTES: usize = 4096;

/// Result of one read attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete line, surrounding whitespace and newline stripped.
    Line(String),
    /// The read timed out without a complete line. Not an error.
    Idle,
    /// The source reached end of stream.
    Closed,
}

/// A blocking source of text lines.
pub trait LineSource: Send {
    /// Block (bounded by the source's timeout) for the next line.
    ///
    /// Timeouts are reported as [`ReadOutcome::Idle`]; any `Err` is a
    /// non-recoverable I/O failure of this source.
    fn read_line(&mut self) -> io::Result<ReadOutcome>;
}

/// Opens a [`LineSource`], once at startup and again on reconnection.
pub trait Connector: Send {
    /// The source type produced.
    type Source: LineSource;

    /// Open the underlying device.
    fn connect(&mut self) -> io::Result<Self::Source>;

    /// Human-readable device name for logs and errors.
    fn describe(&self) -> String;
}

/// Splits any [`Read`] into lines, keeping partial lines across timeouts.
pub struct LineReader<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
    // Set after an overlong flush until the line's newline arrives
    discarding: bool,
}

impl<R: Read> LineReader<R> {
    /// Wrap a reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            pending: Vec::new(),
            discarding: false,
        }
    }

    fn take_line(&mut self) -> ReadOutcome {
        let bytes = std::mem::take(&mut self.pending);
        // Invalid UTF-8 becomes U+FFFD and is rejected by the parser later
        let line = String::from_utf8_lossy(&bytes).trim().to_string();
        ReadOutcome::Line(line)
    }
}

impl<R: Read + Send> LineSource for LineReader<R> {
    fn read_line(&mut self) -> io::Result<ReadOutcome> {
        loop {
            // pending stays below the cap, so reads stop short only at end of stream
            let room = (MAX_LINE_BYTES - self.pending.len()) as u64;
            match (&mut self.reader)
                .take(room)
                .read_until(b'\n', &mut self.pending)
            {
                Ok(0) if self.pending.is_empty() => return Ok(ReadOutcome::Closed),
                Ok(_) if self.pending.ends_with(b"\n") => {
                    if !self.discarding {
                        return Ok(self.take_line());
                    }
                    debug!("Dropped {} trailing bytes of an overlong line", self.pending.len());
                    self.pending.clear();
                    self.discarding = false;
                    continue;
                }
                // End of stream after an unterminated line
                Ok(_) if self.pending.len() < MAX_LINE_BYTES => {
                    if self.discarding {
                        self.pending.clear();
                        return Ok(ReadOutcome::Closed);
                    }
                    return Ok(self.take_line());
                }
                Ok(_) => {}
                Err(e) if is_timeout(&e) => {}
                Err(e) => return Err(e),
            }

            if self.pending.len() < MAX_LINE_BYTES {
                return Ok(ReadOutcome::Idle);
            }
            if self.discarding {
                self.pending.clear();
                continue;
            }
            debug!("Line exceeded {} bytes without newline", MAX_LINE_BYTES);
            self.discarding = true;
            return Ok(self.take_line());
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Line source backed by a serial port.
pub type SerialLineSource = LineReader<Box<dyn serialport::SerialPort>>;

/// Opens a serial device at a fixed baud rate with a bounded read timeout.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    path: String,
    baud_rate: u32,
    timeout: Duration,
}

impl SerialConnector {
    /// Create a connector for the given device.
    pub fn new(path: impl Into<String>, baud_rate: u32, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            timeout,
        }
    }

    /// Create a connector from the `[serial]` configuration section.
    pub fn from_config(config: &crate::config::SerialConfig) -> Self {
        Self::new(&config.path, config.baud_rate, config.read_timeout())
    }
}

impl Connector for SerialConnector {
    type Source = SerialLineSource;

    fn connect(&mut self) -> io::Result<Self::Source> {
        let port = serialport::new(&self.path, self.baud_rate)
            .timeout(self.timeout)
            .flow_control(serialport::FlowControl::None)
            .open()?;
        Ok(LineReader::new(port))
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.path, self.baud_rate)
    }
}

/// Names of serial ports present on this machine.
pub fn available_ports() -> io::Result<Vec<String>> {
    let ports = serialport::available_ports()?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
