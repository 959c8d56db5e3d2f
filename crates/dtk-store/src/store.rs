//! Main store implementation.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};
use tracing::{debug, info};

use dtk_types::{Reading, SensorRecord, format_captured_at, parse_captured_at};

use crate::error::{Error, Result};
use crate::models::DeviceSummary;
use crate::queries::RecordQuery;
use crate::schema;

/// Number of records in a rolling window when the caller does not say.
pub const DEFAULT_WINDOW: u32 = 15;

/// How long a statement waits on a lock held by another connection.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-based store for sensor records.
///
/// The store is the only owner of record data. It holds no cached rows and no
/// derived state; every query reads the table.
pub struct Store {
    conn: Connection,
    utc_offset: UtcOffset,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        // WAL lets readers in other processes proceed while the ingester writes
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self {
            conn,
            utc_offset: UtcOffset::UTC,
        })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn,
            utc_offset: UtcOffset::UTC,
        })
    }

    /// Offset applied to `captured_at` on insert (UTC unless set).
    ///
    /// The local offset can only be determined reliably while the process is
    /// single-threaded, so callers look it up at startup and hand it in here.
    pub fn with_utc_offset(mut self, offset: UtcOffset) -> Self {
        self.utc_offset = offset;
        self
    }

    /// Ensure the schema exists. Never destroys existing data.
    pub fn initialize(&self) -> Result<()> {
        schema::initialize(&self.conn)
    }

    fn now(&self) -> PrimitiveDateTime {
        let now = OffsetDateTime::now_utc().to_offset(self.utc_offset);
        let now = now.replace_nanosecond(0).unwrap_or(now);
        PrimitiveDateTime::new(now.date(), now.time())
    }
}

type RawRow = (i64, i64, f64, f64, f64, String);

fn raw_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn record_from_raw(raw: RawRow) -> Result<SensorRecord> {
    let (id, device_id, humidity, temperature, ec, captured_at) = raw;
    let captured_at =
        parse_captured_at(&captured_at).map_err(|_| Error::InvalidTimestamp {
            id,
            value: captured_at,
        })?;

    Ok(SensorRecord {
        id,
        device_id,
        humidity,
        temperature,
        ec,
        captured_at,
    })
}

// Record operations
impl Store {
    /// Append one reading, assigning a fresh id and `captured_at = now`.
    ///
    /// A single statement, so the row is either fully stored or absent.
    pub fn insert(&self, reading: &Reading) -> Result<SensorRecord> {
        self.insert_at(reading, self.now())
    }

    /// Append one reading with an explicit capture time.
    pub fn insert_at(
        &self,
        reading: &Reading,
        captured_at: PrimitiveDateTime,
    ) -> Result<SensorRecord> {
        let id: i64 = self.conn.query_row(
            "INSERT INTO sensor_data (device_id, humidity, temperature, ec, captured_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             RETURNING id",
            rusqlite::params![
                reading.device_id,
                reading.humidity,
                reading.temperature,
                reading.ec,
                format_captured_at(captured_at),
            ],
            |row| row.get(0),
        )?;

        debug!("Stored record {} ({})", id, reading);
        Ok(SensorRecord::from_reading(id, reading, captured_at))
    }

    /// Query records with filters.
    pub fn query(&self, query: &RecordQuery) -> Result<Vec<SensorRecord>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params), raw_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(record_from_raw).collect()
    }

    /// The `limit` newest records of a device, ordered oldest to newest.
    ///
    /// Rows are fetched newest-first by id and reversed, so the result can be
    /// plotted left to right without sorting.
    pub fn query_recent(&self, device_id: i64, limit: u32) -> Result<Vec<SensorRecord>> {
        let mut records = self.query(&RecordQuery::new().device(device_id).limit(limit))?;
        records.reverse();
        Ok(records)
    }

    /// Distinct device ids that have at least one stored record, ascending.
    pub fn query_device_ids(&self) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT DISTINCT device_id FROM sensor_data ORDER BY device_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Every record across all devices, newest first.
    pub fn query_all(&self) -> Result<Vec<SensorRecord>> {
        self.query(&RecordQuery::new())
    }

    /// Records stored after `after_id`, oldest first.
    ///
    /// Consumers that remember the last id they saw use this as a feed of
    /// newly persisted records.
    pub fn query_after(&self, after_id: i64, limit: Option<u32>) -> Result<Vec<SensorRecord>> {
        let mut query = RecordQuery::new().after_id(after_id).oldest_first();
        if let Some(limit) = limit {
            query = query.limit(limit);
        }
        self.query(&query)
    }

    /// Count records, optionally for one device.
    pub fn count(&self, device_id: Option<i64>) -> Result<u64> {
        let count: i64 = match device_id {
            Some(id) => self.conn.query_row(
                "SELECT COUNT(*) FROM sensor_data WHERE device_id = ?",
                [id],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM sensor_data", [], |row| row.get(0))?,
        };

        Ok(count as u64)
    }

    /// Id of the newest stored record, if any.
    pub fn latest_id(&self) -> Result<Option<i64>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM sensor_data ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Record count and newest record per device, ascending by device id.
    pub fn device_summaries(&self) -> Result<Vec<DeviceSummary>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT s.device_id, c.n, s.id, s.captured_at
             FROM sensor_data s
             JOIN (SELECT device_id, COUNT(*) AS n, MAX(id) AS last_id
                   FROM sensor_data GROUP BY device_id) c
               ON s.id = c.last_id
             ORDER BY s.device_id",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(device_id, count, last_id, captured_at)| {
                let last_captured_at =
                    parse_captured_at(&captured_at).map_err(|_| Error::InvalidTimestamp {
                        id: last_id,
                        value: captured_at,
                    })?;
                Ok(DeviceSummary {
                    device_id,
                    record_count: count as u64,
                    last_id,
                    last_captured_at,
                })
            })
            .collect()
    }

    /// Delete every record for every device. Irreversible.
    ///
    /// Runs as one immediate transaction: an insert committed before the clear
    /// takes the write lock is removed, one committed after it survives.
    /// Ids keep increasing after a clear.
    pub fn clear_all(&self) -> Result<usize> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let deleted = tx.execute("DELETE FROM sensor_data", [])?;
        tx.commit()?;

        info!("Cleared {} records", deleted);
        Ok(deleted)
    }

    /// Write the full dump (newest first) as CSV with a header row.
    ///
    /// Returns the number of records written.
    pub fn export_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let records = self.query_all()?;
        let mut csv = csv::Writer::from_writer(writer);

        csv.write_record([
            "id",
            "device_id",
            "humidity",
            "temperature",
            "ec",
            "captured_at",
        ])?;
        for record in &records {
            csv.write_record([
                record.id.to_string(),
                record.device_id.to_string(),
                record.humidity.to_string(),
                record.temperature.to_string(),
                record.ec.to_string(),
                record.captured_at_text(),
            ])?;
        }
        csv.flush()?;

        Ok(records.len())
    }
}
