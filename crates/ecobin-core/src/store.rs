//! Append-only Telemetry Persistence
//!
//! `TelemetryStore` is the seam the simulation loop writes through and the
//! viewer reads through. Stored readings are never updated or deleted.
//!
//! `SqliteStore` keeps one table whose columns mirror the published payload.
//! File-backed databases run in WAL mode so a reader can poll while the
//! loop appends.

use crate::reading::{Reading, TIMESTAMP_FORMAT};
use chrono::NaiveDateTime;
use rusqlite::{Connection, OpenFlags, Row, params};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

pub const TABLE_NAME: &str = "waste_data";

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS waste_data (
    bin_id TEXT,
    location TEXT,
    timestamp TEXT,
    fill_level REAL,
    temperature REAL,
    humidity REAL,
    relay_status TEXT,
    status TEXT
)";

const INSERT_READING: &str = "INSERT INTO waste_data
    (bin_id, location, timestamp, fill_level, temperature, humidity, relay_status, status)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";

// Ties on the second-resolution timestamp fall back to insertion order
const SELECT_LATEST: &str = "SELECT bin_id, location, timestamp, fill_level, temperature,
    humidity, relay_status, status
    FROM waste_data ORDER BY timestamp DESC, rowid DESC LIMIT ?1";

/// Durable, append-only reading storage
pub trait TelemetryStore: Send + Sync {
    /// Create the reading table if missing. Never touches existing rows.
    fn ensure_schema(&self) -> Result<(), StoreError>;

    /// Durably insert one reading
    fn append(&self, reading: &Reading) -> Result<(), StoreError>;

    /// The `n` most recently appended readings, newest first
    fn latest(&self, n: usize) -> Result<Vec<Reading>, StoreError>;
}

/// Errors that can occur during store operations
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    Open(String),
    Schema(String),
    Write(String),
    Query(String),
    Corrupt(String),
    Poisoned,
    ReadOnly,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open(e) => write!(f, "Failed to open store: {}", e),
            Self::Schema(e) => write!(f, "Failed to prepare schema: {}", e),
            Self::Write(e) => write!(f, "Storage write failed: {}", e),
            Self::Query(e) => write!(f, "Storage query failed: {}", e),
            Self::Corrupt(e) => write!(f, "Stored reading could not be decoded: {}", e),
            Self::Poisoned => write!(f, "Store connection lock poisoned"),
            Self::ReadOnly => write!(f, "Store handle is read-only"),
        }
    }
}

impl std::error::Error for StoreError {}

/// SQLite-backed store
pub struct SqliteStore {
    conn: Mutex<Connection>,
    read_only: bool,
}

impl SqliteStore {
    /// Open (creating if needed) a writable store at `path`
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::Open(e.to_string()))?;
        conn.busy_timeout(busy_timeout)
            .map_err(|e| StoreError::Open(e.to_string()))?;
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
            .map_err(|e| StoreError::Open(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
            read_only: false,
        })
    }

    /// Open an existing store for polling only
    pub fn open_read_only(
        path: impl AsRef<Path>,
        busy_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| StoreError::Open(e.to_string()))?;
        conn.busy_timeout(busy_timeout)
            .map_err(|e| StoreError::Open(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
            read_only: true,
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Open(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
            read_only: false,
        })
    }

    /// Number of stored readings
    pub fn count(&self) -> Result<u64, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.query_row("SELECT COUNT(*) FROM waste_data", [], |row| {
            row.get::<_, i64>(0)
        })
        .map(|n| n as u64)
        .map_err(|e| StoreError::Query(e.to_string()))
    }
}

impl TelemetryStore for SqliteStore {
    fn ensure_schema(&self) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute_batch(CREATE_TABLE)
            .map_err(|e| StoreError::Schema(e.to_string()))
    }

    fn append(&self, reading: &Reading) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            INSERT_READING,
            params![
                reading.bin_id,
                reading.location,
                reading.timestamp_string(),
                reading.fill_level,
                reading.temperature,
                reading.humidity,
                reading.relay_status.as_str(),
                reading.status.label(),
            ],
        )
        .map_err(|e| StoreError::Write(e.to_string()))?;
        Ok(())
    }

    fn latest(&self, n: usize) -> Result<Vec<Reading>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn
            .prepare(SELECT_LATEST)
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let rows = stmt
            .query_map(params![n as i64], raw_row)
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut readings = Vec::with_capacity(n);
        for row in rows {
            let raw = row.map_err(|e| StoreError::Query(e.to_string()))?;
            readings.push(raw.decode()?);
        }
        Ok(readings)
    }
}

/// A row as stored, before label and timestamp parsing
struct RawRow {
    bin_id: String,
    location: String,
    timestamp: String,
    fill_level: f64,
    temperature: f64,
    humidity: f64,
    relay_status: String,
    status: String,
}

fn raw_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        bin_id: row.get(0)?,
        location: row.get(1)?,
        timestamp: row.get(2)?,
        fill_level: row.get(3)?,
        temperature: row.get(4)?,
        humidity: row.get(5)?,
        relay_status: row.get(6)?,
        status: row.get(7)?,
    })
}

impl RawRow {
    fn decode(self) -> Result<Reading, StoreError> {
        let timestamp = NaiveDateTime::parse_from_str(&self.timestamp, TIMESTAMP_FORMAT)
            .map_err(|e| StoreError::Corrupt(format!("timestamp {:?}: {}", self.timestamp, e)))?;
        Ok(Reading {
            bin_id: self.bin_id,
            location: self.location,
            timestamp,
            fill_level: self.fill_level,
            temperature: self.temperature,
            humidity: self.humidity,
            relay_status: self.relay_status.parse().map_err(StoreError::Corrupt)?,
            status: self.status.parse().map_err(StoreError::Corrupt)?,
        })
    }
}
