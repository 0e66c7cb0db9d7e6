//! ==============================================================================
//! store.rs - append-only reading log on sqlite
//! ==============================================================================
//!
//! purpose:
//!     durable storage for every reading the hub accepts.
//!     rows are only ever inserted; nothing updates or deletes them.
//!
//! concurrency:
//!     the store owns the database path and one global write lock.
//!     each operation opens its own connection and drops it when done,
//!     so there is no long-lived shared handle.
//!     - inserts: serialized by the write lock
//!     - reads:   no application lock (wal readers don't block the writer)
//!     sqlite's busy_timeout bounds any engine-level wait.
//!
//! ordering:
//!     "latest" means max (observed_at, id) per producer. observed_at comes
//!     from the producer clock and can go backwards after a reconnect, so
//!     insertion order never decides which row is latest.
//!
//! relationships:
//!     - used by: ingest.rs (insert), snapshot.rs (queries)
//!     - blocking: callers on the async side go through spawn_blocking
//!
//! ==============================================================================

use crate::domain::{HistoryLimit, Payload, Reading};
use crate::error::StoreError;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, Connection, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS readings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        producer_id TEXT NOT NULL,
        observed_at REAL NOT NULL,
        payload TEXT NOT NULL,
        received_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    );

    CREATE INDEX IF NOT EXISTS idx_readings_producer_time
        ON readings(producer_id, observed_at, id);
"#;

const LATEST_PER_PRODUCER: &str = r#"
    SELECT id, producer_id, observed_at, payload, received_at
    FROM (
        SELECT *, ROW_NUMBER() OVER (
            PARTITION BY producer_id
            ORDER BY observed_at DESC, id DESC
        ) AS rn
        FROM readings
    )
    WHERE rn = 1
    ORDER BY producer_id
"#;

const HISTORY: &str = r#"
    SELECT id, producer_id, observed_at, payload, received_at
    FROM readings
    WHERE producer_id = ?1
    ORDER BY observed_at DESC, id DESC
    LIMIT ?2
"#;

/// sqlite-backed reading log
pub struct ReadingStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ReadingStore {
    /// open (or create) the database at `path` and make sure the schema exists
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        };

        let conn = store.connect()?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            tracing::warn!("[STORE] journal_mode is {}, readers may block inserts", mode);
        }
        conn.execute_batch(SCHEMA)?;

        tracing::info!("[STORE] Opened {}", store.path.display());
        Ok(store)
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // commit only returns once the page is on disk
        conn.pragma_update(None, "synchronous", "FULL")?;
        Ok(conn)
    }

    /// append a reading, returning it with its assigned id and receipt time
    pub fn insert(
        &self,
        producer_id: &str,
        observed_at: f64,
        payload: &Payload,
    ) -> Result<Reading, StoreError> {
        let encoded = serde_json::to_string(payload)?;

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let conn = self.connect()?;

        // stored text keeps microseconds, so truncate before handing it back
        let received_at = Utc::now().trunc_subsecs(6);
        conn.execute(
            "INSERT INTO readings (producer_id, observed_at, payload, received_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![producer_id, observed_at, encoded, format_timestamp(received_at)],
        )?;
        let id = conn.last_insert_rowid();

        tracing::debug!("[STORE] Saved reading {} for {}", id, producer_id);
        Ok(Reading {
            id,
            producer_id: producer_id.to_string(),
            observed_at,
            payload: payload.clone(),
            received_at,
        })
    }

    /// one row per producer ever seen, ordered by producer id
    pub fn latest_per_producer(&self) -> Result<Vec<Reading>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(LATEST_PER_PRODUCER)?;
        let rows = stmt
            .query_map([], StoredRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(StoredRow::into_reading).collect()
    }

    /// newest-first readings for one producer, at most `limit` rows
    pub fn history(
        &self,
        producer_id: &str,
        limit: HistoryLimit,
    ) -> Result<Vec<Reading>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(HISTORY)?;
        let rows = stmt
            .query_map(params![producer_id, limit.get()], StoredRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(StoredRow::into_reading).collect()
    }

    /// total number of stored readings
    pub fn count(&self) -> Result<u64, StoreError> {
        let conn = self.connect()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }
}

/// raw columns, decoded into a Reading outside the rusqlite closure
struct StoredRow {
    id: i64,
    producer_id: String,
    observed_at: f64,
    payload: String,
    received_at: String,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            producer_id: row.get(1)?,
            observed_at: row.get(2)?,
            payload: row.get(3)?,
            received_at: row.get(4)?,
        })
    }

    fn into_reading(self) -> Result<Reading, StoreError> {
        let payload: Payload = serde_json::from_str(&self.payload).map_err(|e| {
            StoreError::Corrupt { id: self.id, reason: format!("payload: {}", e) }
        })?;
        let received_at = DateTime::parse_from_rfc3339(&self.received_at)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| StoreError::Corrupt {
                id: self.id,
                reason: format!("received_at {:?}: {}", self.received_at, e),
            })?;

        Ok(Reading {
            id: self.id,
            producer_id: self.producer_id,
            observed_at: self.observed_at,
            payload,
            received_at,
        })
    }
}

fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}
