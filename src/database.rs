use rusqlite::{Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, Sender};
use thiserror::Error;

use crate::models::{AiReport, JournalEntry, PerfMetrics};
use crate::store::{JournalStore, PreferenceKey, ProfileStore};

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),
    #[error("Failed to create database directory: {0}")]
    DirectoryError(String),
    #[error("Failed to serialize column: {0}")]
    SerializeError(#[from] serde_json::Error),
    #[error("Journal entry has no id")]
    MissingId,
    #[error("Journal entry {0} not found")]
    NotFound(i64),
}

struct PreferenceWatcher {
    key: PreferenceKey,
    sender: Sender<Option<String>>,
}

pub struct Database {
    conn: Connection,
    watchers: Mutex<Vec<PreferenceWatcher>>,
}

const JOURNAL_COLUMNS: &str = "id, timestamp, journal_text, image_path, ai_report, perf_metrics";

impl Database {
    /// Create a new database connection and initialize the schema
    pub fn new(path: &str) -> Result<Self, DatabaseError> {
        let db_path = PathBuf::from(path);

        // Create parent directory if it doesn't exist
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DatabaseError::DirectoryError(e.to_string()))?;
            }
        }

        let conn = Connection::open(&db_path)?;
        Self::with_connection(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, DatabaseError> {
        let db = Database {
            conn,
            watchers: Mutex::new(Vec::new()),
        };
        db.initialize_schema()?;
        Ok(db)
    }

    /// Initialize the database schema (tables and indexes)
    fn initialize_schema(&self) -> Result<(), DatabaseError> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS journals (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp       INTEGER NOT NULL,
                journal_text    TEXT NOT NULL,
                image_path      TEXT,
                ai_report       TEXT NOT NULL DEFAULT '',
                perf_metrics    TEXT NOT NULL DEFAULT ''
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS preferences (
                key             TEXT PRIMARY KEY,
                value           TEXT NOT NULL
            )",
            [],
        )?;

        // One entry per day
        self.conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_journals_timestamp ON journals(timestamp)",
            [],
        )?;

        Ok(())
    }

    /// Get a reference to the underlying connection
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Helper function to map a row to a JournalEntry
    fn row_to_journal(row: &rusqlite::Row) -> Result<JournalEntry, rusqlite::Error> {
        let report_json: String = row.get(4)?;
        let metrics_json: String = row.get(5)?;
        Ok(JournalEntry {
            id: Some(row.get(0)?),
            timestamp: row.get(1)?,
            journal_text: row.get(2)?,
            image_path: row.get(3)?,
            ai_report: decode_column::<AiReport>("ai_report", &report_json),
            perf_metrics: decode_column::<PerfMetrics>("perf_metrics", &metrics_json),
        })
    }

    fn query_journals(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<JournalEntry>, DatabaseError> {
        let mut stmt = self.conn.prepare(sql)?;
        let journals = stmt
            .query_map(params, Self::row_to_journal)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(journals)
    }

    fn query_journal(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<JournalEntry>, DatabaseError> {
        let mut stmt = self.conn.prepare(sql)?;
        Ok(stmt.query_row(params, Self::row_to_journal).optional()?)
    }

    fn notify_watchers(&self, key: PreferenceKey, value: Option<String>) {
        let mut watchers = self.watchers.lock().unwrap_or_else(|e| e.into_inner());
        // Receivers that were dropped are pruned on the failed send
        watchers.retain(|w| w.key != key || w.sender.send(value.clone()).is_ok());
    }
}

/// Empty or unreadable JSON columns read back as absent
fn decode_column<T: serde::de::DeserializeOwned>(column: &str, json: &str) -> Option<T> {
    if json.is_empty() {
        return None;
    }
    match serde_json::from_str(json) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Ignoring unreadable {} column: {}", column, e);
            None
        }
    }
}

fn encode_column<T: serde::Serialize>(value: Option<&T>) -> Result<String, DatabaseError> {
    match value {
        Some(v) => Ok(serde_json::to_string(v)?),
        None => Ok(String::new()),
    }
}

impl JournalStore for Database {
    fn upsert_journal(&self, entry: &JournalEntry) -> Result<i64, DatabaseError> {
        let report = encode_column(entry.ai_report.as_ref())?;
        let metrics = encode_column(entry.perf_metrics.as_ref())?;

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO journals (timestamp, journal_text, image_path, ai_report, perf_metrics)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(timestamp) DO UPDATE SET
                journal_text = excluded.journal_text,
                image_path = excluded.image_path,
                ai_report = excluded.ai_report,
                perf_metrics = excluded.perf_metrics",
            rusqlite::params![
                entry.timestamp,
                entry.journal_text,
                entry.image_path,
                report,
                metrics
            ],
        )?;
        let id: i64 = tx.query_row(
            "SELECT id FROM journals WHERE timestamp = ?1",
            rusqlite::params![entry.timestamp],
            |row| row.get(0),
        )?;
        tx.commit()?;

        tracing::debug!("Upserted journal {} for day {}", id, entry.timestamp);
        Ok(id)
    }

    fn update_journal(&self, entry: &JournalEntry) -> Result<(), DatabaseError> {
        let id = entry.id.ok_or(DatabaseError::MissingId)?;
        let report = encode_column(entry.ai_report.as_ref())?;
        let metrics = encode_column(entry.perf_metrics.as_ref())?;

        let tx = self.conn.unchecked_transaction()?;
        let updated = tx.execute(
            "UPDATE journals SET timestamp = ?1, journal_text = ?2, image_path = ?3,
             ai_report = ?4, perf_metrics = ?5 WHERE id = ?6",
            rusqlite::params![
                entry.timestamp,
                entry.journal_text,
                entry.image_path,
                report,
                metrics,
                id
            ],
        )?;
        if updated == 0 {
            return Err(DatabaseError::NotFound(id));
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_journal(&self, id: i64) -> Result<(), DatabaseError> {
        let deleted = self.conn.execute("DELETE FROM journals WHERE id = ?1", rusqlite::params![id])?;
        if deleted == 0 {
            return Err(DatabaseError::NotFound(id));
        }
        Ok(())
    }

    fn get_journal(&self, id: i64) -> Result<Option<JournalEntry>, DatabaseError> {
        self.query_journal(
            &format!("SELECT {} FROM journals WHERE id = ?1", JOURNAL_COLUMNS),
            rusqlite::params![id],
        )
    }

    fn get_latest_journal(&self) -> Result<Option<JournalEntry>, DatabaseError> {
        self.query_journal(
            &format!("SELECT {} FROM journals ORDER BY timestamp DESC LIMIT 1", JOURNAL_COLUMNS),
            [],
        )
    }

    fn get_journal_for_day(
        &self,
        start_of_day: i64,
        start_of_next_day: i64,
    ) -> Result<Option<JournalEntry>, DatabaseError> {
        self.query_journal(
            &format!(
                "SELECT {} FROM journals WHERE timestamp >= ?1 AND timestamp < ?2
                 ORDER BY timestamp DESC LIMIT 1",
                JOURNAL_COLUMNS
            ),
            rusqlite::params![start_of_day, start_of_next_day],
        )
    }

    fn get_journals_in_range(&self, start: i64, end: i64) -> Result<Vec<JournalEntry>, DatabaseError> {
        self.query_journals(
            &format!(
                "SELECT {} FROM journals WHERE timestamp >= ?1 AND timestamp <= ?2
                 ORDER BY timestamp DESC",
                JOURNAL_COLUMNS
            ),
            rusqlite::params![start, end],
        )
    }

    fn get_all_journals(&self) -> Result<Vec<JournalEntry>, DatabaseError> {
        self.query_journals(
            &format!("SELECT {} FROM journals ORDER BY timestamp DESC", JOURNAL_COLUMNS),
            [],
        )
    }
}

impl ProfileStore for Database {
    fn get_preference(&self, key: PreferenceKey) -> Result<Option<String>, DatabaseError> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM preferences WHERE key = ?1",
                rusqlite::params![key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_preference(&self, key: PreferenceKey, value: &str) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT INTO preferences (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![key.as_str(), value],
        )?;
        self.notify_watchers(key, Some(value.to_string()));
        Ok(())
    }

    fn watch(&self, key: PreferenceKey) -> Result<Receiver<Option<String>>, DatabaseError> {
        let (sender, receiver) = mpsc::channel();
        let current = self.get_preference(key)?;
        // The receiver is still in scope, so this send cannot fail
        let _ = sender.send(current);
        self.watchers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(PreferenceWatcher { key, sender });
        Ok(receiver)
    }
}
