//! SQLite-backed memory store.
//!
//! Every operation opens its own connection, so no cursor or transaction is
//! shared between sessions.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;

use orja_core::{Message, PipelineEvent, Role};

use super::{MemoryError, MemoryStore};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp_utc TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    session_id TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, id DESC);

CREATE TABLE IF NOT EXISTS pipeline_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    step_name TEXT NOT NULL,
    input_summary TEXT NOT NULL,
    output_summary TEXT NOT NULL,
    success INTEGER NOT NULL,
    latency_ms REAL,
    timestamp_utc TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_session ON pipeline_events(session_id, id DESC);
";

#[derive(Debug, Clone)]
pub struct SqliteMemoryStore {
    path: PathBuf,
}

impl SqliteMemoryStore {
    /// Open (creating if needed) the database at `path` and its schema.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, MemoryError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| MemoryError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let store = Self { path };
        store.connect()?.execute_batch(SCHEMA)?;
        tracing::debug!(path = %store.path.display(), "Memory store ready");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection, MemoryError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_role(row: &Row<'_>, idx: usize) -> rusqlite::Result<Role> {
    let text: String = row.get(idx)?;
    text.parse::<Role>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

impl MemoryStore for SqliteMemoryStore {
    fn append_message(
        &self,
        role: Role,
        content: &str,
        session_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<i64, MemoryError> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO messages (timestamp_utc, role, content, session_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![timestamp.to_rfc3339(), role.as_str(), content, session_id],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn append_event(&self, event: &PipelineEvent) -> Result<(), MemoryError> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO pipeline_events
                (session_id, step_name, input_summary, output_summary, success, latency_ms, timestamp_utc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                &event.session_id,
                &event.step_name,
                &event.input_summary,
                &event.output_summary,
                event.success,
                event.latency_ms,
                event.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<Message>, MemoryError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp_utc, role, content, session_id
             FROM messages
             WHERE session_id = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![session_id, limit as i64], |row| {
            Ok(Message {
                id: row.get(0)?,
                timestamp: parse_timestamp(row, 1)?,
                role: parse_role(row, 2)?,
                content: row.get(3)?,
                session_id: row.get(4)?,
            })
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn recent_events(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<PipelineEvent>, MemoryError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT session_id, step_name, input_summary, output_summary, success, latency_ms, timestamp_utc
             FROM pipeline_events
             WHERE session_id = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![session_id, limit as i64], |row| {
            Ok(PipelineEvent {
                session_id: row.get(0)?,
                step_name: row.get(1)?,
                input_summary: row.get(2)?,
                output_summary: row.get(3)?,
                success: row.get(4)?,
                latency_ms: row.get(5)?,
                timestamp: parse_timestamp(row, 6)?,
            })
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
