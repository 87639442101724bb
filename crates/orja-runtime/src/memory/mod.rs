//! Conversation and audit storage.
//!
//! Both tables are append-only. The single read path for messages is "the
//! most recent N for a session, newest first".

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;

use orja_core::{Message, PipelineEvent, Role};

mod in_memory;
mod sqlite;

pub use in_memory::InMemoryStore;
pub use sqlite::SqliteMemoryStore;

/// Errors from memory stores.
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to prepare database directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Persistent conversation log and pipeline audit trail.
///
/// Implementations must tolerate concurrent calls from several sessions.
pub trait MemoryStore: Send + Sync {
    /// Append a message and return its id.
    fn append_message(
        &self,
        role: Role,
        content: &str,
        session_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<i64, MemoryError>;

    fn append_event(&self, event: &PipelineEvent) -> Result<(), MemoryError>;

    /// Up to `limit` messages of `session_id`, newest first.
    fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<Message>, MemoryError>;

    /// Up to `limit` audit events of `session_id`, newest first.
    fn recent_events(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<PipelineEvent>, MemoryError>;
}
