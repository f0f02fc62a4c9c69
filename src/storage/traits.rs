//! Storage traits and error types

use crate::session::{SessionCheckpoint, SessionHeartbeat};
use crate::storage::{CrawlState, VisitedUrl};
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid timestamp in column {column}: {value}")]
    Timestamp { column: String, value: String },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence backend for sessions
///
/// Methods take `&mut self` for writes; callers share a backend behind a mutex
/// (see `SharedStorage`).
pub trait Storage {
    // ===== Checkpoints =====

    /// Replaces the stored checkpoint for the checkpoint's session
    fn save_checkpoint(&mut self, checkpoint: &SessionCheckpoint) -> StorageResult<()>;

    fn load_checkpoint(&self, session_id: &str) -> StorageResult<Option<SessionCheckpoint>>;

    /// All stored checkpoints, newest first
    fn list_checkpoints(&self) -> StorageResult<Vec<SessionCheckpoint>>;

    /// Deletes every session whose checkpoint predates `cutoff`, along with
    /// its crawl state, heartbeat and visit records; returns the number of
    /// sessions
    fn delete_sessions_before(&mut self, cutoff: DateTime<Utc>) -> StorageResult<usize>;

    // ===== Visited URLs =====

    fn save_visited_url(&mut self, record: &VisitedUrl) -> StorageResult<()>;

    fn visited_urls(&self, session_id: &str) -> StorageResult<Vec<VisitedUrl>>;

    // ===== Crawl State =====

    fn save_crawl_state(&mut self, state: &CrawlState) -> StorageResult<()>;

    fn load_crawl_state(&self, session_id: &str) -> StorageResult<Option<CrawlState>>;

    // ===== Heartbeats =====

    /// Replaces the session's previous heartbeat
    fn save_heartbeat(&mut self, heartbeat: &SessionHeartbeat) -> StorageResult<()>;

    fn load_heartbeat(&self, session_id: &str) -> StorageResult<Option<SessionHeartbeat>>;
}
