//! Storage module for persisting session data
//!
//! - Session checkpoints (JSON documents keyed by session id)
//! - Per-URL visit records
//! - Crawl state: the URL lists a resumed session rebuilds its frontier from

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// A storage backend shared between the coordinator, frontier and session manager
pub type SharedStorage = Arc<Mutex<dyn Storage + Send>>;

/// Opens (or creates) the SQLite database at `path`
pub fn open_storage(path: &Path) -> StorageResult<SharedStorage> {
    Ok(Arc::new(Mutex::new(SqliteStorage::new(path)?)))
}

/// Result of one URL visit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitedUrl {
    pub session_id: String,
    pub url: String,
    pub domain: String,
    pub visited_at: DateTime<Utc>,
    pub success: bool,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
    /// How many times the URL was completed in this session
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    Active,
    Paused,
    Completed,
    Failed,
}

impl CrawlStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// URL bookkeeping of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlState {
    pub session_id: String,
    pub task_id: String,
    pub status: CrawlStatus,
    pub max_depth: u32,
    /// Queued plus in-flight URLs
    pub urls_to_visit: Vec<String>,
    pub urls_visited: Vec<String>,
    pub urls_failed: Vec<String>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
