use crate::crawler::{CrawlParts, FrontierStatus};
use crate::state::{CircuitBreakerState, TaskProgress};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What the fetch collaborator was holding when the checkpoint was taken
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetcherInfo {
    pub active_handles: usize,
}

/// Point-in-time snapshot of a crawl session
///
/// The frontier is summarized by its sizes only; the URL lists live in the
/// session's `CrawlState`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCheckpoint {
    pub session_id: String,
    pub task_id: String,
    pub checkpoint_time: DateTime<Utc>,
    pub progress: TaskProgress,
    pub frontier: FrontierStatus,
    pub circuit_breakers: HashMap<String, CircuitBreakerState>,
    /// domain -> current delay in seconds
    pub adaptive_delays: HashMap<String, f64>,
    pub fetcher: FetcherInfo,
    /// SHA-256 of the config file the session was started with
    pub config_hash: Option<String>,
    pub crash_reason: Option<String>,
}

impl SessionCheckpoint {
    /// Asks each subsystem for its own summary; the parts are not locked
    /// together, so the snapshot is only approximately consistent
    pub fn capture(parts: &CrawlParts, progress: &TaskProgress, fetcher: FetcherInfo) -> Self {
        Self {
            session_id: parts.frontier.session_id().to_string(),
            task_id: progress.task_id.clone(),
            checkpoint_time: Utc::now(),
            progress: progress.clone(),
            frontier: parts.frontier.status(),
            circuit_breakers: parts.circuit_breaker.snapshot(),
            adaptive_delays: parts.rate_limiter.snapshot(),
            fetcher,
            config_hash: None,
            crash_reason: None,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.checkpoint_time
    }
}
