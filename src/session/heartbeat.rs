use crate::crawler::HealthReport;
use crate::state::{TaskProgress, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Liveness record written on every health check; only the latest one per
/// session is kept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionHeartbeat {
    pub session_id: String,
    pub task_id: String,
    pub status: TaskStatus,
    pub urls_processed: u64,
    pub urls_remaining: u64,
    pub current_url: Option<String>,
    pub memory_usage_mb: Option<f64>,
    pub active_handles: usize,
    pub health_score: f64,
    pub recorded_at: DateTime<Utc>,
}

impl SessionHeartbeat {
    pub fn from_progress(
        progress: &TaskProgress,
        report: &HealthReport,
        memory_usage_mb: Option<f64>,
        active_handles: usize,
    ) -> Self {
        Self {
            session_id: progress.session_id.clone(),
            task_id: progress.task_id.clone(),
            status: progress.status,
            urls_processed: progress.urls_processed,
            urls_remaining: progress.urls_queued.saturating_sub(progress.urls_processed),
            current_url: progress.current_url.clone(),
            memory_usage_mb,
            active_handles,
            health_score: report.score,
            recorded_at: Utc::now(),
        }
    }

    /// Seconds since the heartbeat was written
    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.recorded_at).num_seconds()
    }
}
