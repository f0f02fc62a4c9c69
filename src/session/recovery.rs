//! Recovery decisions derived from a checkpoint

use crate::config::SessionConfig;
use crate::session::SessionCheckpoint;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Progress above which resuming is not worth it
const SKIP_ABOVE_PERCENT: f64 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    Recoverable,
    Expired,
    /// The checkpoint claims to come from the future
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    Resume,
    Restart,
    Skip,
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Resume => "resume",
            Self::Restart => "restart",
            Self::Skip => "skip",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionRecoveryInfo {
    pub session_id: String,
    pub task_id: String,
    pub checkpoint_time: DateTime<Utc>,
    pub age_seconds: i64,
    pub status: RecoveryStatus,
    pub recovery_possible: bool,
    /// Processed over queued, as a percentage
    pub estimated_progress: f64,
    pub urls_remaining: u64,
    pub strategy: RecoveryStrategy,
    pub crash_reason: Option<String>,
}

pub fn analyze_recovery(
    checkpoint: &SessionCheckpoint,
    config: &SessionConfig,
    now: DateTime<Utc>,
) -> SessionRecoveryInfo {
    let age = checkpoint.age(now);
    let progress = &checkpoint.progress;
    let estimated_progress = if progress.urls_queued == 0 {
        0.0
    } else {
        progress.urls_processed as f64 / progress.urls_queued as f64 * 100.0
    };

    let mut info = SessionRecoveryInfo {
        session_id: checkpoint.session_id.clone(),
        task_id: checkpoint.task_id.clone(),
        checkpoint_time: checkpoint.checkpoint_time,
        age_seconds: age.num_seconds(),
        status: RecoveryStatus::Recoverable,
        recovery_possible: true,
        estimated_progress,
        urls_remaining: progress.urls_queued.saturating_sub(progress.urls_processed),
        strategy: RecoveryStrategy::Resume,
        crash_reason: checkpoint.crash_reason.clone(),
    };

    if age < chrono::Duration::zero() {
        info.status = RecoveryStatus::Unknown;
        info.recovery_possible = false;
        info.strategy = RecoveryStrategy::Restart;
    } else if age > window(config.max_session_duration) {
        info.status = RecoveryStatus::Expired;
        info.recovery_possible = false;
        info.strategy = RecoveryStrategy::Restart;
        info.crash_reason = Some("Session too old to recover".to_string());
    } else if estimated_progress > SKIP_ABOVE_PERCENT {
        info.strategy = RecoveryStrategy::Skip;
    } else if age > window(config.restart_after) {
        info.strategy = RecoveryStrategy::Restart;
    }

    info
}

/// Seconds as a chrono duration, clamped to the range chrono can hold
fn window(seconds: u64) -> chrono::Duration {
    let seconds = i64::try_from(seconds).unwrap_or(i64::MAX).min(i64::MAX / 1000);
    chrono::Duration::seconds(seconds)
}
