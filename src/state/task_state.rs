//! Task lifecycle and progress counters
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a crawl task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Initializing,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// No further processing will happen without an explicit resume
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "initializing" => Some(Self::Initializing),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live counters of a running task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub task_id: String,
    /// Frontier session the task runs in; empty until the coordinator binds it
    #[serde(default)]
    pub session_id: String,
    pub status: TaskStatus,
    pub urls_queued: u64,
    pub urls_processed: u64,
    pub urls_successful: u64,
    pub urls_failed: u64,
    /// Processed without a network attempt because the domain's circuit was
    /// open; never counted in `urls_failed`
    #[serde(default)]
    pub urls_skipped: u64,
    pub data_extracted: u64,
    pub current_url: Option<String>,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    /// Seconds, derived from the observed processing rate
    pub estimated_time_remaining: Option<f64>,
}

impl TaskProgress {
    pub fn new(task_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            session_id: String::new(),
            status: TaskStatus::Initializing,
            urls_queued: 0,
            urls_processed: 0,
            urls_successful: 0,
            urls_failed: 0,
            urls_skipped: 0,
            data_extracted: 0,
            current_url: None,
            start_time: now,
            last_update: now,
            estimated_time_remaining: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Processed over queued, as a percentage in `[0, 100]`
    pub fn completion_percentage(&self) -> f64 {
        if self.urls_queued == 0 {
            return 0.0;
        }
        (self.urls_processed as f64 / self.urls_queued as f64 * 100.0).min(100.0)
    }

    pub fn record_success(&mut self, items: u64) {
        self.urls_processed += 1;
        self.urls_successful += 1;
        self.data_extracted += items;
        self.last_update = Utc::now();
    }

    pub fn record_failure(&mut self) {
        self.urls_processed += 1;
        self.urls_failed += 1;
        self.last_update = Utc::now();
    }

    pub fn record_skipped(&mut self) {
        self.urls_processed += 1;
        self.urls_skipped += 1;
        self.last_update = Utc::now();
    }

    /// Turns a URL that previously counted as failed into a success
    pub fn record_recovered(&mut self, items: u64) {
        self.urls_failed = self.urls_failed.saturating_sub(1);
        self.urls_successful += 1;
        self.data_extracted += items;
        self.last_update = Utc::now();
    }

    /// Turns a URL that was skipped behind an open circuit into a success
    pub fn record_skip_recovered(&mut self, items: u64) {
        self.urls_skipped = self.urls_skipped.saturating_sub(1);
        self.urls_successful += 1;
        self.data_extracted += items;
        self.last_update = Utc::now();
    }

    /// A skipped URL that was finally attempted and failed
    pub fn record_skip_failed(&mut self) {
        self.urls_skipped = self.urls_skipped.saturating_sub(1);
        self.urls_failed += 1;
        self.last_update = Utc::now();
    }

    /// Recomputes the remaining-time estimate from the rate so far
    pub fn update_estimate(&mut self, now: DateTime<Utc>) {
        let elapsed = (now - self.start_time).num_milliseconds() as f64 / 1000.0;
        if elapsed <= 0.0 || self.urls_processed == 0 {
            self.estimated_time_remaining = None;
            return;
        }

        let rate = self.urls_processed as f64 / elapsed;
        let remaining = self.urls_queued.saturating_sub(self.urls_processed) as f64;
        self.estimated_time_remaining = Some(remaining / rate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_status_round_trip_names() {
        for status in [
            TaskStatus::Initializing,
            TaskStatus::Running,
            TaskStatus::Paused,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(TaskStatus::from_db_string(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::from_db_string("bogus"), None);
    }

    #[test]
    fn test_terminal() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Paused.is_terminal());
    }

    #[test]
    fn test_completion_percentage() {
        let mut progress = TaskProgress::new("t");
        assert_eq!(progress.completion_percentage(), 0.0);

        progress.urls_queued = 4;
        progress.record_success(2);
        progress.record_failure();
        assert!((progress.completion_percentage() - 50.0).abs() < 1e-9);
        assert_eq!(progress.data_extracted, 2);
    }

    #[test]
    fn test_estimate() {
        let mut progress = TaskProgress::new("t");
        progress.urls_queued = 30;
        progress.urls_processed = 10;

        progress.update_estimate(progress.start_time + Duration::seconds(20));
        let eta = progress.estimated_time_remaining.unwrap();
        assert!((eta - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_recovered_moves_failure_to_success() {
        let mut progress = TaskProgress::new("t");
        progress.record_failure();
        progress.record_recovered(1);

        assert_eq!(progress.urls_processed, 1);
        assert_eq!(progress.urls_failed, 0);
        assert_eq!(progress.urls_successful, 1);
    }

    #[test]
    fn test_skips_are_not_failures() {
        let mut progress = TaskProgress::new("t");
        progress.record_failure();
        progress.record_skipped();
        progress.record_skipped();

        assert_eq!(progress.urls_processed, 3);
        assert_eq!(progress.urls_failed, 1);
        assert_eq!(progress.urls_skipped, 2);

        progress.record_skip_recovered(0);
        assert_eq!(progress.urls_skipped, 1);
        assert_eq!(progress.urls_failed, 1);
        assert_eq!(progress.urls_successful, 1);

        progress.record_skip_failed();
        assert_eq!(progress.urls_skipped, 0);
        assert_eq!(progress.urls_failed, 2);
        assert_eq!(progress.urls_processed, 3);
    }

    #[test]
    fn test_session_id_defaults_for_older_records() {
        let progress = TaskProgress::new("t").with_session("s1");
        assert_eq!(progress.session_id, "s1");

        let mut value = serde_json::to_value(&progress).unwrap();
        let object = value.as_object_mut().unwrap();
        object.remove("session_id");
        object.remove("urls_skipped");
        let decoded: TaskProgress = serde_json::from_value(value).unwrap();

        assert_eq!(decoded.session_id, "");
        assert_eq!(decoded.urls_skipped, 0);
    }
}
