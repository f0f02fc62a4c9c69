//! One-way task event notifications
//!
//! Notifiers never block the crawl and never report delivery failures back to
//! the caller.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TaskStarted,
    Progress,
    UrlFailed,
    CircuitOpened,
    TaskPaused,
    TaskCompleted,
    TaskFailed,
    TaskCancelled,
    CheckpointSaved,
    HealthDegraded,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskStarted => "task_started",
            Self::Progress => "progress",
            Self::UrlFailed => "url_failed",
            Self::CircuitOpened => "circuit_opened",
            Self::TaskPaused => "task_paused",
            Self::TaskCompleted => "task_completed",
            Self::TaskFailed => "task_failed",
            Self::TaskCancelled => "task_cancelled",
            Self::CheckpointSaved => "checkpoint_saved",
            Self::HealthDegraded => "health_degraded",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub task_id: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, kind: NotificationKind, task_id: &str, payload: serde_json::Value);
}

/// Forwards notifications into an unbounded channel
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, kind: NotificationKind, task_id: &str, payload: serde_json::Value) {
        let notification = Notification {
            kind,
            task_id: task_id.to_string(),
            payload,
            timestamp: Utc::now(),
        };
        // A dropped receiver just means nobody is listening
        let _ = self.sender.send(notification);
    }
}

/// Writes notifications to the log
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, kind: NotificationKind, task_id: &str, payload: serde_json::Value) {
        match kind {
            NotificationKind::Progress | NotificationKind::CheckpointSaved => {
                tracing::debug!(task_id, event = kind.as_str(), %payload);
            }
            NotificationKind::UrlFailed
            | NotificationKind::CircuitOpened
            | NotificationKind::HealthDegraded
            | NotificationKind::TaskFailed => {
                tracing::warn!(task_id, event = kind.as_str(), %payload);
            }
            _ => tracing::info!(task_id, event = kind.as_str(), %payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_channel_notifier_delivers() {
        let (notifier, mut receiver) = ChannelNotifier::new();
        notifier.notify(NotificationKind::TaskStarted, "task-1", json!({"seeds": 2}));

        let notification = receiver.recv().await.unwrap();
        assert_eq!(notification.kind, NotificationKind::TaskStarted);
        assert_eq!(notification.task_id, "task-1");
        assert_eq!(notification.payload["seeds"], 2);
    }

    #[test]
    fn test_channel_notifier_ignores_closed_receiver() {
        let (notifier, receiver) = ChannelNotifier::new();
        drop(receiver);
        notifier.notify(NotificationKind::Progress, "task-1", json!({}));
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let value = serde_json::to_value(NotificationKind::CircuitOpened).unwrap();
        assert_eq!(value, json!("circuit_opened"));
    }
}
