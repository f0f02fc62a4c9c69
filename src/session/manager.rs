//! Checkpoint persistence, restore and session housekeeping

use crate::config::SessionConfig;
use crate::crawler::CrawlParts;
use crate::session::recovery::{analyze_recovery, RecoveryStrategy, SessionRecoveryInfo};
use crate::session::{FetcherInfo, SessionCheckpoint, SessionHeartbeat};
use crate::state::TaskProgress;
use crate::storage::{CrawlState, SharedStorage};
use crate::{Result, WardenError};
use chrono::{DateTime, Utc};
use std::time::Duration;

pub struct SessionManager {
    config: SessionConfig,
    storage: SharedStorage,
    config_hash: Option<String>,
}

impl SessionManager {
    pub fn new(config: SessionConfig, storage: SharedStorage) -> Self {
        Self {
            config,
            storage,
            config_hash: None,
        }
    }

    /// Stamps every checkpoint with the hash of the config file in use
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.config.checkpoint_interval.max(1))
    }

    /// Snapshots the session and persists it when persistence is enabled
    pub fn checkpoint(
        &self,
        parts: &CrawlParts,
        progress: &TaskProgress,
        fetcher: FetcherInfo,
        crash_reason: Option<String>,
    ) -> Result<SessionCheckpoint> {
        let mut checkpoint = SessionCheckpoint::capture(parts, progress, fetcher);
        checkpoint.config_hash = self.config_hash.clone();
        checkpoint.crash_reason = crash_reason;

        if self.config.persistence {
            self.storage.lock().save_checkpoint(&checkpoint)?;
            tracing::debug!(
                "checkpoint saved for session {} ({} queued, {} visited)",
                checkpoint.session_id,
                checkpoint.frontier.queued,
                checkpoint.frontier.visited
            );
        }
        Ok(checkpoint)
    }

    pub fn save_crawl_state(&self, state: &CrawlState) -> Result<()> {
        if self.config.persistence {
            self.storage.lock().save_crawl_state(state)?;
        }
        Ok(())
    }

    pub fn record_heartbeat(&self, heartbeat: &SessionHeartbeat) -> Result<()> {
        if self.config.persistence {
            self.storage.lock().save_heartbeat(heartbeat)?;
        }
        Ok(())
    }

    pub fn last_heartbeat(&self, session_id: &str) -> Result<Option<SessionHeartbeat>> {
        Ok(self.storage.lock().load_heartbeat(session_id)?)
    }

    pub fn load_checkpoint(&self, session_id: &str) -> Result<Option<SessionCheckpoint>> {
        Ok(self.storage.lock().load_checkpoint(session_id)?)
    }

    pub fn analyze_recovery(&self, checkpoint: &SessionCheckpoint) -> SessionRecoveryInfo {
        analyze_recovery(checkpoint, &self.config, Utc::now())
    }

    /// Rehydrates circuit and delay state, then rebuilds the frontier from the
    /// session's crawl state; returns the number of URLs queued
    pub fn restore(&self, checkpoint: &SessionCheckpoint, parts: &CrawlParts) -> Result<usize> {
        parts.circuit_breaker.restore(&checkpoint.circuit_breakers);
        parts.rate_limiter.restore(&checkpoint.adaptive_delays);

        let state = self.storage.lock().load_crawl_state(&checkpoint.session_id)?;
        let Some(state) = state else {
            tracing::warn!(
                "no crawl state stored for session {}; frontier left empty",
                checkpoint.session_id
            );
            return Ok(0);
        };

        let queued = parts
            .frontier
            .rebuild(&state.urls_to_visit, &state.urls_visited, &state.urls_failed);
        tracing::info!(
            "restored session {}: {} queued, {} visited, {} failed",
            checkpoint.session_id,
            queued,
            state.urls_visited.len(),
            state.urls_failed.len()
        );
        Ok(queued)
    }

    /// Loads and analyzes a session, restoring it into `parts` when the
    /// strategy is to resume
    pub fn recover_session(
        &self,
        session_id: &str,
        parts: &CrawlParts,
    ) -> Result<(SessionCheckpoint, SessionRecoveryInfo)> {
        let checkpoint = self
            .load_checkpoint(session_id)?
            .ok_or_else(|| WardenError::SessionNotFound(session_id.to_string()))?;
        let info = self.analyze_recovery(&checkpoint);

        tracing::info!(
            "session {}: {:?}, strategy {} ({:.1}% done, {} remaining)",
            session_id,
            info.status,
            info.strategy,
            info.estimated_progress,
            info.urls_remaining
        );

        if info.recovery_possible && info.strategy == RecoveryStrategy::Resume {
            self.restore(&checkpoint, parts)?;
        }
        Ok((checkpoint, info))
    }

    /// Recovery analysis of every stored session that could still be recovered
    pub fn list_recoverable_sessions(&self) -> Result<Vec<SessionRecoveryInfo>> {
        let now = Utc::now();
        let checkpoints = self.storage.lock().list_checkpoints()?;
        Ok(checkpoints
            .iter()
            .map(|checkpoint| analyze_recovery(checkpoint, &self.config, now))
            .filter(|info| info.recovery_possible)
            .collect())
    }

    /// Deletes sessions whose last checkpoint is older than `max_age`
    pub fn cleanup_old_sessions(&self, max_age: Duration) -> Result<usize> {
        self.cleanup_before(cutoff(Utc::now(), max_age))
    }

    fn cleanup_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let removed = self.storage.lock().delete_sessions_before(cutoff)?;
        if removed > 0 {
            tracing::info!("cleaned up {} old sessions", removed);
        }
        Ok(removed)
    }
}

fn cutoff(now: DateTime<Utc>, max_age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(max_age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::{CrawlStatus, SqliteStorage};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn create_test_storage() -> SharedStorage {
        Arc::new(Mutex::new(SqliteStorage::new_in_memory().unwrap()))
    }

    fn create_test_parts(storage: &SharedStorage, session_id: &str) -> CrawlParts {
        CrawlParts::from_config(&Config::default(), Some(storage.clone()), session_id, None)
            .unwrap()
    }

    #[test]
    fn test_checkpoint_round_trips_through_storage() {
        let storage = create_test_storage();
        let parts = create_test_parts(&storage, "s1");
        parts.frontier.enqueue(&["https://a.com/"], None, 0);
        parts.circuit_breaker.record_failure("a.com");
        let manager = SessionManager::new(SessionConfig::default(), storage.clone())
            .with_config_hash("abc");

        let saved = manager
            .checkpoint(&parts, &TaskProgress::new("t1"), FetcherInfo::default(), None)
            .unwrap();
        let loaded = manager.load_checkpoint("s1").unwrap().unwrap();

        assert_eq!(loaded.session_id, "s1");
        assert_eq!(loaded.frontier.queued, 1);
        assert_eq!(loaded.circuit_breakers["a.com"].failure_count, 1);
        assert_eq!(loaded.config_hash.as_deref(), Some("abc"));
        assert_eq!(loaded.checkpoint_time, saved.checkpoint_time);
    }

    #[test]
    fn test_persistence_disabled_writes_nothing() {
        let storage = create_test_storage();
        let parts = create_test_parts(&storage, "s1");
        let manager = SessionManager::new(
            SessionConfig {
                persistence: false,
                ..SessionConfig::default()
            },
            storage,
        );

        manager
            .checkpoint(&parts, &TaskProgress::new("t1"), FetcherInfo::default(), None)
            .unwrap();
        assert!(manager.load_checkpoint("s1").unwrap().is_none());
    }

    #[test]
    fn test_recover_session_restores_state() {
        let storage = create_test_storage();
        let original = create_test_parts(&storage, "s1");
        original.frontier.enqueue(
            &["https://a.com/1", "https://a.com/2", "https://a.com/3"],
            None,
            0,
        );
        let taken = original.frontier.dequeue().unwrap();
        original
            .frontier
            .complete(&taken.url, crate::crawler::Completion::Success { status_code: Some(200) })
            .unwrap();
        original.rate_limiter.observe_latency("a.com", 6.0);
        for _ in 0..2 {
            original.circuit_breaker.record_failure("b.com");
        }

        let manager = SessionManager::new(SessionConfig::default(), storage.clone());
        let mut progress = TaskProgress::new("t1");
        progress.urls_queued = 3;
        progress.urls_processed = 1;
        manager
            .checkpoint(&original, &progress, FetcherInfo::default(), None)
            .unwrap();
        let state = original
            .frontier
            .crawl_state("t1", CrawlStatus::Active, None, Utc::now());
        manager.save_crawl_state(&state).unwrap();

        let resumed = create_test_parts(&storage, "s1");
        let (_, info) = manager.recover_session("s1", &resumed).unwrap();

        assert_eq!(info.strategy, RecoveryStrategy::Resume);
        assert_eq!(resumed.frontier.queue_len(), 2);
        assert!(resumed.frontier.is_visited(&taken.url));
        assert_eq!(resumed.circuit_breaker.failure_count("b.com"), 2);
        assert!((resumed.rate_limiter.current_delay("a.com").as_secs_f64() - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_heartbeat_round_trip() {
        let storage = create_test_storage();
        let manager = SessionManager::new(SessionConfig::default(), storage);
        let mut progress = TaskProgress::new("t1").with_session("s1");
        progress.urls_queued = 8;
        progress.urls_processed = 3;
        let report = crate::crawler::HealthMonitor::new(Default::default(), 2)
            .evaluate(&Default::default());

        let heartbeat = SessionHeartbeat::from_progress(&progress, &report, None, 0);
        manager.record_heartbeat(&heartbeat).unwrap();

        let loaded = manager.last_heartbeat("s1").unwrap().unwrap();
        assert_eq!(loaded.task_id, "t1");
        assert_eq!(loaded.urls_remaining, 5);
        assert!((loaded.health_score - report.score).abs() < 1e-9);
        assert!(manager.last_heartbeat("s2").unwrap().is_none());
    }

    #[test]
    fn test_recover_unknown_session() {
        let storage = create_test_storage();
        let parts = create_test_parts(&storage, "s1");
        let manager = SessionManager::new(SessionConfig::default(), storage);

        let err = manager.recover_session("missing", &parts).unwrap_err();
        assert!(matches!(err, WardenError::SessionNotFound(_)));
    }

    #[test]
    fn test_list_and_cleanup() {
        let storage = create_test_storage();
        let manager = SessionManager::new(SessionConfig::default(), storage.clone());
        for session in ["fresh", "stale"] {
            let parts = create_test_parts(&storage, session);
            manager
                .checkpoint(&parts, &TaskProgress::new("t1"), FetcherInfo::default(), None)
                .unwrap();
        }

        let mut stale = manager.load_checkpoint("stale").unwrap().unwrap();
        stale.checkpoint_time = Utc::now() - chrono::Duration::days(30);
        storage.lock().save_checkpoint(&stale).unwrap();

        let recoverable = manager.list_recoverable_sessions().unwrap();
        assert_eq!(recoverable.len(), 1);
        assert_eq!(recoverable[0].session_id, "fresh");

        let removed = manager
            .cleanup_old_sessions(Duration::from_secs(7 * 86_400))
            .unwrap();
        assert_eq!(removed, 1);
        assert!(manager.load_checkpoint("stale").unwrap().is_none());
        assert!(manager.load_checkpoint("fresh").unwrap().is_some());
    }

    #[test]
    fn test_cutoff_saturates() {
        let now = Utc::now();
        assert_eq!(cutoff(now, Duration::from_secs(u64::MAX)), DateTime::<Utc>::MIN_UTC);
        assert_eq!(cutoff(now, Duration::from_secs(60)), now - chrono::Duration::seconds(60));
    }
}
