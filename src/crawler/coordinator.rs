//! Crawl coordinator - bounded-concurrency orchestration
//!
//! The coordinator owns a pool of worker slots. Each slot takes one URL from
//! the frontier and drives it through:
//! - the circuit breaker (fail fast while a domain's circuit is open)
//! - the politeness cache (robots.txt, plus its `Crawl-delay`)
//! - navigation and extraction, each under its own timeout
//! - latency feedback into the adaptive delay
//! - frontier completion and link discovery
//!
//! Pause stops issuing work and lets in-flight slots finish. Cancel also
//! aborts in-flight slots and releases every page handle.

use crate::config::Config;
use crate::crawler::retry::{AttemptOutcome, RetryAttempt, RetryManager};
use crate::crawler::{
    CircuitBreaker, Completion, Extraction, Extractor, FetchError, Fetcher, Frontier,
    HealthInputs, HealthMonitor, QueueItem, RateLimiter,
};
use crate::notify::{NotificationKind, Notifier};
use crate::robots::PolitenessCache;
use crate::session::{FetcherInfo, SessionHeartbeat, SessionManager};
use crate::state::{TaskProgress, TaskStatus};
use crate::storage::{CrawlStatus, SharedStorage};
use crate::url::extract_domain;
use crate::{ConfigError, Result, WardenError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use url::Url;

/// Bounds on how long the loop sleeps while every queued domain is rate limited
const MIN_POLL: Duration = Duration::from_millis(10);
const MAX_POLL: Duration = Duration::from_secs(1);

/// The scheduling subsystems a crawl runs on, each owning its own state
#[derive(Clone)]
pub struct CrawlParts {
    pub frontier: Arc<Frontier>,
    pub rate_limiter: Arc<RateLimiter>,
    pub circuit_breaker: Arc<CircuitBreaker>,
    /// `None` disables robots.txt checks entirely
    pub politeness: Option<Arc<PolitenessCache>>,
}

impl CrawlParts {
    pub fn from_config(
        config: &Config,
        storage: Option<SharedStorage>,
        session_id: impl Into<String>,
        politeness: Option<Arc<PolitenessCache>>,
    ) -> std::result::Result<Self, ConfigError> {
        let rate_limiter = Arc::new(RateLimiter::new(config.delay.clone()));
        let frontier = Frontier::new(&config.crawler, Arc::clone(&rate_limiter), storage, session_id)?;

        Ok(Self {
            frontier: Arc::new(frontier),
            rate_limiter,
            circuit_breaker: Arc::new(CircuitBreaker::new(&config.circuit_breaker)),
            politeness,
        })
    }
}

/// External collaborators of the coordinator
pub struct Collaborators {
    pub fetcher: Arc<dyn Fetcher>,
    pub extractor: Arc<dyn Extractor>,
    pub notifier: Arc<dyn Notifier>,
    /// Checkpointing is skipped when absent
    pub sessions: Option<Arc<SessionManager>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunControl {
    Running,
    Paused,
    Cancelled,
}

/// Summary of a finished (or stopped) task
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub task_id: String,
    pub session_id: String,
    pub success: bool,
    pub status: TaskStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
    pub urls_processed: u64,
    pub urls_successful: u64,
    pub urls_failed: u64,
    pub data_extracted: u64,
    /// Skipped without a network attempt because the domain's circuit was open
    pub urls_circuit_skipped: u64,
    /// Failed URLs that succeeded in the end-of-pass retry
    pub urls_recovered: u64,
    pub failed_urls: Vec<String>,
    pub error_message: Option<String>,
}

enum LoopExit {
    Drained,
    Cancelled,
    Fatal(String),
}

enum SlotOutcome {
    Done,
    Fatal(String),
}

/// Which progress counter a settled URL lands in
enum Tally {
    Success { items: u64 },
    Failure,
    CircuitSkip,
}

pub struct Coordinator {
    config: Config,
    task_id: String,
    parts: CrawlParts,
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn Extractor>,
    notifier: Arc<dyn Notifier>,
    sessions: Option<Arc<SessionManager>>,
    retry: RetryManager,
    health: HealthMonitor,
    progress: Mutex<TaskProgress>,
    control: watch::Sender<RunControl>,
    started_at: Mutex<DateTime<Utc>>,
    /// URLs counted in `urls_skipped` and still awaiting a real attempt
    circuit_skipped: Mutex<HashSet<String>>,
    recovered: AtomicU64,
}

impl Coordinator {
    pub fn new(
        config: Config,
        task_id: impl Into<String>,
        parts: CrawlParts,
        collaborators: Collaborators,
    ) -> Self {
        let task_id = task_id.into();
        let retry = RetryManager::new(
            config.retry.clone(),
            Arc::clone(&parts.circuit_breaker),
            Arc::clone(&parts.rate_limiter),
        );
        let health = HealthMonitor::new(
            config.health.clone(),
            config.orchestration.max_concurrent_pages,
        );
        let (control, _) = watch::channel(RunControl::Running);
        let progress = TaskProgress::new(task_id.clone()).with_session(parts.frontier.session_id());

        Self {
            progress: Mutex::new(progress),
            task_id,
            parts,
            fetcher: collaborators.fetcher,
            extractor: collaborators.extractor,
            notifier: collaborators.notifier,
            sessions: collaborators.sessions,
            retry,
            health,
            control,
            started_at: Mutex::new(Utc::now()),
            circuit_skipped: Mutex::new(HashSet::new()),
            recovered: AtomicU64::new(0),
            config,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn session_id(&self) -> &str {
        self.parts.frontier.session_id()
    }

    pub fn parts(&self) -> &CrawlParts {
        &self.parts
    }

    pub fn progress(&self) -> TaskProgress {
        self.progress.lock().clone()
    }

    /// Carries counters over from a recovered checkpoint
    pub fn restore_progress(&self, progress: TaskProgress) {
        let mut current = self.progress.lock();
        *current = TaskProgress {
            task_id: self.task_id.clone(),
            session_id: self.parts.frontier.session_id().to_string(),
            status: current.status,
            ..progress
        };
    }

    pub fn control(&self) -> RunControl {
        *self.control.borrow()
    }

    /// Stops issuing new work; in-flight pages finish
    pub fn pause(&self) {
        if self.control() == RunControl::Running {
            tracing::info!("pausing task {}", self.task_id);
            self.control.send_replace(RunControl::Paused);
        }
    }

    pub fn resume(&self) {
        if self.control() == RunControl::Paused {
            tracing::info!("resuming task {}", self.task_id);
            self.control.send_replace(RunControl::Running);
        }
    }

    /// Aborts in-flight pages and ends the run
    pub fn cancel(&self) {
        tracing::info!("cancelling task {}", self.task_id);
        self.control.send_replace(RunControl::Cancelled);
    }

    /// Runs the crawl until the frontier drains, the task is cancelled, or a
    /// fatal collaborator error occurs
    pub async fn run(self: &Arc<Self>) -> Result<TaskResult> {
        let start_time = Utc::now();
        *self.started_at.lock() = start_time;

        let seeds = self.parts.frontier.enqueue(&self.config.crawler.seeds, None, 0);
        {
            let mut progress = self.progress.lock();
            progress.status = TaskStatus::Running;
            progress.start_time = start_time;
            progress.urls_queued = self.parts.frontier.accepted_total();
        }
        tracing::info!(
            "starting task {} (session {}): {} seeds, {} queued",
            self.task_id,
            self.session_id(),
            seeds,
            self.parts.frontier.queue_len()
        );
        self.notify(
            NotificationKind::TaskStarted,
            json!({
                "session_id": self.session_id(),
                "queued": self.parts.frontier.queue_len(),
            }),
        );
        self.persist(CrawlStatus::Active, None)?;

        let background = self.spawn_background();

        let mut exit = self.crawl_loop().await;
        if matches!(exit, LoopExit::Drained) && self.config.retry.enabled {
            exit = self.retry_pass().await;
        }

        for handle in background {
            handle.abort();
        }

        self.finish(exit, start_time)
    }

    async fn crawl_loop(self: &Arc<Self>) -> LoopExit {
        let mut control = self.control.subscribe();
        let mut slots: JoinSet<SlotOutcome> = JoinSet::new();
        let max_slots = self.config.orchestration.max_concurrent_pages.max(1);
        let mut paused_reported = false;

        loop {
            let state = *control.borrow_and_update();
            match state {
                RunControl::Cancelled => {
                    self.abort_slots(&mut slots).await;
                    return LoopExit::Cancelled;
                }
                RunControl::Paused => {
                    if slots.is_empty() {
                        if !paused_reported {
                            self.on_paused();
                            paused_reported = true;
                        }
                        if control.changed().await.is_err() {
                            return LoopExit::Cancelled;
                        }
                        continue;
                    }
                }
                RunControl::Running => {
                    if paused_reported {
                        paused_reported = false;
                        self.progress.lock().status = TaskStatus::Running;
                    }
                    let permitted = self.health.permitted_slots().min(max_slots);
                    while slots.len() < permitted {
                        let Some(item) = self.parts.frontier.dequeue() else {
                            break;
                        };
                        let this = Arc::clone(self);
                        slots.spawn(async move { this.process_item(item).await });
                    }
                }
            }

            if slots.is_empty() {
                if self.parts.frontier.queue_len() == 0 {
                    return LoopExit::Drained;
                }
                // everything queued is waiting on its domain's delay
                let wait = self.poll_interval();
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = control.changed() => {}
                }
                continue;
            }

            let refill = (state == RunControl::Running && self.parts.frontier.queue_len() > 0)
                .then(|| self.poll_interval());

            tokio::select! {
                joined = slots.join_next() => match joined {
                    Some(Ok(SlotOutcome::Fatal(reason))) => {
                        tracing::error!("fatal error, stopping crawl: {}", reason);
                        self.abort_slots(&mut slots).await;
                        self.check_health();
                        return LoopExit::Fatal(reason);
                    }
                    Some(Err(e)) if !e.is_cancelled() => {
                        tracing::error!("worker slot panicked: {}", e);
                    }
                    _ => {}
                },
                _ = control.changed() => {}
                _ = sleep_or_never(refill) => {}
            }
        }
    }

    fn poll_interval(&self) -> Duration {
        self.parts
            .frontier
            .next_eligible_in(Instant::now())
            .unwrap_or(MAX_POLL)
            .clamp(MIN_POLL, MAX_POLL)
    }

    async fn abort_slots(&self, slots: &mut JoinSet<SlotOutcome>) {
        slots.abort_all();
        while slots.join_next().await.is_some() {}
        self.fetcher.release_all().await;
    }

    /// One worker slot: drives a dequeued URL to completion
    async fn process_item(&self, item: QueueItem) -> SlotOutcome {
        let domain = item.domain.clone();
        self.progress.lock().current_url = Some(item.url.clone());
        tracing::debug!("processing {} (depth {})", item.url, item.depth);

        // still queued for the retry pass, but not counted as broken
        if self.parts.circuit_breaker.is_open(&domain) {
            tracing::debug!("circuit open for {}, skipping {}", domain, item.url);
            self.circuit_skipped.lock().insert(item.url.clone());
            self.settle(
                &item.url,
                Completion::Failed {
                    error: format!("circuit open for {}", domain),
                },
                Tally::CircuitSkip,
            );
            return SlotOutcome::Done;
        }

        let url = match Url::parse(&item.url) {
            Ok(url) => url,
            Err(e) => {
                self.settle(&item.url, Completion::Failed { error: e.to_string() }, Tally::Failure);
                return SlotOutcome::Done;
            }
        };

        if let Some(politeness) = &self.parts.politeness {
            if !politeness.allowed(&url).await {
                tracing::info!("{} disallowed by robots.txt", item.url);
                self.settle(
                    &item.url,
                    Completion::Denied {
                        reason: "disallowed by robots.txt".to_string(),
                    },
                    Tally::Failure,
                );
                return SlotOutcome::Done;
            }
            if let Some(delay) = politeness.crawl_delay(&domain) {
                self.parts.rate_limiter.set_delay_floor(&domain, delay);
            }
        }

        match self.visit(&url, &domain).await {
            Ok((status_code, extraction)) => {
                self.parts.circuit_breaker.record_success(&domain);
                let items = extraction.item_count() as u64;
                self.settle(
                    &item.url,
                    Completion::Success {
                        status_code: Some(status_code),
                    },
                    Tally::Success { items },
                );

                let added = self.parts.frontier.enqueue(
                    &extraction.links,
                    Some(&item.url),
                    item.depth + 1,
                );
                if added > 0 {
                    tracing::debug!("{} new urls from {}", added, item.url);
                    let accepted = self.parts.frontier.accepted_total();
                    self.progress.lock().urls_queued = accepted;
                }
                SlotOutcome::Done
            }
            Err(e) if e.is_fatal() => {
                self.settle(&item.url, Completion::Failed { error: e.to_string() }, Tally::Failure);
                SlotOutcome::Fatal(e.to_string())
            }
            Err(e) => {
                tracing::debug!("failed {}: {}", item.url, e);
                if self.parts.circuit_breaker.record_failure(&domain) {
                    self.notify(
                        NotificationKind::CircuitOpened,
                        json!({
                            "domain": domain,
                            "failures": self.parts.circuit_breaker.failure_count(&domain),
                        }),
                    );
                }
                self.notify(
                    NotificationKind::UrlFailed,
                    json!({ "url": item.url, "error": e.to_string() }),
                );
                self.settle(&item.url, Completion::Failed { error: e.to_string() }, Tally::Failure);
                SlotOutcome::Done
            }
        }
    }

    /// Navigation, readiness and extraction for one URL; the page handle is
    /// always released
    async fn visit(&self, url: &Url, domain: &str) -> std::result::Result<(u16, Extraction), FetchError> {
        let navigation_timeout = self.config.orchestration.navigation_timeout();
        let extraction_timeout = self.config.orchestration.extraction_timeout();
        let started = Instant::now();

        let page = tokio::time::timeout(navigation_timeout, self.fetcher.navigate(url))
            .await
            .map_err(|_| timeout_error(url, navigation_timeout))??;

        let ready = tokio::time::timeout(navigation_timeout, self.fetcher.wait_ready(&page))
            .await
            .map_err(|_| timeout_error(url, navigation_timeout))
            .and_then(|ready| ready);
        self.parts
            .rate_limiter
            .observe_latency(domain, started.elapsed().as_secs_f64());

        let result = match ready {
            Ok(()) => tokio::time::timeout(
                extraction_timeout,
                self.extractor.extract(&page, &self.config.extraction),
            )
            .await
            .map_err(|_| timeout_error(url, extraction_timeout))
            .and_then(|extracted| extracted),
            Err(e) => Err(e),
        };

        self.fetcher.release(&page).await;
        result.map(|extraction| (page.status_code, extraction))
    }

    /// Completes `url` in the frontier and updates the counters
    fn settle(&self, url: &str, completion: Completion, tally: Tally) {
        let success = completion.is_success();
        if let Err(e) = self.parts.frontier.complete(url, completion) {
            tracing::warn!("failed to record visit of {}: {}", url, e);
        }
        let accepted = self.parts.frontier.accepted_total();

        let payload = {
            let mut progress = self.progress.lock();
            match tally {
                Tally::Success { items } => progress.record_success(items),
                Tally::Failure => progress.record_failure(),
                Tally::CircuitSkip => progress.record_skipped(),
            }
            progress.urls_queued = accepted;
            json!({
                "session_id": progress.session_id,
                "url": url,
                "success": success,
                "processed": progress.urls_processed,
                "queued": progress.urls_queued,
                "completion_percentage": progress.completion_percentage(),
            })
        };
        self.notify(NotificationKind::Progress, payload);
    }

    async fn retry_pass(self: &Arc<Self>) -> LoopExit {
        let failed = self.parts.frontier.failed_urls();
        if failed.is_empty() {
            return LoopExit::Drained;
        }
        tracing::info!("retrying {} failed urls", failed.len());

        let retried = tokio::select! {
            result = self.retry.retry_failed(&failed, self.config.retry.max_retries, &**self) => result,
            _ = wait_for_cancel(self.control.subscribe()) => {
                self.fetcher.release_all().await;
                return LoopExit::Cancelled;
            }
        };

        match retried {
            Ok(results) => {
                let recovered = results.values().filter(|ok| **ok).count();
                tracing::info!("retry pass: {}/{} recovered", recovered, results.len());
                LoopExit::Drained
            }
            Err(WardenError::Fatal(reason)) => LoopExit::Fatal(reason),
            Err(e) => LoopExit::Fatal(e.to_string()),
        }
    }

    /// Holds a retry attempt while the task is paused
    ///
    /// A cancel never returns from here; the retry pass's `select!` drops the
    /// pending attempt and ends the run.
    async fn wait_until_running(&self) {
        let mut control = self.control.subscribe();
        let mut paused_reported = false;
        loop {
            let state = *control.borrow_and_update();
            match state {
                RunControl::Running => break,
                RunControl::Paused if !paused_reported => {
                    self.on_paused();
                    paused_reported = true;
                }
                RunControl::Paused => {}
                RunControl::Cancelled => std::future::pending::<()>().await,
            }
            if control.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        if paused_reported {
            tracing::info!("task {} resumed during retry pass", self.task_id);
            self.progress.lock().status = TaskStatus::Running;
        }
    }

    fn on_paused(&self) {
        self.progress.lock().status = TaskStatus::Paused;
        tracing::info!("task {} paused; in-flight pages finished", self.task_id);
        if let Err(e) = self.persist(CrawlStatus::Paused, None) {
            tracing::warn!("failed to checkpoint paused task: {}", e);
        }
        self.notify(
            NotificationKind::TaskPaused,
            json!({ "queued": self.parts.frontier.queue_len() }),
        );
    }

    fn finish(&self, exit: LoopExit, start_time: DateTime<Utc>) -> Result<TaskResult> {
        let (status, crawl_status, error_message) = match exit {
            LoopExit::Drained => (TaskStatus::Completed, CrawlStatus::Completed, None),
            LoopExit::Cancelled => (TaskStatus::Cancelled, CrawlStatus::Paused, None),
            LoopExit::Fatal(reason) => (TaskStatus::Failed, CrawlStatus::Failed, Some(reason)),
        };

        let progress = {
            let mut progress = self.progress.lock();
            progress.status = status;
            progress.current_url = None;
            progress.urls_queued = self.parts.frontier.accepted_total();
            progress.update_estimate(Utc::now());
            progress.clone()
        };

        if let Err(e) = self.persist(crawl_status, error_message.clone()) {
            tracing::warn!("failed to save final session state: {}", e);
        }

        let end_time = Utc::now();
        let result = TaskResult {
            task_id: self.task_id.clone(),
            session_id: self.session_id().to_string(),
            success: status == TaskStatus::Completed,
            status,
            start_time,
            end_time,
            duration_seconds: (end_time - start_time).num_milliseconds() as f64 / 1000.0,
            urls_processed: progress.urls_processed,
            urls_successful: progress.urls_successful,
            urls_failed: progress.urls_failed,
            data_extracted: progress.data_extracted,
            urls_circuit_skipped: progress.urls_skipped,
            urls_recovered: self.recovered.load(Ordering::Relaxed),
            failed_urls: self.parts.frontier.failed_urls(),
            error_message,
        };

        let kind = match status {
            TaskStatus::Completed => NotificationKind::TaskCompleted,
            TaskStatus::Cancelled => NotificationKind::TaskCancelled,
            _ => NotificationKind::TaskFailed,
        };
        self.notify(
            kind,
            json!({
                "processed": result.urls_processed,
                "successful": result.urls_successful,
                "failed": result.urls_failed,
                "duration_seconds": result.duration_seconds,
                "error": result.error_message,
            }),
        );
        tracing::info!(
            "task {} {}: {} processed ({} ok, {} failed) in {:.1}s",
            self.task_id,
            status,
            result.urls_processed,
            result.urls_successful,
            result.urls_failed,
            result.duration_seconds
        );

        Ok(result)
    }

    /// Writes a checkpoint and the crawl state, if sessions are configured
    fn persist(&self, status: CrawlStatus, error: Option<String>) -> Result<()> {
        let Some(sessions) = &self.sessions else {
            return Ok(());
        };

        let progress = self.progress();
        let crash_reason = (status == CrawlStatus::Failed).then(|| error.clone()).flatten();
        sessions.checkpoint(
            &self.parts,
            &progress,
            FetcherInfo {
                active_handles: self.fetcher.active_handles(),
            },
            crash_reason,
        )?;

        let started_at = *self.started_at.lock();
        let state = self
            .parts
            .frontier
            .crawl_state(&self.task_id, status, error, started_at);
        sessions.save_crawl_state(&state)
    }

    fn notify(&self, kind: NotificationKind, payload: serde_json::Value) {
        self.notifier.notify(kind, &self.task_id, payload);
    }

    fn spawn_background(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let interval = Duration::from_secs(self.config.orchestration.progress_report_interval.max(1));
        let this = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                this.report_progress();
            }
        }));

        if let Some(sessions) = &self.sessions {
            let interval = sessions.checkpoint_interval();
            let this = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    match this.persist(CrawlStatus::Active, None) {
                        Ok(()) => this.notify(
                            NotificationKind::CheckpointSaved,
                            json!({ "session_id": this.session_id() }),
                        ),
                        Err(e) => tracing::warn!("checkpoint failed: {}", e),
                    }
                }
            }));
        }

        let interval = Duration::from_secs(self.health.config().check_interval.max(1));
        let this = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                this.check_health();
            }
        }));

        handles
    }

    fn report_progress(&self) {
        let accepted = self.parts.frontier.accepted_total();
        let progress = {
            let mut progress = self.progress.lock();
            progress.urls_queued = accepted;
            progress.update_estimate(Utc::now());
            progress.clone()
        };

        tracing::info!(
            "progress: {}/{} processed ({:.1}%), {} ok, {} failed, eta {}",
            progress.urls_processed,
            progress.urls_queued,
            progress.completion_percentage(),
            progress.urls_successful,
            progress.urls_failed,
            progress
                .estimated_time_remaining
                .map_or_else(|| "unknown".to_string(), |secs| format!("{:.0}s", secs))
        );
        self.notify(
            NotificationKind::Progress,
            serde_json::to_value(&progress).unwrap_or_default(),
        );
    }

    /// Samples health, adjusts the permitted slot count and records the
    /// session heartbeat
    pub fn check_health(&self) -> crate::crawler::HealthReport {
        let progress = self.progress();
        let memory_mb = crate::crawler::resident_memory_mb();
        let active_handles = self.fetcher.active_handles();
        let report = self.health.evaluate(&HealthInputs {
            memory_mb,
            active_handles,
            circuit_failures: self.parts.circuit_breaker.total_failures(),
            urls_processed: progress.urls_processed,
            urls_successful: progress.urls_successful,
        });

        if let Some(sessions) = &self.sessions {
            let heartbeat =
                SessionHeartbeat::from_progress(&progress, &report, memory_mb, active_handles);
            if let Err(e) = sessions.record_heartbeat(&heartbeat) {
                tracing::warn!("failed to record heartbeat: {}", e);
            }
        }

        if report.is_degraded(self.health.config().throttle_below) {
            tracing::warn!(
                "health degraded: score {:.2}, {} worker slots",
                report.score,
                report.permitted_slots
            );
            self.notify(
                NotificationKind::HealthDegraded,
                serde_json::to_value(&report).unwrap_or_default(),
            );
        } else {
            tracing::debug!("health score {:.2}", report.score);
        }
        report
    }
}

#[async_trait]
impl RetryAttempt for Coordinator {
    async fn attempt(&self, raw: &str) -> AttemptOutcome {
        let url = match Url::parse(raw) {
            Ok(url) => url,
            Err(e) => return AttemptOutcome::Failed(e.to_string()),
        };
        let Some(domain) = extract_domain(&url) else {
            return AttemptOutcome::Failed("url has no host".to_string());
        };

        self.wait_until_running().await;

        match self.visit(&url, &domain).await {
            Ok((status_code, extraction)) => {
                if let Err(e) = self.parts.frontier.complete(
                    raw,
                    Completion::Success {
                        status_code: Some(status_code),
                    },
                ) {
                    tracing::warn!("failed to record visit of {}: {}", raw, e);
                }
                let items = extraction.item_count() as u64;
                if self.circuit_skipped.lock().remove(raw) {
                    self.progress.lock().record_skip_recovered(items);
                } else {
                    self.progress.lock().record_recovered(items);
                }
                self.recovered.fetch_add(1, Ordering::Relaxed);
                AttemptOutcome::Success
            }
            Err(e) if e.is_fatal() => AttemptOutcome::Fatal(e.to_string()),
            Err(e) => {
                if let Err(store_err) = self
                    .parts
                    .frontier
                    .complete(raw, Completion::Failed { error: e.to_string() })
                {
                    tracing::warn!("failed to record visit of {}: {}", raw, store_err);
                }
                if self.circuit_skipped.lock().remove(raw) {
                    self.progress.lock().record_skip_failed();
                }
                AttemptOutcome::Failed(e.to_string())
            }
        }
    }
}

fn timeout_error(url: &Url, limit: Duration) -> FetchError {
    FetchError::Timeout {
        url: url.to_string(),
        seconds: limit.as_secs_f64(),
    }
}

async fn sleep_or_never(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

async fn wait_for_cancel(mut control: watch::Receiver<RunControl>) {
    loop {
        if *control.borrow_and_update() == RunControl::Cancelled {
            return;
        }
        if control.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Failure counts per URL, used by callers that want a summary of a run
pub fn failures_by_domain(failed_urls: &[String]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for raw in failed_urls {
        if let Some(domain) = Url::parse(raw).ok().as_ref().and_then(extract_domain) {
            *counts.entry(domain).or_insert(0) += 1;
        }
    }
    counts
}
