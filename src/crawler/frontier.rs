//! URL frontier
//!
//! A priority queue of URLs awaiting a visit, plus the in-progress and visited
//! sets. A URL is in at most one of queued, in-progress and visited at any
//! time. Dequeue hands out the highest-priority item whose domain the rate
//! limiter currently allows; ties go to the shallower item, then to the one
//! queued first.

use crate::config::CrawlerConfig;
use crate::crawler::rate_limiter::RateLimiter;
use crate::storage::{CrawlState, CrawlStatus, SharedStorage, StorageResult, VisitedUrl};
use crate::url::{extract_domain, UrlFilter, UrlRejection};
use crate::ConfigError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A URL waiting in (or taken from) the frontier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    /// Normalized URL
    pub url: String,
    pub domain: String,
    pub depth: u32,
    /// Higher is visited sooner
    pub priority: u32,
    pub parent_url: Option<String>,
    pub discovered_at: DateTime<Utc>,
    /// Times the URL was put back after its first admission
    #[serde(default)]
    pub retry_count: u32,
    seq: u64,
}

impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.depth.cmp(&self.depth))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueItem {}

/// How a dequeued URL ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Success { status_code: Option<u16> },
    /// Transient failure; the URL becomes eligible for end-of-pass retry
    Failed { error: String },
    /// Refused by policy (robots.txt); never retried
    Denied { reason: String },
}

impl Completion {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Frontier sizes, as recorded in checkpoints
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierStatus {
    pub queued: usize,
    pub in_progress: usize,
    pub visited: usize,
    pub failed: usize,
    pub domains_accessed: usize,
}

#[derive(Default)]
struct FrontierInner {
    queue: BinaryHeap<QueueItem>,
    /// url -> instances currently in `queue`
    queued: HashMap<String, usize>,
    /// domain -> instances currently in `queue`
    per_domain: HashMap<String, u32>,
    in_progress: HashMap<String, QueueItem>,
    visited: HashSet<String>,
    /// url -> last error, for retry
    failed: HashMap<String, String>,
    domains_accessed: HashSet<String>,
    next_seq: u64,
    accepted_total: u64,
}

impl FrontierInner {
    fn is_known(&self, url: &str) -> bool {
        self.queued.contains_key(url)
            || self.in_progress.contains_key(url)
            || self.visited.contains(url)
    }

    fn push(&mut self, mut item: QueueItem) {
        item.seq = self.next_seq;
        self.next_seq += 1;
        *self.queued.entry(item.url.clone()).or_insert(0) += 1;
        *self.per_domain.entry(item.domain.clone()).or_insert(0) += 1;
        self.queue.push(item);
    }

    /// Bookkeeping for an item that just left `queue`
    fn forget(&mut self, item: &QueueItem) {
        if let Some(count) = self.queued.get_mut(&item.url) {
            *count -= 1;
            if *count == 0 {
                self.queued.remove(&item.url);
            }
        }
        if let Some(count) = self.per_domain.get_mut(&item.domain) {
            *count -= 1;
            if *count == 0 {
                self.per_domain.remove(&item.domain);
            }
        }
    }

    /// Rebuilds the heap from a filtered item list, keeping counters in sync
    fn replace_queue(&mut self, items: Vec<QueueItem>) {
        self.queued.clear();
        self.per_domain.clear();
        for item in &items {
            *self.queued.entry(item.url.clone()).or_insert(0) += 1;
            *self.per_domain.entry(item.domain.clone()).or_insert(0) += 1;
        }
        self.queue = BinaryHeap::from(items);
    }
}

pub struct Frontier {
    session_id: String,
    max_depth: u32,
    max_per_domain: u32,
    base_priority: u32,
    filter: UrlFilter,
    rate_limiter: Arc<RateLimiter>,
    storage: Option<SharedStorage>,
    inner: Mutex<FrontierInner>,
}

impl Frontier {
    pub fn new(
        config: &CrawlerConfig,
        rate_limiter: Arc<RateLimiter>,
        storage: Option<SharedStorage>,
        session_id: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            session_id: session_id.into(),
            max_depth: config.max_depth,
            max_per_domain: config.max_urls_per_domain,
            base_priority: config.base_priority,
            filter: UrlFilter::from_config(config)?,
            rate_limiter,
            storage,
            inner: Mutex::new(FrontierInner::default()),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Priority assigned when no override is given: `base - depth`, floored at 0
    pub fn default_priority(&self, depth: u32) -> u32 {
        self.base_priority.saturating_sub(depth)
    }

    /// Adds `urls` discovered at `depth`; returns how many were accepted
    pub fn enqueue<S: AsRef<str>>(&self, urls: &[S], parent_url: Option<&str>, depth: u32) -> usize {
        self.enqueue_with_priority(urls, parent_url, depth, None)
    }

    /// Like `enqueue`, with an explicit priority for every accepted URL
    pub fn enqueue_with_priority<S: AsRef<str>>(
        &self,
        urls: &[S],
        parent_url: Option<&str>,
        depth: u32,
        priority: Option<u32>,
    ) -> usize {
        let priority = priority.unwrap_or_else(|| self.default_priority(depth));
        let mut inner = self.inner.lock();
        let mut accepted = 0;

        for raw in urls {
            let raw = raw.as_ref();
            match self.admit(&inner, raw, depth) {
                Ok((url, domain)) => {
                    inner.push(QueueItem {
                        url,
                        domain,
                        depth,
                        priority,
                        parent_url: parent_url.map(str::to_string),
                        discovered_at: Utc::now(),
                        retry_count: 0,
                        seq: 0,
                    });
                    inner.accepted_total += 1;
                    accepted += 1;
                }
                Err(reason) => tracing::trace!("rejected {}: {}", raw, reason),
            }
        }

        if accepted > 0 {
            tracing::debug!("queued {} of {} urls at depth {}", accepted, urls.len(), depth);
        }
        accepted
    }

    fn admit(
        &self,
        inner: &FrontierInner,
        raw: &str,
        depth: u32,
    ) -> Result<(String, String), UrlRejection> {
        if depth > self.max_depth {
            return Err(UrlRejection::TooDeep(depth));
        }

        let url = self.filter.check(raw)?;
        let domain = extract_domain(&url)
            .ok_or_else(|| UrlRejection::Malformed("missing host".to_string()))?;
        let url = url.to_string();

        if inner.is_known(&url) {
            return Err(UrlRejection::Duplicate);
        }

        if inner.per_domain.get(&domain).copied().unwrap_or(0) >= self.max_per_domain {
            return Err(UrlRejection::DomainQuota(domain));
        }

        Ok((url, domain))
    }

    /// Re-inserts a URL without the queued-duplicate check
    ///
    /// Used when rebuilding from persisted state. URLs that are in flight or
    /// already visited are still refused; returns whether the URL was queued.
    pub fn requeue(&self, raw: &str, depth: u32, priority: Option<u32>) -> bool {
        let Ok(url) = self.filter.check(raw) else {
            return false;
        };
        let Some(domain) = extract_domain(&url) else {
            return false;
        };
        let url = url.to_string();
        let priority = priority.unwrap_or_else(|| self.default_priority(depth));

        let mut inner = self.inner.lock();
        if inner.in_progress.contains_key(&url) || inner.visited.contains(&url) {
            return false;
        }
        let retry_count = inner
            .queue
            .iter()
            .filter(|item| item.url == url)
            .map(|item| item.retry_count + 1)
            .max()
            .unwrap_or(0);
        inner.push(QueueItem {
            url,
            domain,
            depth,
            priority,
            parent_url: None,
            discovered_at: Utc::now(),
            retry_count,
            seq: 0,
        });
        true
    }

    pub fn dequeue(&self) -> Option<QueueItem> {
        self.dequeue_at(Instant::now())
    }

    /// Takes the best item whose domain is eligible at `now`, recording the
    /// domain access and moving the item to in-progress
    pub fn dequeue_at(&self, now: Instant) -> Option<QueueItem> {
        let mut inner = self.inner.lock();
        let mut skipped = Vec::new();
        let mut blocked_domains: HashSet<String> = HashSet::new();
        let mut chosen = None;

        while let Some(item) = inner.queue.pop() {
            // a stale duplicate of a URL that was already handed out
            if inner.in_progress.contains_key(&item.url) || inner.visited.contains(&item.url) {
                inner.forget(&item);
                continue;
            }

            if blocked_domains.contains(&item.domain)
                || !self.rate_limiter.try_acquire_at(&item.domain, now)
            {
                blocked_domains.insert(item.domain.clone());
                skipped.push(item);
                continue;
            }

            chosen = Some(item);
            break;
        }

        for item in skipped {
            inner.queue.push(item);
        }

        let item = chosen?;
        inner.forget(&item);
        inner.domains_accessed.insert(item.domain.clone());
        inner.in_progress.insert(item.url.clone(), item.clone());
        tracing::trace!("dequeued {} (priority {})", item.url, item.priority);
        Some(item)
    }

    /// Moves a URL from in-progress to visited and persists the visit
    pub fn complete(&self, url: &str, completion: Completion) -> StorageResult<()> {
        let domain = {
            let mut inner = self.inner.lock();
            let domain = match inner.in_progress.remove(url) {
                Some(item) => Some(item.domain),
                None => ::url::Url::parse(url).ok().and_then(|u| extract_domain(&u)),
            };
            inner.visited.insert(url.to_string());

            match &completion {
                Completion::Failed { error } => {
                    inner.failed.insert(url.to_string(), error.clone());
                }
                Completion::Success { .. } | Completion::Denied { .. } => {
                    inner.failed.remove(url);
                }
            }
            domain.unwrap_or_default()
        };

        let Some(storage) = &self.storage else {
            return Ok(());
        };

        let (success, status_code, error_message) = match completion {
            Completion::Success { status_code } => (true, status_code, None),
            Completion::Failed { error } => (false, None, Some(error)),
            Completion::Denied { reason } => (false, None, Some(reason)),
        };
        let record = VisitedUrl {
            session_id: self.session_id.clone(),
            url: url.to_string(),
            domain,
            visited_at: Utc::now(),
            success,
            status_code,
            error_message,
            attempts: 1,
        };
        storage.lock().save_visited_url(&record)
    }

    /// Changes the priority of every queued instance of `url`
    pub fn reprioritize(&self, url: &str, priority: u32) -> bool {
        let mut inner = self.inner.lock();
        if !inner.queued.contains_key(url) {
            return false;
        }

        let mut items = std::mem::take(&mut inner.queue).into_vec();
        for item in items.iter_mut().filter(|item| item.url == url) {
            item.priority = priority;
        }
        inner.queue = BinaryHeap::from(items);
        true
    }

    /// Drops every queued instance of `url`
    pub fn remove(&self, url: &str) -> bool {
        let mut inner = self.inner.lock();
        if !inner.queued.contains_key(url) {
            return false;
        }

        let items: Vec<QueueItem> = std::mem::take(&mut inner.queue)
            .into_iter()
            .filter(|item| item.url != url)
            .collect();
        inner.replace_queue(items);
        true
    }

    /// Collapses duplicate queue entries, keeping the highest-priority one;
    /// returns how many entries were dropped
    pub fn deduplicate(&self) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.queue.len();

        let mut best: HashMap<String, QueueItem> = HashMap::new();
        for item in std::mem::take(&mut inner.queue).into_vec() {
            match best.get(&item.url) {
                Some(existing) if *existing >= item => {}
                _ => {
                    best.insert(item.url.clone(), item);
                }
            }
        }

        inner.replace_queue(best.into_values().collect());
        let removed = before - inner.queue.len();
        if removed > 0 {
            tracing::debug!("removed {} duplicate queue entries", removed);
        }
        removed
    }

    /// URLs queued more than once, with their instance counts
    pub fn duplicates(&self) -> HashMap<String, usize> {
        self.inner
            .lock()
            .queued
            .iter()
            .filter(|(_, count)| **count > 1)
            .map(|(url, count)| (url.clone(), *count))
            .collect()
    }

    /// Empties the queue; returns how many entries were dropped
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let dropped = inner.queue.len();
        inner.replace_queue(Vec::new());
        dropped
    }

    /// Queued items of one domain, best first
    pub fn queue_by_domain(&self, domain: &str) -> Vec<QueueItem> {
        self.sorted_queue(|item| item.domain == domain)
    }

    /// Queued items with at least `min_priority`, best first
    pub fn queue_by_priority(&self, min_priority: u32) -> Vec<QueueItem> {
        self.sorted_queue(|item| item.priority >= min_priority)
    }

    fn sorted_queue(&self, keep: impl Fn(&QueueItem) -> bool) -> Vec<QueueItem> {
        let inner = self.inner.lock();
        let mut items: Vec<QueueItem> = inner.queue.iter().filter(|i| keep(i)).cloned().collect();
        items.sort_by(|a, b| b.cmp(a));
        items
    }

    /// Replaces all queue state from persisted URL lists
    ///
    /// `to_visit` entries that were already visited are skipped; the rest are
    /// queued at depth 1 with the default priority for that depth.
    pub fn rebuild(&self, to_visit: &[String], visited: &[String], failed: &[String]) -> usize {
        {
            let mut inner = self.inner.lock();
            inner.replace_queue(Vec::new());
            inner.in_progress.clear();
            inner.visited = visited.iter().cloned().collect();
            inner.failed = failed
                .iter()
                .map(|url| (url.clone(), "failed before restore".to_string()))
                .collect();
            for url in failed {
                inner.visited.insert(url.clone());
            }
        }

        for url in to_visit {
            self.requeue(url, 1, None);
        }
        self.deduplicate();

        let mut inner = self.inner.lock();
        inner.accepted_total = (inner.queue.len() + inner.visited.len()) as u64;
        inner.queue.len()
    }

    /// Time until some queued item's domain becomes eligible; `None` when the
    /// queue is empty
    pub fn next_eligible_in(&self, now: Instant) -> Option<Duration> {
        let inner = self.inner.lock();
        inner
            .per_domain
            .keys()
            .map(|domain| {
                self.rate_limiter
                    .time_until_eligible(domain, now)
                    .unwrap_or(Duration::ZERO)
            })
            .min()
    }

    pub fn status(&self) -> FrontierStatus {
        let inner = self.inner.lock();
        FrontierStatus {
            queued: inner.queue.len(),
            in_progress: inner.in_progress.len(),
            visited: inner.visited.len(),
            failed: inner.failed.len(),
            domains_accessed: inner.domains_accessed.len(),
        }
    }

    pub fn queue_len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn in_progress_len(&self) -> usize {
        self.inner.lock().in_progress.len()
    }

    pub fn is_visited(&self, url: &str) -> bool {
        self.inner.lock().visited.contains(url)
    }

    /// Total URLs ever accepted into the queue this session
    pub fn accepted_total(&self) -> u64 {
        self.inner.lock().accepted_total
    }

    /// Failed URLs awaiting retry, sorted
    pub fn failed_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.inner.lock().failed.keys().cloned().collect();
        urls.sort();
        urls
    }

    /// Snapshot of the URL lists for persistence
    pub fn crawl_state(
        &self,
        task_id: &str,
        status: CrawlStatus,
        error_message: Option<String>,
        started_at: DateTime<Utc>,
    ) -> CrawlState {
        let inner = self.inner.lock();

        let mut to_visit: Vec<QueueItem> = inner.queue.iter().cloned().collect();
        to_visit.sort_by(|a, b| b.cmp(a));
        let mut urls_to_visit: Vec<String> = inner.in_progress.keys().cloned().collect();
        urls_to_visit.sort();
        urls_to_visit.extend(to_visit.into_iter().map(|item| item.url));

        let mut urls_failed: Vec<String> = inner.failed.keys().cloned().collect();
        urls_failed.sort();
        let mut urls_visited: Vec<String> = inner
            .visited
            .iter()
            .filter(|url| !inner.failed.contains_key(*url))
            .cloned()
            .collect();
        urls_visited.sort();

        CrawlState {
            session_id: self.session_id.clone(),
            task_id: task_id.to_string(),
            status,
            max_depth: self.max_depth,
            urls_to_visit,
            urls_visited,
            urls_failed,
            error_message,
            started_at,
            updated_at: Utc::now(),
        }
    }
}
