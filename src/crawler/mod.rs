//! Crawl scheduling and supervision
//!
//! This module contains the core orchestration logic:
//! - The frontier: admission, priorities and per-domain eligibility
//! - Adaptive per-domain delays and circuit breakers
//! - Bounded retries of failed URLs
//! - Health scoring that throttles concurrency
//! - The coordinator that ties them together over the fetch and
//!   extraction collaborators

mod circuit_breaker;
mod coordinator;
mod extractor;
mod fetcher;
mod frontier;
mod health;
mod rate_limiter;
mod retry;

pub use circuit_breaker::CircuitBreaker;
pub use coordinator::{
    failures_by_domain, Collaborators, Coordinator, CrawlParts, RunControl, TaskResult,
};
pub use extractor::{extract_html, Extraction, ExtractionRule, ExtractionRules, Extractor, HtmlExtractor};
pub use fetcher::{build_http_client, FetchError, Fetcher, HttpFetcher, PageHandle};
pub use frontier::{Completion, Frontier, FrontierStatus, QueueItem};
pub use health::{resident_memory_mb, HealthInputs, HealthMonitor, HealthReport};
pub use rate_limiter::RateLimiter;
pub use retry::{AttemptOutcome, RetryAttempt, RetryManager};
