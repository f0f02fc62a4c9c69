use serde::Deserialize;
use std::time::Duration;

use crate::crawler::ExtractionRules;

/// Main configuration structure for Crawl-Warden
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub politeness: PolitenessConfig,
    #[serde(default)]
    pub delay: DelayConfig,
    #[serde(default, rename = "circuit-breaker")]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub extraction: ExtractionRules,
    pub output: OutputConfig,
}

/// Frontier admission rules
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Maximum depth to crawl from seed URLs
    #[serde(rename = "max-depth")]
    pub max_depth: u32,

    /// Maximum number of queued URLs per domain
    #[serde(rename = "max-urls-per-domain")]
    pub max_urls_per_domain: u32,

    /// Priority assigned at depth 0; deeper URLs get `base - depth`
    #[serde(rename = "base-priority")]
    pub base_priority: u32,

    /// Domain patterns a URL must match (empty means any)
    #[serde(rename = "allowed-domains")]
    pub allowed_domains: Vec<String>,

    /// Domain patterns that are never crawled
    #[serde(rename = "blocked-domains")]
    pub blocked_domains: Vec<String>,

    /// Regexes matched case-insensitively from the start of the raw URL
    #[serde(rename = "ignore-patterns")]
    pub ignore_patterns: Vec<String>,

    /// Seed URLs enqueued at depth 0
    pub seeds: Vec<String>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_urls_per_domain: 1000,
            base_priority: 10,
            allowed_domains: Vec::new(),
            blocked_domains: Vec::new(),
            ignore_patterns: default_ignore_patterns(),
            seeds: Vec::new(),
        }
    }
}

fn default_ignore_patterns() -> Vec<String> {
    vec![
        r".*\.(pdf|jpg|jpeg|png|gif|ico|css|js|zip|tar|gz)$".to_string(),
        r".*mailto:".to_string(),
        r".*tel:".to_string(),
        r".*#.*".to_string(),
    ]
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Full header value: `Name/Version (+url; email)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            crawler_name: "CrawlWarden".to_string(),
            crawler_version: env!("CARGO_PKG_VERSION").to_string(),
            contact_url: "https://example.com/crawler".to_string(),
            contact_email: "crawler@example.com".to_string(),
        }
    }
}

/// robots.txt handling
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolitenessConfig {
    #[serde(rename = "respect-robots-txt")]
    pub respect_robots_txt: bool,

    /// Seconds a fetched robots.txt stays valid
    #[serde(rename = "robots-cache-ttl")]
    pub robots_cache_ttl: u64,
}

impl PolitenessConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.robots_cache_ttl)
    }
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            respect_robots_txt: true,
            robots_cache_ttl: 3600,
        }
    }
}

/// Per-domain delay controller settings (seconds)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DelayConfig {
    /// Adjust the delay from observed latencies
    pub adaptive: bool,

    #[serde(rename = "default-delay")]
    pub default_delay: f64,

    #[serde(rename = "min-delay")]
    pub min_delay: f64,

    #[serde(rename = "max-delay")]
    pub max_delay: f64,

    #[serde(rename = "high-latency-threshold")]
    pub high_latency_threshold: f64,

    #[serde(rename = "low-latency-threshold")]
    pub low_latency_threshold: f64,

    #[serde(rename = "growth-factor")]
    pub growth_factor: f64,

    #[serde(rename = "shrink-factor")]
    pub shrink_factor: f64,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            adaptive: true,
            default_delay: 1.0,
            min_delay: 0.1,
            max_delay: 10.0,
            high_latency_threshold: 5.0,
            low_latency_threshold: 1.0,
            growth_factor: 1.5,
            shrink_factor: 0.8,
        }
    }
}

/// Per-domain failure isolation
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub threshold: u32,

    /// Seconds an open circuit stays open
    pub timeout: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            timeout: 60,
        }
    }
}

/// End-of-pass retry settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub enabled: bool,

    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Upper bound on a single backoff wait (seconds)
    #[serde(rename = "max-backoff")]
    pub max_backoff: f64,

    /// Upper bound of the uniform jitter added to each wait (seconds)
    #[serde(rename = "max-jitter")]
    pub max_jitter: f64,

    /// Pause between two failed URLs of the same domain (seconds)
    #[serde(rename = "url-pause")]
    pub url_pause: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            max_backoff: 10.0,
            max_jitter: 0.5,
            url_pause: 0.5,
        }
    }
}

/// Worker pool and timeouts
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    #[serde(rename = "max-concurrent-pages")]
    pub max_concurrent_pages: usize,

    #[serde(rename = "navigation-timeout")]
    pub navigation_timeout: f64,

    #[serde(rename = "extraction-timeout")]
    pub extraction_timeout: f64,

    /// Seconds between progress reports
    #[serde(rename = "progress-report-interval")]
    pub progress_report_interval: u64,
}

impl OrchestrationConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.navigation_timeout)
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.extraction_timeout)
    }
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_concurrent_pages: 3,
            navigation_timeout: 30.0,
            extraction_timeout: 15.0,
            progress_report_interval: 5,
        }
    }
}

/// Checkpointing and recovery
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Write checkpoints at all
    pub persistence: bool,

    #[serde(rename = "checkpoint-interval")]
    pub checkpoint_interval: u64,

    /// Checkpoints older than this are expired
    #[serde(rename = "max-session-duration")]
    pub max_session_duration: u64,

    /// Checkpoints older than this restart instead of resuming
    #[serde(rename = "restart-after")]
    pub restart_after: u64,

    /// Default age for session cleanup
    #[serde(rename = "cleanup-age")]
    pub cleanup_age: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            persistence: true,
            checkpoint_interval: 300,
            max_session_duration: 86_400,
            restart_after: 3600,
            cleanup_age: 604_800,
        }
    }
}

/// Health scoring and throttling
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    #[serde(rename = "check-interval")]
    pub check_interval: u64,

    #[serde(rename = "max-memory-mb")]
    pub max_memory_mb: f64,

    /// Active page handles at which the handle sub-score reaches zero
    #[serde(rename = "max-active-pages")]
    pub max_active_pages: usize,

    /// Cumulative circuit-breaker failures at which the failure sub-score reaches zero
    #[serde(rename = "failure-ceiling")]
    pub failure_ceiling: u32,

    /// Shed one slot when the score drops below this
    #[serde(rename = "throttle-below")]
    pub throttle_below: f64,

    /// Restore one slot when the score rises above this
    #[serde(rename = "recover-above")]
    pub recover_above: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: 30,
            max_memory_mb: 512.0,
            max_active_pages: 50,
            failure_ceiling: 20,
            throttle_below: 0.5,
            recover_above: 0.8,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            database_path: "./crawl-warden.db".to_string(),
        }
    }
}
