//! Robots.txt handling module
//!
//! The `PolitenessCache` answers "may this URL be fetched?" per domain. Each
//! domain's robots.txt is fetched once per TTL through a `RobotsSource`, and
//! per-path verdicts are memoized. Any failure to obtain the document allows
//! the URL.

mod cache;
mod parser;

pub use cache::CachedRobots;
pub use parser::ParsedRobots;

use crate::config::PolitenessConfig;
use crate::crawler::FetchError;
use crate::url::{extract_domain, robots_url};
use crate::WardenError;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Where robots.txt documents come from
#[async_trait]
pub trait RobotsSource: Send + Sync {
    /// Returns `Ok(None)` when the site publishes no robots.txt
    async fn fetch(&self, robots_url: &Url) -> Result<Option<String>, WardenError>;
}

/// Fetches robots.txt over HTTP with the crawler's own client
pub struct HttpRobotsSource {
    client: reqwest::Client,
}

impl HttpRobotsSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RobotsSource for HttpRobotsSource {
    async fn fetch(&self, robots_url: &Url) -> Result<Option<String>, WardenError> {
        let response = self.client.get(robots_url.clone()).send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(Some(response.text().await?));
        }

        if status.is_client_error() {
            return Ok(None);
        }

        Err(FetchError::HttpStatus {
            url: robots_url.to_string(),
            status: status.as_u16(),
        }
        .into())
    }
}

/// TTL cache of robots.txt permissions keyed by domain
pub struct PolitenessCache {
    source: Arc<dyn RobotsSource>,
    agent: String,
    ttl: Duration,
    enabled: bool,
    entries: Mutex<HashMap<String, CachedRobots>>,
}

impl PolitenessCache {
    /// `agent` is the product token matched against `User-agent` lines
    pub fn new(
        source: Arc<dyn RobotsSource>,
        config: &PolitenessConfig,
        agent: impl Into<String>,
    ) -> Self {
        Self {
            source,
            agent: agent.into(),
            ttl: config.cache_ttl(),
            enabled: config.respect_robots_txt,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `url` may be fetched
    pub async fn allowed(&self, url: &Url) -> bool {
        if !self.enabled {
            return true;
        }
        let Some(domain) = extract_domain(url) else {
            return true;
        };
        let key = verdict_key(url);
        let now = Utc::now();

        {
            let mut entries = self.entries.lock();
            if let Some(entry) = entries.get_mut(&domain) {
                if !entry.is_expired(self.ttl, now) {
                    if let Some(allowed) = entry.verdict(&key) {
                        return allowed;
                    }
                    let allowed = entry.robots.is_allowed(url.as_str(), &self.agent);
                    entry.remember(&key, allowed);
                    return allowed;
                }
            }
        }

        let robots = self.load(url).await;
        let allowed = robots.is_allowed(url.as_str(), &self.agent);
        let mut entry = CachedRobots::new(robots, now);
        entry.remember(&key, allowed);
        self.entries.lock().insert(domain, entry);

        tracing::trace!("robots verdict for {}: {}", url, allowed);
        allowed
    }

    async fn load(&self, url: &Url) -> ParsedRobots {
        let Some(location) = robots_url(url) else {
            return ParsedRobots::allow_all();
        };

        match self.source.fetch(&location).await {
            Ok(Some(content)) => ParsedRobots::from_content(&content),
            Ok(None) => ParsedRobots::allow_all(),
            Err(e) => {
                tracing::debug!("robots.txt unavailable at {}: {}", location, e);
                ParsedRobots::allow_all()
            }
        }
    }

    /// `Crawl-delay` the cached document declares for our agent
    pub fn crawl_delay(&self, domain: &str) -> Option<Duration> {
        let entries = self.entries.lock();
        let delay = entries.get(domain)?.robots.crawl_delay(&self.agent)?;
        (delay.is_finite() && delay > 0.0).then(|| Duration::from_secs_f64(delay))
    }

    pub fn cached_domains(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

fn verdict_key(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}
