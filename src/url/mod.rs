//! URL handling module for Crawl-Warden
//!
//! Normalization, domain keys, wildcard matching, and the admission filter the
//! frontier applies before a URL is queued.

mod domain;
mod matcher;
mod normalize;

use crate::config::CrawlerConfig;
use crate::ConfigError;
use regex::{RegexSet, RegexSetBuilder};
use std::fmt;
use url::Url;

pub use domain::{extract_domain, extract_host, robots_url};
pub use matcher::{matches_any, matches_wildcard};
pub use normalize::normalize_url;

/// Why a URL was refused admission to the frontier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlRejection {
    /// Unparseable, non-http(s), or hostless
    Malformed(String),
    /// The raw URL matched an ignore pattern
    Ignored,
    /// The host matched a blocked-domain pattern
    Blocked(String),
    /// An allow list is configured and the host is not on it
    NotAllowed(String),
    /// Deeper than the configured maximum
    TooDeep(u32),
    /// The domain already has its quota of queued URLs
    DomainQuota(String),
    /// Already queued, in progress, or visited
    Duplicate,
}

impl fmt::Display for UrlRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(reason) => write!(f, "malformed: {}", reason),
            Self::Ignored => write!(f, "matches ignore pattern"),
            Self::Blocked(host) => write!(f, "blocked domain {}", host),
            Self::NotAllowed(host) => write!(f, "domain {} not in allow list", host),
            Self::TooDeep(depth) => write!(f, "depth {} exceeds maximum", depth),
            Self::DomainQuota(domain) => write!(f, "domain {} queue is full", domain),
            Self::Duplicate => write!(f, "already known"),
        }
    }
}

/// Stateless admission checks: syntax, ignore patterns, allow/block lists
#[derive(Debug, Clone)]
pub struct UrlFilter {
    ignore: RegexSet,
    allowed: Vec<String>,
    blocked: Vec<String>,
}

impl UrlFilter {
    pub fn from_config(config: &CrawlerConfig) -> Result<Self, ConfigError> {
        // patterns match from the start of the URL, like a prefix match
        let anchored = config
            .ignore_patterns
            .iter()
            .map(|pattern| format!("^(?:{})", pattern));
        let ignore = RegexSetBuilder::new(anchored)
            .case_insensitive(true)
            .build()
            .map_err(|e| ConfigError::InvalidPattern(e.to_string()))?;

        Ok(Self {
            ignore,
            allowed: config.allowed_domains.clone(),
            blocked: config.blocked_domains.clone(),
        })
    }

    /// Parses and normalizes `raw`, returning the canonical URL or the reason
    /// it is refused
    ///
    /// Ignore patterns see the raw text, so fragment and `mailto:` rules fire
    /// before normalization can erase them. Each pattern is anchored at the
    /// start of the URL; lead with `.*` to match anywhere.
    pub fn check(&self, raw: &str) -> Result<Url, UrlRejection> {
        if self.ignore.is_match(raw) {
            return Err(UrlRejection::Ignored);
        }

        let url = normalize_url(raw).map_err(|e| UrlRejection::Malformed(e.to_string()))?;
        let host = extract_host(&url)
            .ok_or_else(|| UrlRejection::Malformed("missing host".to_string()))?;

        if matches_any(&self.blocked, &host) {
            return Err(UrlRejection::Blocked(host));
        }

        if !self.allowed.is_empty() && !matches_any(&self.allowed, &host) {
            return Err(UrlRejection::NotAllowed(host));
        }

        Ok(url)
    }
}
