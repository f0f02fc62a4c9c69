//! Per-domain robots.txt cache entries

use crate::robots::ParsedRobots;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// One domain's robots.txt plus the verdicts already computed from it
#[derive(Debug, Clone)]
pub struct CachedRobots {
    pub robots: ParsedRobots,
    pub fetched_at: DateTime<Utc>,
    /// path -> allowed
    verdicts: HashMap<String, bool>,
}

impl CachedRobots {
    pub fn new(robots: ParsedRobots, fetched_at: DateTime<Utc>) -> Self {
        Self {
            robots,
            fetched_at,
            verdicts: HashMap::new(),
        }
    }

    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now - self.fetched_at >= ttl,
            Err(_) => false,
        }
    }

    pub fn verdict(&self, path: &str) -> Option<bool> {
        self.verdicts.get(path).copied()
    }

    pub fn remember(&mut self, path: &str, allowed: bool) {
        self.verdicts.insert(path.to_string(), allowed);
    }

    pub fn verdict_count(&self) -> usize {
        self.verdicts.len()
    }
}
