//! Per-domain circuit breaker
//!
//! Reaching `threshold` failures opens a domain's circuit for `timeout`. A
//! success decrements the count by one. There is no half-open probe: the
//! first query after the timeout resets the count and closes the circuit.

use crate::config::CircuitBreakerConfig;
use crate::state::CircuitBreakerState;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

const MAX_TIMEOUT_SECS: u64 = 365 * 86_400;

pub struct CircuitBreaker {
    threshold: u32,
    timeout: Duration,
    domains: Mutex<HashMap<String, CircuitBreakerState>>,
}

impl CircuitBreaker {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            threshold: config.threshold.max(1),
            timeout: Duration::seconds(config.timeout.min(MAX_TIMEOUT_SECS) as i64),
            domains: Mutex::new(HashMap::new()),
        }
    }

    /// Counts a failure; returns true if this failure opened the circuit
    pub fn record_failure(&self, domain: &str) -> bool {
        self.record_failure_at(domain, Utc::now())
    }

    pub fn record_failure_at(&self, domain: &str, now: DateTime<Utc>) -> bool {
        let mut domains = self.domains.lock();
        let state = domains.entry(domain.to_string()).or_default();
        let opened = state.record_failure(self.threshold, now);
        if opened {
            tracing::warn!(
                "circuit opened for {} after {} consecutive failures",
                domain,
                state.failure_count
            );
        }
        opened
    }

    /// Decrements the domain's failure count; never closes an open circuit
    pub fn record_success(&self, domain: &str) {
        if let Some(state) = self.domains.lock().get_mut(domain) {
            state.record_success();
        }
    }

    pub fn is_open(&self, domain: &str) -> bool {
        self.is_open_at(domain, Utc::now())
    }

    pub fn is_open_at(&self, domain: &str, now: DateTime<Utc>) -> bool {
        self.domains
            .lock()
            .get_mut(domain)
            .map_or(false, |state| state.check_open(self.timeout, now))
    }

    pub fn failure_count(&self, domain: &str) -> u32 {
        self.domains
            .lock()
            .get(domain)
            .map_or(0, |state| state.failure_count)
    }

    /// Sum of failure counts across every domain, open circuit or not
    ///
    /// Circuits whose timeout has elapsed are reset first.
    pub fn total_failures(&self) -> u32 {
        let now = Utc::now();
        self.domains
            .lock()
            .values_mut()
            .map(|state| {
                state.check_open(self.timeout, now);
                state.failure_count
            })
            .sum()
    }

    pub fn open_domains(&self) -> Vec<String> {
        let now = Utc::now();
        let mut open: Vec<String> = self
            .domains
            .lock()
            .iter_mut()
            .filter_map(|(domain, state)| {
                state
                    .check_open(self.timeout, now)
                    .then(|| domain.clone())
            })
            .collect();
        open.sort();
        open
    }

    pub fn snapshot(&self) -> HashMap<String, CircuitBreakerState> {
        self.domains
            .lock()
            .iter()
            .filter(|(_, state)| state.failure_count > 0 || state.opened_at.is_some())
            .map(|(domain, state)| (domain.clone(), state.clone()))
            .collect()
    }

    pub fn restore(&self, states: &HashMap<String, CircuitBreakerState>) {
        let mut domains = self.domains.lock();
        for (domain, state) in states {
            domains.insert(domain.clone(), state.clone());
        }
    }
}
