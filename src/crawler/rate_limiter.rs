//! Per-domain rate limiting with an adaptive delay
//!
//! A domain is eligible when its current delay has elapsed since the last
//! recorded access. Observed latencies grow or shrink that delay within
//! `[min_delay, max_delay]`.

use crate::config::DelayConfig;
use crate::state::DomainAccessState;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub struct RateLimiter {
    config: DelayConfig,
    domains: Mutex<HashMap<String, DomainAccessState>>,
}

impl RateLimiter {
    pub fn new(config: DelayConfig) -> Self {
        Self {
            config,
            domains: Mutex::new(HashMap::new()),
        }
    }

    fn default_delay(&self) -> Duration {
        Duration::from_secs_f64(self.config.default_delay)
    }

    pub fn eligible(&self, domain: &str) -> bool {
        self.eligible_at(domain, Instant::now())
    }

    pub fn eligible_at(&self, domain: &str, now: Instant) -> bool {
        self.domains
            .lock()
            .get(domain)
            .map_or(true, |state| state.is_eligible(now))
    }

    /// Remaining wait for `domain`; `None` when it is eligible now
    pub fn time_until_eligible(&self, domain: &str, now: Instant) -> Option<Duration> {
        self.domains.lock().get(domain)?.time_until_eligible(now)
    }

    pub fn record_access(&self, domain: &str) {
        self.record_access_at(domain, Instant::now());
    }

    pub fn record_access_at(&self, domain: &str, now: Instant) {
        let initial = self.default_delay();
        self.domains
            .lock()
            .entry(domain.to_string())
            .or_insert_with(|| DomainAccessState::new(initial))
            .record_access(now);
    }

    /// Atomically checks eligibility and records the access when eligible
    pub fn try_acquire_at(&self, domain: &str, now: Instant) -> bool {
        let initial = self.default_delay();
        let mut domains = self.domains.lock();
        let state = domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainAccessState::new(initial));
        if !state.is_eligible(now) {
            return false;
        }
        state.record_access(now);
        true
    }

    /// Feeds one observed page latency (seconds) into the domain's delay
    pub fn observe_latency(&self, domain: &str, latency: f64) {
        if !self.config.adaptive || !latency.is_finite() {
            return;
        }

        let initial = self.default_delay();
        let mut domains = self.domains.lock();
        let state = domains
            .entry(domain.to_string())
            .or_insert_with(|| DomainAccessState::new(initial));
        let current = state.current_delay.as_secs_f64();

        let next = if latency > self.config.high_latency_threshold {
            (current * self.config.growth_factor).min(self.config.max_delay)
        } else if latency < self.config.low_latency_threshold {
            (current * self.config.shrink_factor).max(self.config.min_delay)
        } else {
            return;
        };

        let Ok(delay) = Duration::try_from_secs_f64(next) else {
            return;
        };
        if (next - current).abs() > f64::EPSILON {
            tracing::trace!(
                "adaptive delay for {}: {:.2}s -> {:.2}s (latency {:.2}s)",
                domain,
                current,
                next,
                latency
            );
        }
        state.current_delay = delay;
    }

    /// Raises the domain's spacing floor, e.g. from a robots.txt `Crawl-delay`
    pub fn set_delay_floor(&self, domain: &str, floor: Duration) {
        let initial = self.default_delay();
        let floor = floor.min(Duration::from_secs_f64(self.config.max_delay));
        self.domains
            .lock()
            .entry(domain.to_string())
            .or_insert_with(|| DomainAccessState::new(initial))
            .delay_floor = Some(floor);
    }

    /// Current adaptive delay, or the default for an unseen domain
    pub fn current_delay(&self, domain: &str) -> Duration {
        self.domains
            .lock()
            .get(domain)
            .map_or_else(|| self.default_delay(), |state| state.current_delay)
    }

    pub fn tracked_domains(&self) -> usize {
        self.domains.lock().len()
    }

    /// Current delays in seconds, for checkpoints
    pub fn snapshot(&self) -> HashMap<String, f64> {
        self.domains
            .lock()
            .iter()
            .map(|(domain, state)| (domain.clone(), state.current_delay.as_secs_f64()))
            .collect()
    }

    /// Rehydrates delays from a checkpoint, clamped to the configured bounds
    pub fn restore(&self, delays: &HashMap<String, f64>) {
        let mut domains = self.domains.lock();
        for (domain, seconds) in delays {
            if !seconds.is_finite() {
                continue;
            }
            let seconds = seconds.clamp(self.config.min_delay, self.config.max_delay);
            let delay = Duration::from_secs_f64(seconds);
            domains
                .entry(domain.clone())
                .or_insert_with(|| DomainAccessState::new(delay))
                .current_delay = delay;
        }
    }
}
