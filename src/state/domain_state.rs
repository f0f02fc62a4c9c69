use std::time::{Duration, Instant};

/// Per-domain access timing used by the rate limiter
///
/// `current_delay` is the minimum spacing between two accesses to the domain.
/// It starts at the configured default and is adjusted from observed latencies.
#[derive(Debug, Clone)]
pub struct DomainAccessState {
    /// When the domain was last handed out for a visit
    pub last_access: Option<Instant>,

    /// Current minimum spacing between accesses
    pub current_delay: Duration,

    /// Lower bound imposed by the site itself (robots.txt `Crawl-delay`)
    pub delay_floor: Option<Duration>,

    /// Number of accesses recorded in this session
    pub access_count: u64,
}

impl DomainAccessState {
    pub fn new(initial_delay: Duration) -> Self {
        Self {
            last_access: None,
            current_delay: initial_delay,
            delay_floor: None,
            access_count: 0,
        }
    }

    /// Spacing actually enforced: the adaptive delay, never below the site floor
    pub fn effective_delay(&self) -> Duration {
        match self.delay_floor {
            Some(floor) => self.current_delay.max(floor),
            None => self.current_delay,
        }
    }

    /// True when no access was recorded yet or the spacing has elapsed
    pub fn is_eligible(&self, now: Instant) -> bool {
        self.time_until_eligible(now).is_none()
    }

    /// Remaining wait before the domain becomes eligible, if any
    pub fn time_until_eligible(&self, now: Instant) -> Option<Duration> {
        let last = self.last_access?;
        let elapsed = now.saturating_duration_since(last);
        let delay = self.effective_delay();
        if elapsed < delay {
            Some(delay - elapsed)
        } else {
            None
        }
    }

    pub fn record_access(&mut self, now: Instant) {
        self.last_access = Some(now);
        self.access_count += 1;
    }
}
