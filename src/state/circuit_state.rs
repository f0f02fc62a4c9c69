use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Failure bookkeeping for one domain
///
/// The circuit is open while `opened_at` is set and the timeout has not yet
/// elapsed. Reset happens lazily on the first query after the timeout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub failure_count: u32,
    pub opened_at: Option<DateTime<Utc>>,
}

impl CircuitBreakerState {
    /// Counts a failure; returns true when this failure opened the circuit
    pub fn record_failure(&mut self, threshold: u32, now: DateTime<Utc>) -> bool {
        self.failure_count = self.failure_count.saturating_add(1);
        if self.failure_count >= threshold && self.opened_at.is_none() {
            self.opened_at = Some(now);
            return true;
        }
        false
    }

    /// A success only decays the count; an open circuit stays open until
    /// its timeout elapses
    pub fn record_success(&mut self) {
        self.failure_count = self.failure_count.saturating_sub(1);
    }

    pub fn reset(&mut self) {
        self.failure_count = 0;
        self.opened_at = None;
    }

    /// Whether the circuit blocks traffic at `now`, resetting it if the
    /// timeout has elapsed
    pub fn check_open(&mut self, timeout: Duration, now: DateTime<Utc>) -> bool {
        match self.opened_at {
            Some(opened) if now - opened >= timeout => {
                self.reset();
                false
            }
            Some(_) => true,
            None => false,
        }
    }
}
