//! Heuristic crawl health score and concurrency throttling
//!
//! The score is the mean of whichever sub-scores could be sampled, each
//! clamped to `[0, 1]`. A low score sheds one worker slot per evaluation and a
//! high one gives a slot back. The crawl itself is never stopped from here.

use crate::config::HealthConfig;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Aggregates sampled for one health evaluation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthInputs {
    /// Resident memory of this process, when the platform exposes it
    pub memory_mb: Option<f64>,
    pub active_handles: usize,
    /// Cumulative circuit-breaker failures across every domain
    pub circuit_failures: u32,
    pub urls_processed: u64,
    pub urls_successful: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub score: f64,
    pub memory: Option<f64>,
    pub handles: f64,
    pub failures: f64,
    pub success_rate: Option<f64>,
    /// Worker slots the coordinator may use after this evaluation
    pub permitted_slots: usize,
}

impl HealthReport {
    pub fn is_degraded(&self, threshold: f64) -> bool {
        self.score < threshold
    }
}

pub struct HealthMonitor {
    config: HealthConfig,
    max_slots: usize,
    permitted: AtomicUsize,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig, max_slots: usize) -> Self {
        let max_slots = max_slots.max(1);
        Self {
            config,
            max_slots,
            permitted: AtomicUsize::new(max_slots),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    pub fn permitted_slots(&self) -> usize {
        self.permitted.load(Ordering::Relaxed)
    }

    /// Scores `inputs` and adjusts the permitted slot count
    pub fn evaluate(&self, inputs: &HealthInputs) -> HealthReport {
        let memory = inputs.memory_mb.map(|mb| {
            if self.config.max_memory_mb > 0.0 {
                clamp_unit(1.0 - mb / self.config.max_memory_mb)
            } else {
                1.0
            }
        });
        let handles = ratio_score(inputs.active_handles as f64, self.config.max_active_pages as f64);
        let failures = ratio_score(inputs.circuit_failures as f64, self.config.failure_ceiling as f64);
        let success_rate = (inputs.urls_processed > 0)
            .then(|| clamp_unit(inputs.urls_successful as f64 / inputs.urls_processed as f64));

        let parts: Vec<f64> = [memory, Some(handles), Some(failures), success_rate]
            .into_iter()
            .flatten()
            .collect();
        let score = if parts.is_empty() {
            0.5
        } else {
            parts.iter().sum::<f64>() / parts.len() as f64
        };

        if let Some(mb) = inputs.memory_mb {
            if mb > self.config.max_memory_mb {
                tracing::warn!(
                    "memory usage {:.1}MB exceeds limit {:.1}MB",
                    mb,
                    self.config.max_memory_mb
                );
            }
        }

        let permitted_slots = self.adjust_slots(score);

        HealthReport {
            score,
            memory,
            handles,
            failures,
            success_rate,
            permitted_slots,
        }
    }

    fn adjust_slots(&self, score: f64) -> usize {
        let current = self.permitted.load(Ordering::Relaxed);
        let next = if score < self.config.throttle_below {
            current.saturating_sub(1).max(1)
        } else if score > self.config.recover_above {
            (current + 1).min(self.max_slots)
        } else {
            current
        };

        if next != current {
            tracing::info!(
                "health score {:.2}: worker slots {} -> {}",
                score,
                current,
                next
            );
            self.permitted.store(next, Ordering::Relaxed);
        }
        next
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

fn ratio_score(value: f64, ceiling: f64) -> f64 {
    if ceiling <= 0.0 {
        return 1.0;
    }
    clamp_unit(1.0 - value / ceiling)
}

/// Resident set size of this process in MB, from `/proc/self/statm`
pub fn resident_memory_mb() -> Option<f64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages: f64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    // 4 KiB pages
    Some(pages * 4096.0 / (1024.0 * 1024.0))
}
