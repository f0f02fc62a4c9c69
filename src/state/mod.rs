//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `DomainAccessState`: per-domain access timing for the rate limiter
//! - `CircuitBreakerState`: per-domain failure count and open time
//! - `TaskStatus` / `TaskProgress`: task lifecycle and counters

mod circuit_state;
mod domain_state;
mod task_state;

pub use circuit_state::CircuitBreakerState;
pub use domain_state::DomainAccessState;
pub use task_state::{TaskProgress, TaskStatus};
