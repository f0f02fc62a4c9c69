//! Session checkpoints and crash recovery
//!
//! - `SessionCheckpoint`: periodic snapshot of progress, frontier sizes,
//!   circuit breaker and adaptive delay state
//! - `analyze_recovery`: resume / restart / skip decision for a checkpoint
//! - `SessionHeartbeat`: latest liveness and health sample of a running session
//! - `SessionManager`: persistence, restore, listing and cleanup

mod checkpoint;
mod heartbeat;
mod manager;
mod recovery;

pub use checkpoint::{FetcherInfo, SessionCheckpoint};
pub use heartbeat::SessionHeartbeat;
pub use manager::SessionManager;
pub use recovery::{analyze_recovery, RecoveryStatus, RecoveryStrategy, SessionRecoveryInfo};
