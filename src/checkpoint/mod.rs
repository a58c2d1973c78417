//! Checkpoint module for resumable pipeline execution.
//!
//! Provides:
//! - `CheckpointStore`: Durable per-step completion markers
//! - `RunLock`: Running indicator guarding a state directory

mod lock;
mod store;

pub use lock::*;
pub use store::*;
