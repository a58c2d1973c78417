//! State module: durable step outputs and execution history.
//!
//! Provides:
//! - `StateStore`: Payload persistence, metadata history, run identifier
//! - `StepMetadata` / `StepStatus`: Per-attempt execution records

mod metadata;
mod store;

pub use metadata::*;
pub use store::*;
