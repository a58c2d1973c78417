//! weather-etl - Resumable weather data pipeline.
//!
//! ## Architecture
//!
//! Five steps run strictly one after another:
//! extract → transform → dq_checks → analyze → load
//!
//! - **Checkpoint Store**: durable per-step completion markers
//! - **State Store**: step payloads, metadata history, run identifier
//! - **Step Registry**: step name → handler, plus declared dependencies
//! - **Step Executor**: runs one step, then persists payload → marker → metadata
//! - **Pipeline**: resume computation, run lifecycle, cleanup
//!
//! ## Resumability
//!
//! - A marker exists only once the step's payload is durable
//! - A rerun skips the longest checkpointed prefix and reloads its output
//! - A failed step leaves every earlier checkpoint and payload intact
//! - After a complete run only the output CSV files remain

pub mod checkpoint;
pub mod fsio;
pub mod models;
pub mod pipeline;
pub mod state;
pub mod steps;

// Re-exports for convenience
pub use checkpoint::{CheckpointStore, RunLock};
pub use models::{Config, Dataset, EtlError, Payload, Result, Table};
pub use pipeline::{Pipeline, RunMode, RunPhase, RunReport, StepHandler, StepRegistry};
pub use state::{RunId, StateStore, StepMetadata, StepStatus};
