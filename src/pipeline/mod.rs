//! Pipeline module - step registry, execution plan, executor and orchestrator.
//!
//! Flow:
//! Config → StepRegistry (resolve + dependencies) → execution plan
//!        → ResumePlan (checkpoints) → StepExecutor per step → cleanup

mod context;
mod executor;
mod input;
mod orchestrator;
mod plan;
mod registry;
mod step;

pub use context::*;
pub use executor::*;
pub use input::*;
pub use orchestrator::*;
pub use plan::*;
pub use registry::*;
pub use step::*;
