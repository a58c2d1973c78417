//! Single-step execution with durable bookkeeping.
//!
//! Ordering for one step:
//! 1. drop any stale checkpoint marker, status RUNNING (in memory)
//! 2. run the handler
//! 3. success: save payload -> create marker -> record SUCCEEDED metadata
//!    failure: record FAILED metadata, no payload, no marker
//!
//! A failed attempt never touches the previously saved payload.

use super::{RunContext, StepRegistry};
use crate::checkpoint::CheckpointStore;
use crate::models::{EtlError, Payload, Result};
use crate::state::{StateStore, StepMetadata};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Result of a successful step.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub step: String,
    pub payload: Payload,
    pub metadata: StepMetadata,
}

/// Runs one step at a time against the stores of a run.
#[derive(Debug, Clone)]
pub struct StepExecutor {
    registry: Arc<StepRegistry>,
    state: StateStore,
    checkpoints: CheckpointStore,
    save_metadata: bool,
}

impl StepExecutor {
    pub fn new(registry: Arc<StepRegistry>, state: StateStore, checkpoints: CheckpointStore) -> Self {
        Self {
            registry,
            state,
            checkpoints,
            save_metadata: true,
        }
    }

    /// Toggle metadata history recording.
    pub fn save_metadata(mut self, enabled: bool) -> Self {
        self.save_metadata = enabled;
        self
    }

    /// Execute `step` on `input`.
    ///
    /// Returns `StepExecution` wrapping the handler's error on failure;
    /// durability failures surface as `StateWrite` / `CheckpointWrite`.
    pub async fn run(&self, step: &str, input: Payload, ctx: &RunContext) -> Result<StepRecord> {
        let handler = self.registry.resolve(step)?;
        let run_id = ctx.run_id();

        // The marker must not outlive a re-execution that may fail.
        self.checkpoints.remove(run_id, step)?;

        let metadata = StepMetadata::started(step, &input);
        info!(
            run_id = %run_id,
            step,
            inputs = metadata.input_refs.len(),
            "Step started"
        );

        let start = Instant::now();
        let outcome = handler.run(input, ctx).await;
        let elapsed = start.elapsed();

        match outcome {
            Ok(payload) => {
                self.state.save(run_id, step, &payload)?;
                self.checkpoints.create(run_id, step)?;

                let metadata = metadata.succeeded(&payload);
                self.record(ctx, step, &metadata)?;
                info!(
                    run_id = %run_id,
                    step,
                    duration_ms = elapsed.as_millis() as u64,
                    datasets = payload.len(),
                    "Step succeeded"
                );

                Ok(StepRecord {
                    step: step.to_string(),
                    payload,
                    metadata,
                })
            }
            Err(e) => {
                let metadata = metadata.failed(format!("{e:#}"));
                self.record(ctx, step, &metadata)?;
                error!(
                    run_id = %run_id,
                    step,
                    duration_ms = elapsed.as_millis() as u64,
                    error = %format!("{e:#}"),
                    "Step failed"
                );

                Err(EtlError::step_failed(step, elapsed, e))
            }
        }
    }

    fn record(&self, ctx: &RunContext, step: &str, metadata: &StepMetadata) -> Result<()> {
        if !self.save_metadata {
            debug!(step, "Metadata recording disabled");
            return Ok(());
        }
        self.state.record_metadata(ctx.run_id(), step, metadata)
    }
}
