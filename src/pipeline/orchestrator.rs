//! Pipeline orchestrator: run lifecycle, resume computation, cleanup.
//!
//! Run state machine: `Initializing -> Running -> {Completed, Failed}`.
//!
//! Resume:
//! - completed = longest prefix of the execution plan with checkpoints
//! - their payloads are loaded from the state store as needed
//! - execution restarts at the first step without a checkpoint
//!
//! On `Completed` the run's transient state and checkpoints are removed;
//! only the load step's output files remain.

use super::{
    execution_plan, InputProvider, JsonFileInput, ResumePlan, RunContext, StepExecutor,
    StepRegistry,
};
use crate::checkpoint::{CheckpointStore, RunLock};
use crate::models::{Config, EtlError, Payload, Result};
use crate::state::{RunId, StateStore, StepMetadata};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Lifecycle phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunPhase {
    Initializing,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initializing => "INITIALIZING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// How to treat existing progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Skip checkpointed steps
    #[default]
    Resume,
    /// Discard all progress and execute every step
    Restart,
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub phase: RunPhase,
    /// Steps executed by this invocation, in order
    pub executed: Vec<String>,
    /// Steps skipped thanks to their checkpoints
    pub skipped: Vec<String>,
    pub runtime_secs: f64,
}

/// Checkpoint and history summary of one step.
#[derive(Debug, Clone, Serialize)]
pub struct StepSummary {
    pub step: String,
    pub dependencies: Vec<String>,
    pub checkpointed: bool,
    /// Completion time recorded in the marker
    pub completed_at: Option<DateTime<Utc>>,
    pub attempts: usize,
    pub last_attempt: Option<StepMetadata>,
}

/// Read-only view of the persisted progress.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    /// `None` when no run is in progress
    pub run_id: Option<RunId>,
    pub resume_point: Option<String>,
    pub steps: Vec<StepSummary>,
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.run_id {
            Some(run_id) => writeln!(f, "Run: {run_id}")?,
            None => writeln!(f, "Run: none in progress")?,
        }
        match &self.resume_point {
            Some(step) => writeln!(f, "Resume point: {step}")?,
            None => writeln!(f, "Resume point: -")?,
        }
        for summary in &self.steps {
            let mark = if summary.checkpointed { "done" } else { "pending" };
            write!(f, "  {:<12} {:<8} attempts: {}", summary.step, mark, summary.attempts)?;
            if let Some(at) = summary.completed_at {
                write!(f, "  at: {}", at.format("%Y-%m-%d %H:%M:%S"))?;
            }
            if let Some(last) = &summary.last_attempt {
                write!(f, "  last: {} ({} ms)", last.status, last.duration_ms)?;
                if let Some(err) = &last.error {
                    write!(f, "  error: {err}")?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Resumable pipeline over a configured set of steps.
pub struct Pipeline {
    config: Arc<Config>,
    registry: Arc<StepRegistry>,
    plan: Vec<String>,
    input: Box<dyn InputProvider>,
    state: StateStore,
    checkpoints: CheckpointStore,
    phase: RunPhase,
}

impl Pipeline {
    /// Validate the configuration against the registry and build the plan.
    ///
    /// Unknown steps and dependency cycles are reported here, before any
    /// step runs. Nothing is written to disk until `run`.
    pub fn new(config: Config, mut registry: StepRegistry) -> Result<Self> {
        config.validate()?;
        registry.configure(&config.steps)?;
        let plan = execution_plan(&config.steps.execution_order, |step| {
            registry.dependencies_of(step)
        })?;

        let state = StateStore::new(&config.paths.state_dir(), &config.paths.metrics_dir())
            .retain_history(config.cleanup.retain_history);
        let checkpoints = CheckpointStore::new(&config.paths.checkpoint_dir());

        debug!(plan = ?plan, "Execution plan resolved");
        Ok(Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            plan,
            input: Box::new(JsonFileInput::new()),
            state,
            checkpoints,
            phase: RunPhase::Initializing,
        })
    }

    /// Replace the extraction input provider.
    pub fn with_input(mut self, input: impl InputProvider + 'static) -> Self {
        self.input = Box::new(input);
        self
    }

    /// Steps in execution order.
    pub fn plan(&self) -> &[String] {
        &self.plan
    }

    /// Phase reached by the last `run` call.
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Resume plan for `run_id` from the checkpoint store.
    pub fn resume_plan(&self, run_id: &RunId) -> ResumePlan {
        ResumePlan::compute(&self.plan, |step| self.checkpoints.exists(run_id, step))
    }

    /// Persisted progress, without modifying anything.
    pub fn status(&self) -> Result<PipelineStatus> {
        let run_id = self.state.current_run_id()?;
        let resume = match &run_id {
            Some(run_id) => self.resume_plan(run_id),
            None => ResumePlan::fresh(&self.plan),
        };

        let mut steps = Vec::with_capacity(self.plan.len());
        for step in &self.plan {
            let (marker, history) = match &run_id {
                Some(run_id) => (
                    self.checkpoints.read(run_id, step)?,
                    self.state.history(run_id, step)?,
                ),
                None => (None, Vec::new()),
            };
            steps.push(StepSummary {
                step: step.clone(),
                dependencies: self.registry.dependencies_of(step),
                checkpointed: marker.is_some(),
                completed_at: marker.map(|m| m.completed_at),
                attempts: history.len(),
                last_attempt: history.last().cloned(),
            });
        }

        Ok(PipelineStatus {
            run_id,
            resume_point: resume.resume_point().map(String::from),
            steps,
        })
    }

    /// Execute the pipeline, resuming or restarting per `mode`.
    ///
    /// Any error leaves the pipeline in `Failed`; checkpoints of completed
    /// steps are kept for the next resume.
    pub async fn run(&mut self, mode: RunMode) -> Result<RunReport> {
        let start = Instant::now();
        self.phase = RunPhase::Initializing;

        let lock = match RunLock::acquire(self.checkpoints.dir(), self.config.lock.strict) {
            Ok(lock) => lock,
            Err(e) => {
                self.phase = RunPhase::Failed;
                return Err(e);
            }
        };

        let outcome = self.run_locked(mode, start).await;
        let released = lock.release();

        match (outcome, released) {
            (Ok(report), Ok(())) => {
                info!(
                    run_id = %report.run_id,
                    phase = %report.phase,
                    executed = report.executed.len(),
                    skipped = report.skipped.len(),
                    runtime_secs = format!("{:.2}", report.runtime_secs),
                    "Pipeline complete"
                );
                Ok(report)
            }
            (Ok(_), Err(e)) => {
                self.phase = RunPhase::Failed;
                Err(e)
            }
            (Err(e), released) => {
                self.phase = RunPhase::Failed;
                error!(
                    phase = %self.phase,
                    step = e.step().unwrap_or("-"),
                    error = %e,
                    "Pipeline failed, completed steps remain checkpointed"
                );
                if let Err(release_err) = released {
                    warn!(error = %release_err, "Failed to release run lock");
                }
                Err(e)
            }
        }
    }

    /// Body of `run` while the run lock is held.
    async fn run_locked(&mut self, mode: RunMode, start: Instant) -> Result<RunReport> {
        if mode == RunMode::Restart {
            self.discard_progress()?;
        }

        self.state.create_dirs()?;
        let run_id = self.state.get_or_create_run_id()?;
        let output_dir = self.config.paths.output_dir();
        fs::create_dir_all(&output_dir).map_err(|e| EtlError::io("creating output dir", e))?;

        let resume = self.resume_plan(&run_id);
        info!(
            run_id = %run_id,
            mode = ?mode,
            plan = %self.plan.join(" -> "),
            completed = resume.completed.len(),
            remaining = resume.remaining.len(),
            resume_point = resume.resume_point().unwrap_or("-"),
            "Pipeline initialized"
        );

        let ctx = RunContext::new(run_id.clone(), Arc::clone(&self.config));
        let executed = self.execute(&ctx, &resume).await?;
        self.finish(&run_id)?;
        self.phase = RunPhase::Completed;

        Ok(RunReport {
            run_id,
            phase: RunPhase::Completed,
            executed,
            skipped: resume.completed,
            runtime_secs: start.elapsed().as_secs_f64(),
        })
    }

    /// Run the remaining steps; returns the names of the executed steps.
    async fn execute(&mut self, ctx: &RunContext, resume: &ResumePlan) -> Result<Vec<String>> {
        if resume.is_complete() {
            info!(run_id = %ctx.run_id(), "All steps already checkpointed, only cleaning up");
            return Ok(Vec::new());
        }

        self.phase = RunPhase::Running;
        info!(run_id = %ctx.run_id(), phase = %self.phase, steps = ?resume.remaining, "Running steps");

        let executor = StepExecutor::new(
            Arc::clone(&self.registry),
            self.state.clone(),
            self.checkpoints.clone(),
        )
        .save_metadata(self.config.steps.save_metadata);

        // Outputs of checkpointed steps that a remaining step consumes.
        let mut payloads: HashMap<String, Payload> = HashMap::new();
        for dep in self.consumed_by(&resume.remaining) {
            if resume.completed.contains(&dep) && !payloads.contains_key(&dep) {
                info!(step = %dep, "Loading checkpointed output");
                let payload = self.state.load(ctx.run_id(), &dep)?;
                payloads.insert(dep, payload);
            }
        }

        let pb = progress_bar(self.plan.len(), resume.completed.len());
        let mut executed = Vec::with_capacity(resume.remaining.len());

        for (i, step) in resume.remaining.iter().enumerate() {
            let later = &resume.remaining[i + 1..];
            let input = self.input_for(step, later, &mut payloads)?;

            pb.set_message(step.clone());
            let record = match executor.run(step, input, ctx).await {
                Ok(record) => record,
                Err(e) => {
                    pb.abandon_with_message(format!("{step} failed"));
                    return Err(e);
                }
            };

            let needed = self.consumed_by(later);
            if needed.contains(step) {
                payloads.insert(step.clone(), record.payload);
            }
            payloads.retain(|name, _| needed.contains(name));

            executed.push(step.clone());
            pb.inc(1);
        }

        pb.finish_with_message("done");
        Ok(executed)
    }

    /// Input of `step`: merged dependency payloads, or the extraction input
    /// for a step without dependencies. Payloads no later step needs are
    /// moved out instead of cloned.
    fn input_for(
        &self,
        step: &str,
        later: &[String],
        payloads: &mut HashMap<String, Payload>,
    ) -> Result<Payload> {
        let deps = self.registry.dependencies_of(step);
        if deps.is_empty() {
            return self.input.load(&self.config);
        }

        let still_needed = self.consumed_by(later);
        let mut input = Payload::new();
        for dep in &deps {
            let payload = if still_needed.contains(dep) {
                payloads.get(dep).cloned()
            } else {
                payloads.remove(dep)
            };
            let payload = payload.ok_or_else(|| {
                EtlError::Internal(format!("Output of '{dep}' unavailable for step '{step}'"))
            })?;
            input.merge(payload);
        }
        Ok(input)
    }

    /// Every step that one of `steps` depends on.
    fn consumed_by(&self, steps: &[String]) -> Vec<String> {
        let mut deps: Vec<String> = steps
            .iter()
            .flat_map(|step| self.registry.dependencies_of(step))
            .collect();
        deps.sort();
        deps.dedup();
        deps
    }

    /// Clear checkpoints and state of the persisted run, if any.
    fn discard_progress(&self) -> Result<()> {
        match self.state.current_run_id()? {
            Some(run_id) => {
                warn!(run_id = %run_id, "Restart requested, discarding existing progress");
                self.checkpoints.clear(&run_id)?;
                self.state.clean(&run_id, true)?;
            }
            None => debug!("Restart requested, no existing run"),
        }
        Ok(())
    }

    /// Post-success cleanup: only the load step's output files survive.
    fn finish(&self, run_id: &RunId) -> Result<()> {
        self.checkpoints.clear(run_id)?;
        self.state.clean(run_id, true)?;
        info!(run_id = %run_id, "Transient state and checkpoints removed");
        Ok(())
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("plan", &self.plan)
            .field("phase", &self.phase)
            .field("registry", &self.registry)
            .finish()
    }
}

fn progress_bar(total: usize, done: usize) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    if let Ok(style) =
        ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("##-"));
    }
    pb.set_position(done as u64);
    pb
}
