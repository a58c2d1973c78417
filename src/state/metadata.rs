//! Per-attempt step metadata.

use crate::models::Payload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a step within a run.
///
/// Lifecycle of one attempt:
/// - `Pending` -> `Running`
/// - `Running` -> `Succeeded`
/// - `Running` -> `Failed`
/// - `Failed` -> `Running` (re-execution on resume)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Reference to one dataset consumed or produced by a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRef {
    pub name: String,
    pub rows: usize,
}

impl DatasetRef {
    /// One reference per dataset in `payload`, in name order.
    pub fn describe(payload: &Payload) -> Vec<DatasetRef> {
        payload
            .iter()
            .map(|(name, dataset)| DatasetRef {
                name: name.clone(),
                rows: dataset.len(),
            })
            .collect()
    }
}

/// One entry of a step's execution history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepMetadata {
    pub step: String,
    pub status: StepStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Milliseconds between start and end
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub input_refs: Vec<DatasetRef>,
    #[serde(default)]
    pub output_refs: Vec<DatasetRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepMetadata {
    /// Metadata for a step that has just started.
    pub fn started(step: &str, input: &Payload) -> Self {
        Self {
            step: step.to_string(),
            status: StepStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: 0,
            input_refs: DatasetRef::describe(input),
            output_refs: Vec::new(),
            error: None,
        }
    }

    fn finish(mut self, status: StepStatus) -> Self {
        let end = Utc::now();
        self.duration_ms = (end - self.start_time).num_milliseconds().max(0) as u64;
        self.end_time = Some(end);
        self.status = status;
        self
    }

    /// Close the entry as succeeded.
    pub fn succeeded(self, output: &Payload) -> Self {
        let mut meta = self.finish(StepStatus::Succeeded);
        meta.output_refs = DatasetRef::describe(output);
        meta
    }

    /// Close the entry as failed.
    pub fn failed(self, error: impl fmt::Display) -> Self {
        let mut meta = self.finish(StepStatus::Failed);
        meta.error = Some(error.to_string());
        meta
    }
}
