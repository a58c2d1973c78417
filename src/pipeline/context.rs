//! Per-run context handed to every handler.

use crate::models::Config;
use crate::state::RunId;
use std::path::PathBuf;
use std::sync::Arc;

/// Immutable description of the run in progress.
///
/// Replaces ambient process state: handlers learn the run id and the
/// configuration from here and nowhere else.
#[derive(Debug, Clone)]
pub struct RunContext {
    run_id: RunId,
    config: Arc<Config>,
}

impl RunContext {
    pub fn new(run_id: RunId, config: Arc<Config>) -> Self {
        Self { run_id, config }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Directory receiving the final artifacts.
    pub fn output_dir(&self) -> PathBuf {
        self.config.paths.output_dir()
    }
}
