//! Checkpoint markers: durable per-step completion proofs.
//!
//! Layout: `<checkpoint_dir>/<run_id>/<step>.done`
//!
//! - A marker is written with write-then-rename, so a half-written marker is
//!   never visible under its final name.
//! - Markers are only created after the step payload is durable; a marker
//!   therefore always points at loadable data.
//! - Existence is the whole contract. The marker body is informational.

use crate::fsio;
use crate::models::{EtlError, Result};
use crate::state::RunId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File extension of completion markers.
pub const MARKER_EXT: &str = "done";

/// Body of a marker file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMarker {
    pub run_id: RunId,
    pub step: String,
    pub completed_at: DateTime<Utc>,
}

/// Directory-of-markers checkpoint store.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Store over a possibly missing directory; markers create it on demand.
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    /// Checkpoint root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn run_dir(&self, run: &RunId) -> PathBuf {
        self.dir.join(run.as_str())
    }

    /// Path of the marker for `step`.
    pub fn marker_path(&self, run: &RunId, step: &str) -> PathBuf {
        self.run_dir(run).join(format!("{step}.{MARKER_EXT}"))
    }

    /// Record that `step` completed for `run`. Idempotent.
    pub fn create(&self, run: &RunId, step: &str) -> Result<()> {
        let marker = CheckpointMarker {
            run_id: run.clone(),
            step: step.to_string(),
            completed_at: Utc::now(),
        };
        let body = serde_json::to_vec_pretty(&marker)
            .map_err(|e| EtlError::Internal(format!("Serializing checkpoint marker: {e}")))?;

        fsio::write_atomic(&self.marker_path(run, step), &body).map_err(|source| {
            EtlError::CheckpointWrite {
                step: step.to_string(),
                source,
            }
        })?;

        debug!(run_id = %run, step, "Checkpoint created");
        Ok(())
    }

    /// True if `step` has a completion marker for `run`.
    pub fn exists(&self, run: &RunId, step: &str) -> bool {
        self.marker_path(run, step).is_file()
    }

    /// Read a marker body, `None` when the step has no marker.
    pub fn read(&self, run: &RunId, step: &str) -> Result<Option<CheckpointMarker>> {
        let path = self.marker_path(run, step);
        if !path.is_file() {
            return Ok(None);
        }
        let content =
            fs::read_to_string(&path).map_err(|e| EtlError::io("reading checkpoint marker", e))?;
        let marker = serde_json::from_str(&content)
            .map_err(|e| EtlError::Parse(format!("Invalid checkpoint marker {}: {e}", path.display())))?;
        Ok(Some(marker))
    }

    /// Drop the marker for a single step (before it is re-executed).
    pub fn remove(&self, run: &RunId, step: &str) -> Result<()> {
        let path = self.marker_path(run, step);
        fsio::remove_if_exists(&path).map_err(|source| EtlError::CheckpointWrite {
            step: step.to_string(),
            source,
        })?;
        fsio::remove_if_exists(&fsio::tmp_path(&path)).map_err(|source| {
            EtlError::CheckpointWrite {
                step: step.to_string(),
                source,
            }
        })
    }

    /// Names of steps with a marker for `run`, sorted.
    pub fn completed(&self, run: &RunId) -> Result<Vec<String>> {
        let pattern = format!(
            "{}{}*.{MARKER_EXT}",
            glob::Pattern::escape(&self.run_dir(run).to_string_lossy()),
            std::path::MAIN_SEPARATOR
        );

        let mut steps: Vec<String> = glob::glob(&pattern)
            .map_err(|e| EtlError::Internal(format!("Invalid glob pattern: {e}")))?
            .filter_map(|entry| entry.ok())
            .filter(|path| path.is_file())
            .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();
        steps.sort();
        Ok(steps)
    }

    /// Remove every marker for `run`.
    pub fn clear(&self, run: &RunId) -> Result<()> {
        let run_dir = self.run_dir(run);
        if !run_dir.exists() {
            return Ok(());
        }
        let cleared = self.completed(run)?.len();
        fs::remove_dir_all(&run_dir).map_err(|source| EtlError::CheckpointWrite {
            step: "*".to_string(),
            source,
        })?;
        info!(run_id = %run, cleared, "Checkpoints cleared");
        Ok(())
    }
}
