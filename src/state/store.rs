//! Durable step payloads, execution history and the run identifier.
//!
//! Layout:
//! - `<state_dir>/run_id.json`                      run identifier record
//! - `<state_dir>/<run_id>/<step>/payload.json`     step output
//! - `<metrics_dir>/<run_id>/<step>/metadata.json`  append-only history
//!
//! Payload files are replaced atomically, so a payload is either the
//! previous good one or the complete new one.

use super::StepMetadata;
use crate::fsio;
use crate::models::{EtlError, Payload, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Run identifier record file name.
pub const RUN_ID_FILE: &str = "run_id.json";

const PAYLOAD_FILE: &str = "payload.json";
const METADATA_FILE: &str = "metadata.json";

/// Opaque identifier of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Mint a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Body of `run_id.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
}

/// Filesystem-backed state store.
#[derive(Debug, Clone)]
pub struct StateStore {
    state_dir: PathBuf,
    metrics_dir: PathBuf,
    retain_history: bool,
}

impl StateStore {
    /// Store over possibly missing directories. Reads treat a missing
    /// directory as empty; nothing is created until the first write.
    pub fn new(state_dir: &Path, metrics_dir: &Path) -> Self {
        Self {
            state_dir: state_dir.to_path_buf(),
            metrics_dir: metrics_dir.to_path_buf(),
            retain_history: false,
        }
    }

    /// Create the state and metrics directories.
    pub fn create_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.state_dir).map_err(|e| EtlError::io("creating state dir", e))?;
        fs::create_dir_all(&self.metrics_dir).map_err(|e| EtlError::io("creating metrics dir", e))
    }

    /// Keep metadata history when the run is cleaned.
    pub fn retain_history(mut self, retain: bool) -> Self {
        self.retain_history = retain;
        self
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn metrics_dir(&self) -> &Path {
        &self.metrics_dir
    }

    fn run_record_path(&self) -> PathBuf {
        self.state_dir.join(RUN_ID_FILE)
    }

    pub fn payload_path(&self, run: &RunId, step: &str) -> PathBuf {
        self.state_dir.join(run.as_str()).join(step).join(PAYLOAD_FILE)
    }

    pub fn metadata_path(&self, run: &RunId, step: &str) -> PathBuf {
        self.metrics_dir.join(run.as_str()).join(step).join(METADATA_FILE)
    }

    /// Persisted run identifier, if any.
    pub fn current_run_id(&self) -> Result<Option<RunId>> {
        let path = self.run_record_path();
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|e| EtlError::io("reading run id", e))?;
        let record: RunRecord = serde_json::from_str(&content)
            .map_err(|e| EtlError::Parse(format!("Invalid run id record {}: {e}", path.display())))?;
        Ok(Some(record.run_id))
    }

    /// Return the persisted run identifier or mint and persist a new one.
    pub fn get_or_create_run_id(&self) -> Result<RunId> {
        if let Some(run_id) = self.current_run_id()? {
            debug!(run_id = %run_id, "Resuming existing run");
            return Ok(run_id);
        }

        let record = RunRecord {
            run_id: RunId::new(),
            created_at: Utc::now(),
        };
        let body = serde_json::to_vec_pretty(&record)
            .map_err(|e| EtlError::Internal(format!("Serializing run id: {e}")))?;
        fsio::write_atomic(&self.run_record_path(), &body)
            .map_err(|e| EtlError::state_write("persisting run id", e))?;

        info!(run_id = %record.run_id, "Created new run");
        Ok(record.run_id)
    }

    /// Replace the payload for `step`. Returns once the payload is durable.
    pub fn save(&self, run: &RunId, step: &str, payload: &Payload) -> Result<()> {
        let body = serde_json::to_vec(payload)
            .map_err(|e| EtlError::Internal(format!("Serializing payload for {step}: {e}")))?;
        let path = self.payload_path(run, step);
        fsio::write_atomic(&path, &body)
            .map_err(|e| EtlError::state_write(format!("saving payload for step '{step}'"), e))?;

        debug!(
            run_id = %run,
            step,
            datasets = payload.len(),
            bytes = body.len(),
            "Payload saved"
        );
        Ok(())
    }

    /// Load the payload saved for `step`.
    pub fn load(&self, run: &RunId, step: &str) -> Result<Payload> {
        let path = self.payload_path(run, step);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EtlError::MissingState {
                    step: step.to_string(),
                    path,
                });
            }
            Err(e) => return Err(EtlError::io(format!("reading payload for step '{step}'"), e)),
        };

        let payload: Payload = serde_json::from_slice(&content)
            .map_err(|e| EtlError::Parse(format!("Invalid payload {}: {e}", path.display())))?;
        debug!(run_id = %run, step, datasets = payload.len(), "Payload loaded");
        Ok(payload)
    }

    pub fn has_payload(&self, run: &RunId, step: &str) -> bool {
        self.payload_path(run, step).is_file()
    }

    /// Append an entry to the execution history of `step`.
    pub fn record_metadata(&self, run: &RunId, step: &str, metadata: &StepMetadata) -> Result<()> {
        let mut history = self.history(run, step)?;
        history.push(metadata.clone());

        let body = serde_json::to_vec_pretty(&history)
            .map_err(|e| EtlError::Internal(format!("Serializing metadata: {e}")))?;
        fsio::write_atomic(&self.metadata_path(run, step), &body)
            .map_err(|e| EtlError::state_write(format!("recording metadata for step '{step}'"), e))?;

        debug!(run_id = %run, step, status = %metadata.status, attempts = history.len(), "Metadata recorded");
        Ok(())
    }

    /// Execution history of `step`, oldest first.
    pub fn history(&self, run: &RunId, step: &str) -> Result<Vec<StepMetadata>> {
        let path = self.metadata_path(run, step);
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path).map_err(|e| EtlError::io("reading metadata", e))?;
        serde_json::from_str(&content)
            .map_err(|e| EtlError::Parse(format!("Invalid metadata {}: {e}", path.display())))
    }

    /// Remove payloads, the run record and (unless retained) the metadata
    /// history of `run`.
    ///
    /// With `preserve_structure` the state and metrics directories are left
    /// in place, empty, so the next run can start immediately.
    pub fn clean(&self, run: &RunId, preserve_structure: bool) -> Result<()> {
        let result = if preserve_structure {
            fsio::clear_dir(&self.state_dir)
        } else {
            fsio::remove_if_exists(&self.state_dir)
        };
        result.map_err(|e| EtlError::state_write("cleaning state directory", e))?;

        if !self.retain_history {
            fsio::remove_if_exists(&self.metrics_dir.join(run.as_str()))
                .map_err(|e| EtlError::state_write("cleaning metadata history", e))?;
        }
        if preserve_structure {
            fs::create_dir_all(&self.metrics_dir)
                .map_err(|e| EtlError::state_write("recreating metrics directory", e))?;
        } else if !self.retain_history && is_empty_dir(&self.metrics_dir) {
            fsio::remove_if_exists(&self.metrics_dir)
                .map_err(|e| EtlError::state_write("removing metrics directory", e))?;
        }

        info!(run_id = %run, preserve_structure, retain_history = self.retain_history, "State cleaned");
        Ok(())
    }
}

fn is_empty_dir(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Dataset, Table};
    use crate::state::StepStatus;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> StateStore {
        StateStore::new(&dir.path().join("state"), &dir.path().join("metrics"))
    }

    fn sample_payload() -> Payload {
        let mut table = Table::new(vec!["name".into(), "temp_c".into(), "is_day".into(), "note".into()]);
        table.push_row(vec![json!("OSLO"), json!(-3.25), json!(0), json!(null)]);
        table.push_row(vec![json!("ROME"), json!(0.1 + 0.2), json!(1), json!("sunny, warm")]);
        let records = BTreeMap::from([(
            "Oslo, Norway".to_string(),
            json!({"location": {"name": "Oslo", "lat": 59.91}, "forecast": {"forecastday": []}}),
        )]);
        Payload::new()
            .with("current_df", Dataset::Table(table))
            .with("raw_data", Dataset::Records(records))
            .with("empty", Dataset::Table(Table::new(vec!["a".into()])))
    }

    #[test]
    fn test_run_id_is_persisted_and_reused() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.current_run_id().unwrap().is_none());
        assert!(!store.state_dir().exists());

        let first = store.get_or_create_run_id().unwrap();
        let second = store.get_or_create_run_id().unwrap();
        assert_eq!(first, second);

        // A fresh handle on the same directory sees the same run.
        let reopened = StateStore::new(store.state_dir(), store.metrics_dir());
        assert_eq!(reopened.get_or_create_run_id().unwrap(), first);
    }

    #[test]
    fn test_payload_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let run = store.get_or_create_run_id().unwrap();
        let payload = sample_payload();

        store.save(&run, "dq_checks", &payload).unwrap();
        assert_eq!(store.load(&run, "dq_checks").unwrap(), payload);

        // Overwrite replaces the previous payload entirely.
        let smaller = Payload::new().with("only", Dataset::Table(Table::new(vec![])));
        store.save(&run, "dq_checks", &smaller).unwrap();
        assert_eq!(store.load(&run, "dq_checks").unwrap(), smaller);
    }

    #[test]
    fn test_load_missing_state() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let run = RunId::new();

        let err = store.load(&run, "analyze").unwrap_err();
        assert!(matches!(err, EtlError::MissingState { ref step, .. } if step == "analyze"));
    }

    #[test]
    fn test_metadata_history_appends() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let run = store.get_or_create_run_id().unwrap();
        let input = sample_payload();

        let failed = StepMetadata::started("transform", &input).failed("boom");
        let ok = StepMetadata::started("transform", &input).succeeded(&Payload::new());
        store.record_metadata(&run, "transform", &failed).unwrap();
        store.record_metadata(&run, "transform", &ok).unwrap();

        let history = store.history(&run, "transform").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, StepStatus::Failed);
        assert_eq!(history[1].status, StepStatus::Succeeded);
    }

    #[test]
    fn test_clean_preserves_structure() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let run = store.get_or_create_run_id().unwrap();
        store.save(&run, "extract", &sample_payload()).unwrap();
        store
            .record_metadata(&run, "extract", &StepMetadata::started("extract", &Payload::new()))
            .unwrap();

        store.clean(&run, true).unwrap();

        assert!(store.state_dir().is_dir());
        assert!(store.metrics_dir().is_dir());
        assert!(!store.has_payload(&run, "extract"));
        assert!(store.history(&run, "extract").unwrap().is_empty());
        assert!(store.current_run_id().unwrap().is_none());
        assert_ne!(store.get_or_create_run_id().unwrap(), run);
    }

    #[test]
    fn test_clean_retains_history_when_asked() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).retain_history(true);
        let run = store.get_or_create_run_id().unwrap();
        store
            .record_metadata(&run, "load", &StepMetadata::started("load", &Payload::new()))
            .unwrap();

        store.clean(&run, false).unwrap();

        assert!(!store.state_dir().exists());
        assert_eq!(store.history(&run, "load").unwrap().len(), 1);
    }
}
