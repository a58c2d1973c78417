//! End-to-end runs of the weather pipeline over a five-city input.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use weather_etl::checkpoint::{LockInfo, LOCK_FILE};
use weather_etl::pipeline::{RunContext, RAW_DATA};
use weather_etl::steps::{OUTPUT_FILES, SANDBOX_DIR};
use weather_etl::{
    Config, EtlError, Payload, Pipeline, RunMode, RunPhase, StepHandler, StepRegistry, StepStatus,
};

const FIXTURE: &str = include_str!("fixtures/five_cities.json");
const STEPS: [&str; 5] = ["extract", "transform", "dq_checks", "analyze", "load"];

// Above the default pid_max, so no live process owns it.
const DEAD_PID: u32 = 4_194_304 + 17;

/// Wraps a real handler; fails once when armed and counts invocations.
struct Flaky {
    inner: Arc<dyn StepHandler>,
    armed: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl StepHandler for Flaky {
    async fn run(&self, input: Payload, ctx: &RunContext) -> anyhow::Result<Payload> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.armed.swap(false, Ordering::SeqCst) {
            anyhow::bail!("injected failure");
        }
        self.inner.run(input, ctx).await
    }
}

struct Harness {
    dir: TempDir,
    calls: BTreeMap<&'static str, Arc<AtomicUsize>>,
    armed: BTreeMap<&'static str, Arc<AtomicBool>>,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("input");
        fs::create_dir_all(&input).unwrap();
        fs::write(input.join("weather.json"), FIXTURE).unwrap();

        Self {
            dir,
            calls: STEPS.iter().map(|&s| (s, Arc::new(AtomicUsize::new(0)))).collect(),
            armed: STEPS.iter().map(|&s| (s, Arc::new(AtomicBool::new(false)))).collect(),
        }
    }

    fn config(&self) -> Config {
        Config::with_root(self.dir.path())
    }

    fn pipeline(&self) -> Pipeline {
        self.pipeline_with(self.config())
    }

    fn pipeline_with(&self, config: Config) -> Pipeline {
        let weather = StepRegistry::weather();
        let mut registry = StepRegistry::new();
        for step in STEPS {
            registry.register(
                step,
                Flaky {
                    inner: weather.resolve(step).unwrap(),
                    armed: Arc::clone(&self.armed[step]),
                    calls: Arc::clone(&self.calls[step]),
                },
            );
        }
        Pipeline::new(config, registry).unwrap()
    }

    fn fail_once_at(&self, step: &str) {
        self.armed[step].store(true, Ordering::SeqCst);
    }

    fn calls(&self, step: &str) -> usize {
        self.calls[step].load(Ordering::SeqCst)
    }

    fn output_dir(&self) -> PathBuf {
        self.config().paths.output_dir()
    }

    fn outputs(&self) -> BTreeMap<String, String> {
        read_outputs(&self.output_dir())
    }
}

fn read_outputs(dir: &Path) -> BTreeMap<String, String> {
    OUTPUT_FILES
        .iter()
        .map(|(file, _)| (file.to_string(), fs::read_to_string(dir.join(file)).unwrap()))
        .collect()
}

/// Lock file as left behind by a process killed mid-run.
fn write_stale_lock(checkpoint_dir: &Path) {
    fs::create_dir_all(checkpoint_dir).unwrap();
    let info = LockInfo {
        pid: DEAD_PID,
        started_at: Utc::now(),
    };
    fs::write(checkpoint_dir.join(LOCK_FILE), serde_json::to_vec(&info).unwrap()).unwrap();
}

fn entries(dir: &Path) -> usize {
    fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

#[tokio::test]
async fn test_five_locations_end_to_end() {
    let h = Harness::new();
    let mut pipeline = h.pipeline();

    // Stop after extraction to inspect the persisted payload.
    h.fail_once_at("transform");
    pipeline.run(RunMode::Resume).await.unwrap_err();
    let run_id = pipeline.state().current_run_id().unwrap().unwrap();
    let extracted = pipeline.state().load(&run_id, "extract").unwrap();
    assert_eq!(extracted.records(RAW_DATA).unwrap().len(), 5);

    let report = pipeline.run(RunMode::Resume).await.unwrap();
    assert_eq!(report.phase, RunPhase::Completed);
    assert_eq!(report.skipped, ["extract"]);

    let outputs = h.outputs();
    assert_eq!(outputs["max_temp.csv"].lines().count(), 6);
    assert_eq!(outputs["aggregated_temp.csv"].lines().count(), 6);
    assert_eq!(outputs["current_weather.csv"].lines().count(), 6);
    assert_eq!(outputs["location.csv"].lines().count(), 6);
    assert_eq!(outputs["forecast_weather.csv"].lines().count(), 16);
    assert_eq!(outputs["forecasted_current_temp.csv"].lines().count(), 16);
    assert!(outputs["max_temp.csv"].contains("MADRID"));

    // Nothing was rejected: sandbox files carry only headers.
    for label in ["current", "forecast", "location"] {
        let sandbox = h.output_dir().join(SANDBOX_DIR).join(format!("{label}.csv"));
        assert_eq!(fs::read_to_string(sandbox).unwrap().lines().count(), 1);
    }

    let config = h.config();
    let paths = &config.paths;
    assert!(pipeline.checkpoints().completed(&report.run_id).unwrap().is_empty());
    assert_eq!(entries(&paths.state_dir()), 0);
    assert_eq!(entries(&paths.metrics_dir()), 0);
}

#[tokio::test]
async fn test_resume_after_failure_at_every_step() {
    let reference = Harness::new();
    reference.pipeline().run(RunMode::Resume).await.unwrap();
    let expected = reference.outputs();

    for (k, step) in STEPS.iter().enumerate() {
        let h = Harness::new();
        let mut pipeline = h.pipeline();

        h.fail_once_at(step);
        let err = pipeline.run(RunMode::Resume).await.unwrap_err();
        assert_eq!(err.step(), Some(*step));
        assert_eq!(pipeline.phase(), RunPhase::Failed);

        let run_id = pipeline.state().current_run_id().unwrap().unwrap();
        let mut checkpointed = STEPS[..k].to_vec();
        checkpointed.sort();
        assert_eq!(pipeline.checkpoints().completed(&run_id).unwrap(), checkpointed);

        let report = pipeline.run(RunMode::Resume).await.unwrap();
        assert_eq!(report.run_id, run_id);
        assert_eq!(report.skipped, STEPS[..k]);
        assert_eq!(report.executed, STEPS[k..]);

        // Every step ran exactly once to completion; the failed one twice.
        for (i, s) in STEPS.iter().enumerate() {
            assert_eq!(h.calls(s), if i == k { 2 } else { 1 }, "{s} after failing {step}");
        }
        assert_eq!(h.outputs(), expected, "outputs after failing {step}");
    }
}

#[tokio::test]
async fn test_payload_without_marker_is_reexecuted() {
    let h = Harness::new();
    let mut pipeline = h.pipeline();

    h.fail_once_at("dq_checks");
    pipeline.run(RunMode::Resume).await.unwrap_err();
    let run_id = pipeline.state().current_run_id().unwrap().unwrap();

    // Crash between saving transform's payload and writing its marker.
    pipeline.checkpoints().remove(&run_id, "transform").unwrap();
    assert!(pipeline.state().has_payload(&run_id, "transform"));
    assert_eq!(pipeline.status().unwrap().resume_point.as_deref(), Some("transform"));

    let report = pipeline.run(RunMode::Resume).await.unwrap();
    assert_eq!(report.skipped, ["extract"]);
    assert_eq!(h.calls("extract"), 1);
    assert_eq!(h.calls("transform"), 2);
}

#[tokio::test]
async fn test_failure_isolation_at_dq_checks() {
    let h = Harness::new();
    let mut pipeline = h.pipeline();

    h.fail_once_at("dq_checks");
    let err = pipeline.run(RunMode::Resume).await.unwrap_err();
    assert!(matches!(err, EtlError::StepExecution { ref step, .. } if step == "dq_checks"));

    let run_id = pipeline.state().current_run_id().unwrap().unwrap();
    for step in ["extract", "transform"] {
        assert!(pipeline.checkpoints().exists(&run_id, step));
        assert!(pipeline.state().load(&run_id, step).is_ok());
    }
    for step in ["dq_checks", "analyze", "load"] {
        assert!(!pipeline.checkpoints().exists(&run_id, step));
        assert!(!pipeline.state().has_payload(&run_id, step));
    }

    let history = pipeline.state().history(&run_id, "dq_checks").unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.status, StepStatus::Failed);
    assert_eq!(last.error.as_deref(), Some("injected failure"));

    for (file, _) in OUTPUT_FILES {
        assert!(!h.output_dir().join(file).exists());
    }
}

#[tokio::test]
async fn test_restart_produces_identical_outputs() {
    let h = Harness::new();
    let mut pipeline = h.pipeline();

    let first = pipeline.run(RunMode::Restart).await.unwrap();
    let outputs = h.outputs();

    let second = pipeline.run(RunMode::Restart).await.unwrap();
    assert_eq!(second.executed, STEPS);
    assert_ne!(first.run_id, second.run_id);
    assert_eq!(h.outputs(), outputs);
}

#[tokio::test]
async fn test_invalid_record_fails_extraction() {
    let h = Harness::new();
    let mut records: serde_json::Value = serde_json::from_str(FIXTURE).unwrap();
    records["Paris, France"]
        .as_object_mut()
        .unwrap()
        .remove("current");
    let input = h.config().paths.input_file();
    fs::write(&input, serde_json::to_string(&records).unwrap()).unwrap();

    let mut pipeline = h.pipeline();
    let err = pipeline.run(RunMode::Resume).await.unwrap_err();
    assert_eq!(err.step(), Some("extract"));
    assert!(err.to_string().contains("Paris, France"));

    let run_id = pipeline.state().current_run_id().unwrap().unwrap();
    assert!(pipeline.checkpoints().completed(&run_id).unwrap().is_empty());
}

#[tokio::test]
async fn test_resume_after_killed_process() {
    let h = Harness::new();
    let mut pipeline = h.pipeline();

    h.fail_once_at("transform");
    pipeline.run(RunMode::Resume).await.unwrap_err();
    let run_id = pipeline.state().current_run_id().unwrap().unwrap();
    write_stale_lock(pipeline.checkpoints().dir());

    let report = pipeline.run(RunMode::Resume).await.unwrap();
    assert_eq!(report.run_id, run_id);
    assert_eq!(report.skipped, ["extract"]);
    assert_eq!(report.executed, STEPS[1..]);
    assert_eq!(h.calls("extract"), 1);
    assert!(!pipeline.checkpoints().dir().join(LOCK_FILE).exists());
}

#[tokio::test]
async fn test_strict_lock_refuses_stale_holder() {
    let h = Harness::new();
    let mut config = h.config();
    config.lock.strict = true;
    write_stale_lock(&config.paths.checkpoint_dir());

    let mut pipeline = h.pipeline_with(config);
    let err = pipeline.run(RunMode::Resume).await.unwrap_err();
    assert!(matches!(err, EtlError::StaleLock { pid, .. } if pid == DEAD_PID));
    assert_eq!(pipeline.phase(), RunPhase::Failed);
    assert_eq!(h.calls("extract"), 0);
    assert!(pipeline.checkpoints().dir().join(LOCK_FILE).exists());
}
