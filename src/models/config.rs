//! Configuration models for weather-etl.
//!
//! The configuration is loaded once per run and treated as an immutable
//! value for the rest of the run.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Top-level configuration for weather-etl.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Filesystem layout
    pub paths: PathsConfig,

    /// Step sequencing
    #[serde(default)]
    pub steps: StepsConfig,

    /// Transform step tuning
    #[serde(default)]
    pub transform: TransformConfig,

    /// What survives a successful run
    #[serde(default)]
    pub cleanup: CleanupConfig,

    /// Running-indicator policy
    #[serde(default)]
    pub lock: LockConfig,
}

/// Filesystem layout. Every directory is resolved relative to `root`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Data root (supports ${VAR} expansion)
    pub root: PathBuf,

    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,

    /// Raw weather JSON inside `input_dir`
    #[serde(default = "default_input_file")]
    pub input_file: PathBuf,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,

    #[serde(default = "default_metrics_dir")]
    pub metrics_dir: PathBuf,
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("input")
}

fn default_input_file() -> PathBuf {
    PathBuf::from("weather.json")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("checkpoints")
}

fn default_metrics_dir() -> PathBuf {
    PathBuf::from("metrics")
}

impl PathsConfig {
    /// Layout rooted at `root` with every directory at its default name.
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            input_dir: default_input_dir(),
            input_file: default_input_file(),
            output_dir: default_output_dir(),
            state_dir: default_state_dir(),
            checkpoint_dir: default_checkpoint_dir(),
            metrics_dir: default_metrics_dir(),
        }
    }

    fn resolve(&self, dir: &Path) -> PathBuf {
        let root = PathBuf::from(expand_env_vars(&self.root.to_string_lossy()));
        root.join(expand_env_vars(&dir.to_string_lossy()))
    }

    pub fn input_file(&self) -> PathBuf {
        self.resolve(&self.input_dir).join(&self.input_file)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.resolve(&self.output_dir)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.resolve(&self.state_dir)
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.resolve(&self.checkpoint_dir)
    }

    pub fn metrics_dir(&self) -> PathBuf {
        self.resolve(&self.metrics_dir)
    }
}

/// Step sequencing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepsConfig {
    /// Declared execution order
    #[serde(default = "default_execution_order")]
    pub execution_order: Vec<String>,

    /// Prerequisites per step. A step that is not listed depends on the
    /// step declared before it; an explicit empty list makes it a root.
    #[serde(default)]
    pub dependencies: HashMap<String, Vec<String>>,

    /// Record per-attempt metadata history
    #[serde(default = "default_true")]
    pub save_metadata: bool,
}

fn default_execution_order() -> Vec<String> {
    ["extract", "transform", "dq_checks", "analyze", "load"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_true() -> bool {
    true
}

impl Default for StepsConfig {
    fn default() -> Self {
        Self {
            execution_order: default_execution_order(),
            dependencies: HashMap::new(),
            save_metadata: true,
        }
    }
}

impl StepsConfig {
    /// Prerequisites of `step` after applying the implicit-chain rule.
    pub fn dependencies_of(&self, step: &str) -> Vec<String> {
        if let Some(deps) = self.dependencies.get(step) {
            return deps.clone();
        }
        let position = self.execution_order.iter().position(|s| s == step);
        match position {
            Some(idx) if idx > 0 => vec![self.execution_order[idx - 1].clone()],
            _ => Vec::new(),
        }
    }
}

/// Transform step tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Maximum locations flattened concurrently
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

fn default_max_workers() -> usize {
    4
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
        }
    }
}

/// Post-success cleanup policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Keep metadata history under `metrics_dir/<run_id>` after success
    #[serde(default)]
    pub retain_history: bool,
}

/// Running-indicator policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LockConfig {
    /// Refuse to take over a lock left behind by a crashed process
    #[serde(default)]
    pub strict: bool,
}

impl Config {
    /// Configuration with default step settings rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            paths: PathsConfig::rooted_at(root),
            steps: StepsConfig::default(),
            transform: TransformConfig::default(),
            cleanup: CleanupConfig::default(),
            lock: LockConfig::default(),
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks that do not need the step registry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.steps.execution_order.is_empty() {
            return Err(ConfigError::EmptyExecutionOrder);
        }

        let mut seen = HashSet::new();
        for step in &self.steps.execution_order {
            if !seen.insert(step.as_str()) {
                return Err(ConfigError::DuplicateStep(step.clone()));
            }
        }

        for (step, deps) in &self.steps.dependencies {
            if !seen.contains(step.as_str()) {
                return Err(ConfigError::UndeclaredStep {
                    step: step.clone(),
                    referenced_by: "[steps.dependencies]".to_string(),
                });
            }
            for dep in deps {
                if !seen.contains(dep.as_str()) {
                    return Err(ConfigError::UndeclaredStep {
                        step: dep.clone(),
                        referenced_by: step.clone(),
                    });
                }
            }
        }

        let plan = crate::pipeline::execution_plan(&self.steps.execution_order, |step| {
            self.steps.dependencies_of(step)
        });
        if let Err(super::EtlError::DependencyCycle(steps)) = plan {
            return Err(ConfigError::DependencyCycle(steps));
        }

        if self.transform.max_workers == 0 {
            return Err(ConfigError::Invalid(
                "transform.max_workers must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let Ok(re) = regex::Regex::new(r"\$\{([^}]+)\}") else {
        return s.to_string();
    };

    let mut result = s.to_string();
    for cap in re.captures_iter(s) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("steps.execution_order is empty")]
    EmptyExecutionOrder,

    #[error("Step '{0}' appears more than once in steps.execution_order")]
    DuplicateStep(String),

    #[error("Step '{step}' (referenced by {referenced_by}) is not in steps.execution_order")]
    UndeclaredStep { step: String, referenced_by: String },

    #[error("Dependency cycle between steps: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
