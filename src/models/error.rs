//! Error types for weather-etl.
//!
//! Taxonomy:
//! - Plan errors: the configured pipeline cannot be resolved (fatal at startup)
//! - State errors: the on-disk state directory disagrees with the checkpoints
//! - Step errors: a handler failed, the run halts and can be resumed later
//! - Durability errors: a write that guards the checkpoint invariant failed

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Boxed error produced by a step handler.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error type for weather-etl.
#[derive(Debug, Error)]
pub enum EtlError {
    // ═══════════════════════════════════════════════════════════════════
    // PLAN: configuration cannot be turned into an executable pipeline
    // ═══════════════════════════════════════════════════════════════════

    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Unknown step: '{0}' is not registered")]
    UnknownStep(String),

    #[error("Dependency cycle between steps: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    // ═══════════════════════════════════════════════════════════════════
    // STATE: persisted state is missing, corrupt or held by another run
    // ═══════════════════════════════════════════════════════════════════

    #[error("No saved state for step '{step}' (expected {path})")]
    MissingState { step: String, path: PathBuf },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Pipeline is already running (pid {pid}, since {since})")]
    RunLocked { pid: u32, since: String },

    #[error("Stale run lock at {path} left by pid {pid}; remove it to continue")]
    StaleLock { path: PathBuf, pid: u32 },

    // ═══════════════════════════════════════════════════════════════════
    // STEP: a handler failed
    // ═══════════════════════════════════════════════════════════════════

    #[error("Step '{step}' failed after {elapsed:?}: {source}")]
    StepExecution {
        step: String,
        elapsed: Duration,
        #[source]
        source: BoxError,
    },

    // ═══════════════════════════════════════════════════════════════════
    // DURABILITY: always fatal, never swallowed
    // ═══════════════════════════════════════════════════════════════════

    #[error("Failed to write checkpoint for step '{step}'")]
    CheckpointWrite {
        step: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write state: {context}")]
    StateWrite {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EtlError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a state write error with context.
    pub fn state_write(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::StateWrite {
            context: context.into(),
            source,
        }
    }

    /// Wrap a handler failure for `step`.
    pub fn step_failed(step: impl Into<String>, elapsed: Duration, source: impl Into<BoxError>) -> Self {
        Self::StepExecution {
            step: step.into(),
            elapsed,
            source: source.into(),
        }
    }

    /// True for failures that leave checkpoint and payload durability in doubt.
    pub fn is_durability_failure(&self) -> bool {
        matches!(self, Self::CheckpointWrite { .. } | Self::StateWrite { .. })
    }

    /// Name of the step this error is attributed to, if any.
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::StepExecution { step, .. }
            | Self::CheckpointWrite { step, .. }
            | Self::MissingState { step, .. } => Some(step),
            Self::UnknownStep(step) => Some(step),
            _ => None,
        }
    }
}

/// Result type alias for weather-etl.
pub type Result<T> = std::result::Result<T, EtlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_execution_keeps_source_chain() {
        let cause = anyhow::anyhow!("column missing").context("building forecast table");
        let err = EtlError::step_failed("transform", Duration::from_millis(12), cause);

        assert_eq!(err.step(), Some("transform"));
        assert!(err.to_string().contains("building forecast table"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_durability_classification() {
        let io = || std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        assert!(EtlError::state_write("saving payload", io()).is_durability_failure());
        assert!(EtlError::CheckpointWrite {
            step: "load".into(),
            source: io()
        }
        .is_durability_failure());
        assert!(!EtlError::io("reading input", io()).is_durability_failure());
    }
}
