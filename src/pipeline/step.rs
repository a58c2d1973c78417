//! Step names and the handler capability.

use super::RunContext;
use crate::models::{EtlError, Payload};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;

/// The five stages of the weather pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepName {
    Extract,
    Transform,
    DqChecks,
    Analyze,
    Load,
}

impl StepName {
    pub const ALL: [StepName; 5] = [
        Self::Extract,
        Self::Transform,
        Self::DqChecks,
        Self::Analyze,
        Self::Load,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Transform => "transform",
            Self::DqChecks => "dq_checks",
            Self::Analyze => "analyze",
            Self::Load => "load",
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepName {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| EtlError::UnknownStep(s.to_string()))
    }
}

/// A step implementation.
///
/// Handlers receive the merged payloads of their dependencies and return
/// their own output. Any error is treated as a step failure; the handler
/// never touches checkpoints or persisted state.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn run(&self, input: Payload, ctx: &RunContext) -> anyhow::Result<Payload>;
}

/// Adapter turning a synchronous closure into a `StepHandler`.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> StepHandler for FnHandler<F>
where
    F: Fn(Payload, &RunContext) -> anyhow::Result<Payload> + Send + Sync,
{
    async fn run(&self, input: Payload, ctx: &RunContext) -> anyhow::Result<Payload> {
        (self.0)(input, ctx)
    }
}
