//! Step registry: step name -> handler, plus declared dependencies.

use super::{FnHandler, RunContext, StepHandler, StepName};
use crate::models::{EtlError, Payload, Result, StepsConfig};
use crate::steps;
use std::collections::HashMap;
use std::sync::Arc;

/// Maps step names to handlers and records each step's prerequisites.
///
/// Dependencies are used for ordering and resume computation only; steps
/// always execute one at a time.
#[derive(Clone, Default)]
pub struct StepRegistry {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
    dependencies: HashMap<String, Vec<String>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the five weather handlers.
    pub fn weather() -> Self {
        let mut registry = Self::new();
        registry.register(StepName::Extract.as_str(), steps::Extract);
        registry.register(StepName::Transform.as_str(), steps::Transform);
        registry.register(StepName::DqChecks.as_str(), steps::DqChecks);
        registry.register(StepName::Analyze.as_str(), steps::Analyze);
        registry.register(StepName::Load.as_str(), steps::Load);
        registry
    }

    /// Register (or replace) the handler for `name`.
    pub fn register(&mut self, name: impl Into<String>, handler: impl StepHandler + 'static) {
        self.handlers.insert(name.into(), Arc::new(handler));
    }

    /// Register a synchronous closure as a handler.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Payload, &RunContext) -> anyhow::Result<Payload> + Send + Sync + 'static,
    {
        self.register(name, FnHandler(f));
    }

    /// Declare the prerequisites of `name`, replacing earlier declarations.
    pub fn declare_dependencies(&mut self, name: impl Into<String>, deps: Vec<String>) {
        self.dependencies.insert(name.into(), deps);
    }

    /// Resolve every configured step and record its dependencies.
    ///
    /// Fails with `UnknownStep` before any work begins if the execution
    /// order names a step without a handler.
    pub fn configure(&mut self, steps: &StepsConfig) -> Result<()> {
        for step in &steps.execution_order {
            self.resolve(step)?;
            self.declare_dependencies(step.clone(), steps.dependencies_of(step));
        }
        Ok(())
    }

    /// Handler for `name`.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn StepHandler>> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| EtlError::UnknownStep(name.to_string()))
    }

    /// Declared prerequisites of `name`; empty when none were declared.
    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        self.dependencies.get(name).cloned().unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered step names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("handlers", &self.names())
            .field("dependencies", &self.dependencies)
            .finish()
    }
}
