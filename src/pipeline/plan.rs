//! Execution order and resume point computation.

use crate::models::{EtlError, Result};

/// Deterministic topological order of `order` under `dependencies_of`.
///
/// Kahn's algorithm; among ready steps the one declared first wins, so a
/// linear chain yields the declared order unchanged.
pub fn execution_plan<F>(order: &[String], dependencies_of: F) -> Result<Vec<String>>
where
    F: Fn(&str) -> Vec<String>,
{
    let index_of = |name: &str| order.iter().position(|s| s == name);

    let mut pending: Vec<usize> = vec![0; order.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); order.len()];
    for (i, step) in order.iter().enumerate() {
        for dep in dependencies_of(step) {
            let d = index_of(&dep).ok_or_else(|| EtlError::UnknownStep(dep.clone()))?;
            pending[i] += 1;
            dependents[d].push(i);
        }
    }

    let mut done = vec![false; order.len()];
    let mut plan = Vec::with_capacity(order.len());
    while let Some(next) = (0..order.len()).find(|&i| !done[i] && pending[i] == 0) {
        done[next] = true;
        plan.push(order[next].clone());
        for &dependent in &dependents[next] {
            pending[dependent] -= 1;
        }
    }

    if plan.len() < order.len() {
        let cycle = order
            .iter()
            .zip(&done)
            .filter(|(_, done)| !**done)
            .map(|(step, _)| step.clone())
            .collect();
        return Err(EtlError::DependencyCycle(cycle));
    }
    Ok(plan)
}

/// Split of the plan into already-checkpointed and still-required steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePlan {
    /// Longest checkpointed prefix of the plan
    pub completed: Vec<String>,
    /// Steps to execute, in order, starting at the resume point
    pub remaining: Vec<String>,
}

impl ResumePlan {
    pub fn compute<F>(plan: &[String], is_checkpointed: F) -> Self
    where
        F: Fn(&str) -> bool,
    {
        let resume_at = plan
            .iter()
            .position(|step| !is_checkpointed(step))
            .unwrap_or(plan.len());
        Self {
            completed: plan[..resume_at].to_vec(),
            remaining: plan[resume_at..].to_vec(),
        }
    }

    /// Everything has to run.
    pub fn fresh(plan: &[String]) -> Self {
        Self {
            completed: Vec::new(),
            remaining: plan.to_vec(),
        }
    }

    /// First step to execute, `None` when the run is complete.
    pub fn resume_point(&self) -> Option<&str> {
        self.remaining.first().map(String::as_str)
    }

    pub fn is_complete(&self) -> bool {
        self.remaining.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn chain(order: &[String]) -> impl Fn(&str) -> Vec<String> + '_ {
        move |step| {
            let i = order.iter().position(|s| s == step).unwrap();
            if i == 0 { Vec::new() } else { vec![order[i - 1].clone()] }
        }
    }

    #[test]
    fn test_linear_chain_keeps_declared_order() {
        let order = names(&["extract", "transform", "dq_checks", "analyze", "load"]);
        assert_eq!(execution_plan(&order, chain(&order)).unwrap(), order);
    }

    #[test]
    fn test_dag_is_topologically_sorted() {
        // "report" is declared first but needs "b", which needs "a".
        let order = names(&["report", "b", "a", "c"]);
        let deps: HashMap<&str, Vec<String>> = HashMap::from([
            ("report", names(&["b", "c"])),
            ("b", names(&["a"])),
            ("a", vec![]),
            ("c", vec![]),
        ]);

        let plan = execution_plan(&order, |s| deps[s].clone()).unwrap();
        assert_eq!(plan, names(&["a", "b", "c", "report"]));
    }

    #[test]
    fn test_cycle_is_reported() {
        let order = names(&["a", "b", "c"]);
        let deps: HashMap<&str, Vec<String>> = HashMap::from([
            ("a", vec![]),
            ("b", names(&["c"])),
            ("c", names(&["b"])),
        ]);

        let err = execution_plan(&order, |s| deps[s].clone()).unwrap_err();
        assert!(matches!(err, EtlError::DependencyCycle(steps) if steps == names(&["b", "c"])));
    }

    #[test]
    fn test_unknown_dependency() {
        let order = names(&["a"]);
        let err = execution_plan(&order, |_| names(&["ghost"])).unwrap_err();
        assert!(matches!(err, EtlError::UnknownStep(s) if s == "ghost"));
    }

    #[test]
    fn test_resume_plan_uses_longest_checkpointed_prefix() {
        let plan = names(&["extract", "transform", "dq_checks", "analyze", "load"]);

        let fresh = ResumePlan::compute(&plan, |_| false);
        assert_eq!(fresh, ResumePlan::fresh(&plan));
        assert_eq!(fresh.resume_point(), Some("extract"));

        // A marker after the first gap does not count.
        let partial = ResumePlan::compute(&plan, |s| matches!(s, "extract" | "transform" | "analyze"));
        assert_eq!(partial.completed, names(&["extract", "transform"]));
        assert_eq!(partial.resume_point(), Some("dq_checks"));
        assert_eq!(partial.remaining.len(), 3);

        let done = ResumePlan::compute(&plan, |_| true);
        assert!(done.is_complete());
        assert_eq!(done.resume_point(), None);
    }
}
