// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflow step graph and execution planning.
//!
//! Step inputs reference either a workflow input (`message`) or another
//! step's output (`first/output`). Those references form a DAG; steps are
//! grouped into batches whose members only depend on earlier batches.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::error::{CoreError, Result};
use crate::package::{Package, WorkflowStep};

/// Where a step input or workflow output takes its value from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepSource<'a> {
    /// A workflow-level input.
    WorkflowInput(&'a str),
    /// An output of another step.
    StepOutput {
        /// Producing step.
        step: &'a str,
        /// Output ID on that step.
        output: &'a str,
    },
}

impl<'a> StepSource<'a> {
    /// Parse a `step/output` or `input` reference.
    pub fn parse(source: &'a str) -> StepSource<'a> {
        match source.split_once('/') {
            Some((step, output)) => StepSource::StepOutput { step, output },
            None => StepSource::WorkflowInput(source),
        }
    }
}

/// Ordered execution plan for a workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepPlan {
    /// Step IDs grouped into batches that can run concurrently.
    pub batches: Vec<Vec<String>>,
    /// Number of steps.
    pub total_steps: usize,
}

/// Dependency graph of workflow steps.
pub struct StepGraph {
    /// Step ID to the steps it consumes outputs from.
    dependencies: BTreeMap<String, BTreeSet<String>>,
}

impl StepGraph {
    /// Build the graph, validating every reference.
    pub fn from_package(package: &Package) -> Result<Self> {
        let workflow_inputs: HashSet<&str> = package.inputs.iter().map(|p| p.id.as_str()).collect();
        let steps: HashMap<&str, &WorkflowStep> =
            package.steps.iter().map(|s| (s.id.as_str(), s)).collect();

        let check = |source: &str, locator: String| -> Result<Option<String>> {
            match StepSource::parse(source) {
                StepSource::WorkflowInput(id) if workflow_inputs.contains(id) => Ok(None),
                StepSource::WorkflowInput(id) => Err(CoreError::package(
                    format!("unknown workflow input '{}'", id),
                    Some(&locator),
                )),
                StepSource::StepOutput { step, output } => {
                    let producer = steps.get(step).ok_or_else(|| {
                        CoreError::package(format!("unknown step '{}'", step), Some(&locator))
                    })?;
                    if !producer.outputs.iter().any(|o| o == output) {
                        return Err(CoreError::package(
                            format!("step '{}' has no output '{}'", step, output),
                            Some(&locator),
                        ));
                    }
                    Ok(Some(step.to_string()))
                }
            }
        };

        let mut dependencies = BTreeMap::new();
        for step in &package.steps {
            let mut feeding = BTreeSet::new();
            for (input_id, source) in &step.inputs {
                let locator = format!("steps.{}.in.{}", step.id, input_id);
                if let Some(producer) = check(source, locator)? {
                    if producer == step.id {
                        return Err(CoreError::package(
                            "step depends on its own output",
                            Some(&format!("steps.{}", step.id)),
                        ));
                    }
                    feeding.insert(producer);
                }
            }
            dependencies.insert(step.id.clone(), feeding);
        }

        for output in &package.outputs {
            let locator = format!("outputs.{}", output.id);
            let source = output.output_source.as_deref().ok_or_else(|| {
                CoreError::package("workflow output without 'outputSource'", Some(&locator))
            })?;
            check(source, locator)?;
        }

        Ok(Self { dependencies })
    }

    /// Order steps into concurrent batches, rejecting cycles.
    ///
    /// Kahn's algorithm, one layer at a time: every step whose dependencies
    /// are all planned joins the next batch.
    pub fn plan(&self) -> Result<StepPlan> {
        let mut in_degree: BTreeMap<&str, usize> = self
            .dependencies
            .iter()
            .map(|(step, deps)| (step.as_str(), deps.len()))
            .collect();
        let mut consumers: HashMap<&str, Vec<&str>> = HashMap::new();
        for (step, deps) in &self.dependencies {
            for dep in deps {
                consumers.entry(dep.as_str()).or_default().push(step.as_str());
            }
        }

        let mut batches = Vec::new();
        let mut ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(step, _)| *step)
            .collect();
        let mut planned = 0;

        while !ready.is_empty() {
            planned += ready.len();
            let mut next = Vec::new();
            for step in &ready {
                in_degree.remove(step);
                for consumer in consumers.get(step).into_iter().flatten() {
                    if let Some(degree) = in_degree.get_mut(consumer) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(*consumer);
                        }
                    }
                }
            }
            let mut batch: Vec<String> = ready.iter().map(|s| s.to_string()).collect();
            batch.sort();
            batches.push(batch);
            ready = next;
        }

        if planned != self.dependencies.len() {
            let blocked = in_degree.keys().next().copied().unwrap_or_default();
            return Err(CoreError::package(
                format!("workflow steps form a cycle through '{}'", blocked),
                Some("steps"),
            ));
        }

        Ok(StepPlan {
            batches,
            total_steps: self.dependencies.len(),
        })
    }

    /// Steps feeding the given step.
    pub fn dependencies(&self, step_id: &str) -> Vec<String> {
        self.dependencies
            .get(step_id)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn workflow(steps: Value, outputs: Value) -> Package {
        Package::parse(json!({
            "class": "Workflow",
            "inputs": {"message": "string"},
            "outputs": outputs,
            "steps": steps
        }))
        .unwrap()
    }

    #[test]
    fn test_linear_chain() {
        let package = workflow(
            json!({
                "a": {"run": "echo", "in": {"message": "message"}, "out": ["output"]},
                "b": {"run": "file2string_array", "in": {"input": "a/output"}, "out": ["output"]}
            }),
            json!({"result": {"type": "Any", "outputSource": "b/output"}}),
        );
        let plan = StepGraph::from_package(&package).unwrap().plan().unwrap();
        assert_eq!(plan.batches, vec![vec!["a".to_string()], vec!["b".to_string()]]);
        assert_eq!(plan.total_steps, 2);
    }

    #[test]
    fn test_independent_steps_share_a_batch() {
        let package = workflow(
            json!({
                "left": {"run": "echo", "in": {"message": "message"}, "out": ["output"]},
                "right": {"run": "echo", "in": {"message": "message"}, "out": ["output"]},
                "join": {"run": "jsonarray2files", "in": {"a": "left/output", "b": "right/output"}, "out": ["output"]}
            }),
            json!({"result": {"type": "Any", "outputSource": "join/output"}}),
        );
        let graph = StepGraph::from_package(&package).unwrap();
        let plan = graph.plan().unwrap();
        assert_eq!(plan.batches.len(), 2);
        assert_eq!(plan.batches[0], vec!["left".to_string(), "right".to_string()]);
        let mut deps = graph.dependencies("join");
        deps.sort();
        assert_eq!(deps, vec!["left".to_string(), "right".to_string()]);
    }

    #[test]
    fn test_cycle_rejected() {
        let package = workflow(
            json!({
                "a": {"run": "echo", "in": {"message": "b/output"}, "out": ["output"]},
                "b": {"run": "echo", "in": {"message": "a/output"}, "out": ["output"]}
            }),
            json!({"result": {"type": "Any", "outputSource": "b/output"}}),
        );
        let err = StepGraph::from_package(&package).unwrap().plan().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_unknown_references_rejected() {
        let unknown_step = workflow(
            json!({"a": {"run": "echo", "in": {"message": "ghost/output"}, "out": ["output"]}}),
            json!({"result": {"type": "Any", "outputSource": "a/output"}}),
        );
        assert!(StepGraph::from_package(&unknown_step).is_err());

        let unknown_output = workflow(
            json!({"a": {"run": "echo", "in": {"message": "message"}, "out": ["output"]}}),
            json!({"result": {"type": "Any", "outputSource": "a/missing"}}),
        );
        assert!(StepGraph::from_package(&unknown_output).is_err());

        let unknown_input = workflow(
            json!({"a": {"run": "echo", "in": {"message": "nope"}, "out": ["output"]}}),
            json!({"result": {"type": "Any", "outputSource": "a/output"}}),
        );
        assert!(StepGraph::from_package(&unknown_input).is_err());
    }
}
