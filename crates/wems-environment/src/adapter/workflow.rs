// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflow execution.
//!
//! Steps run in dependency batches; steps within a batch run concurrently.
//! Each step runs the deployed process named by its `run` field through the
//! adapter for that process's kind, in its own subdirectory, with its own
//! slice of the workflow's progress range.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::Map;
use tracing::info;
use wems_core::package::WorkflowStep;
use wems_core::workflow::{StepGraph, StepSource};
use wems_core::{CoreError, ExecutionKind, Process, ProcessRepository};

use super::{Adapter, AdapterOutputs, ExecutionRequest, OutputValue, require_outputs};
use crate::error::ExecutionError;
use crate::lifecycle::JobContext;

/// Executes workflow packages.
pub struct WorkflowAdapter {
    processes: Arc<dyn ProcessRepository>,
}

impl WorkflowAdapter {
    /// Create the adapter.
    pub fn new(processes: Arc<dyn ProcessRepository>) -> Self {
        Self { processes }
    }

    async fn step_process(&self, step: &WorkflowStep) -> Result<Process, ExecutionError> {
        self.processes
            .get(&step.run)
            .await?
            .ok_or_else(|| {
                ExecutionError::execution_at(
                    format!("step process '{}' is not deployed", step.run),
                    format!("steps.{}", step.id),
                )
            })
    }

    /// Run one step and return its outputs.
    async fn run_step(
        &self,
        ctx: &JobContext,
        request: &ExecutionRequest<'_>,
        step: &WorkflowStep,
        produced: &HashMap<String, AdapterOutputs>,
        slice: (f64, f64),
    ) -> Result<AdapterOutputs, ExecutionError> {
        let process = self.step_process(step).await?;
        let child = ctx.child(slice.0, slice.1, &step.id);

        let mut raw = Map::new();
        for (input_id, source) in &step.inputs {
            let value = match StepSource::parse(source) {
                StepSource::WorkflowInput(id) => request.inputs.get(id).cloned(),
                StepSource::StepOutput { step, output } => produced
                    .get(step)
                    .and_then(|outputs| outputs.get(output))
                    .map(OutputValue::to_input),
            };
            if let Some(value) = value {
                raw.insert(input_id.clone(), value);
            }
        }
        let inputs = process.validate_inputs(&raw).map_err(|e| match e {
            CoreError::InvalidInput { input_id, message } => {
                ExecutionError::input(format!("{}.{}", step.id, input_id), message)
            }
            other => ExecutionError::Repository(other),
        })?;

        let work_dir = request.work_dir.join(&step.id);
        tokio::fs::create_dir_all(&work_dir).await?;

        child
            .progress(
                0.0,
                &format!("Running step '{}' (process '{}')", step.id, process.id),
            )
            .await?;
        let expected = step.outputs.clone();
        let step_request = ExecutionRequest {
            process: &process,
            inputs: &inputs,
            work_dir: &work_dir,
            expected_outputs: &expected,
        };
        let outputs = ctx
            .adapters()
            .select(process.kind)
            .execute(&child, &step_request)
            .await
            .map_err(|e| match e {
                ExecutionError::Execution {
                    message,
                    locator,
                    exit_code,
                } => ExecutionError::Execution {
                    message,
                    locator: Some(match locator {
                        Some(inner) => format!("steps.{}.{}", step.id, inner),
                        None => format!("steps.{}", step.id),
                    }),
                    exit_code,
                },
                other => other,
            })?;
        require_outputs(&outputs, &expected)?;
        child.progress(100.0, &format!("Step '{}' complete", step.id)).await?;
        Ok(outputs)
    }
}

#[async_trait]
impl Adapter for WorkflowAdapter {
    fn kind(&self) -> ExecutionKind {
        ExecutionKind::Workflow
    }

    async fn execute(
        &self,
        ctx: &JobContext,
        request: &ExecutionRequest<'_>,
    ) -> Result<AdapterOutputs, ExecutionError> {
        let package = request
            .process
            .definition()
            .map_err(|e| ExecutionError::PackageRegistration {
                message: e.to_string(),
                locator: None,
            })?;
        let plan = StepGraph::from_package(&package)
            .and_then(|graph| graph.plan())
            .map_err(|e| ExecutionError::PackageRegistration {
                message: e.to_string(),
                locator: Some("steps".to_string()),
            })?;
        let steps: HashMap<&str, &WorkflowStep> =
            package.steps.iter().map(|s| (s.id.as_str(), s)).collect();

        info!(
            job_id = %ctx.job_id(),
            steps = plan.total_steps,
            batches = plan.batches.len(),
            "Running workflow"
        );

        let total = plan.total_steps.max(1) as f64;
        let mut produced: HashMap<String, AdapterOutputs> = HashMap::new();
        let mut position = 0usize;

        for batch in &plan.batches {
            if ctx.is_cancelled() {
                return Err(ExecutionError::Cancelled);
            }

            let mut runs = Vec::with_capacity(batch.len());
            for step_id in batch {
                let step = steps.get(step_id.as_str()).copied().ok_or_else(|| {
                    ExecutionError::execution_at("step missing from plan", step_id.clone())
                })?;
                let slice = (
                    position as f64 * 100.0 / total,
                    (position + 1) as f64 * 100.0 / total,
                );
                position += 1;
                let produced = &produced;
                runs.push(async move {
                    self.run_step(ctx, request, step, produced, slice)
                        .await
                        .map(|outputs| (step.id.clone(), outputs))
                });
            }

            for (step_id, outputs) in try_join_all(runs).await? {
                produced.insert(step_id, outputs);
            }
        }

        let mut outputs = AdapterOutputs::new();
        for spec in &request.process.outputs {
            let Some(source) = &spec.output_source else {
                continue;
            };
            if let StepSource::StepOutput { step, output } = StepSource::parse(source)
                && let Some(value) = produced.get(step).and_then(|o| o.get(output))
            {
                outputs.insert(spec.id.clone(), value.clone());
            }
        }
        require_outputs(&outputs, request.expected_outputs)?;
        Ok(outputs)
    }
}
