// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Containerized command-line tools.
//!
//! File inputs are copied into `<work_dir>/inputs`, the command line is
//! assembled from `baseCommand`, `arguments` and the bound inputs (sorted
//! by position), then run through the container runner when the package
//! names an image, or the native runner otherwise. Outputs are collected
//! from captured stdout or from `outputBinding.glob` matches.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};
use wems_core::package::{ParameterSpec, ParameterType};
use wems_core::{ExecutionKind, LogLevel};

use super::builtin::local_path;
use super::{Adapter, AdapterOutputs, ExecutionRequest, OutputValue};
use crate::error::ExecutionError;
use crate::lifecycle::JobContext;
use crate::runner::container::CONTAINER_WORKDIR;
use crate::runner::{LaunchOptions, Runner, RunnerError};

/// Default name of the captured standard output.
const DEFAULT_STDOUT: &str = "stdout.txt";

/// Runs command-line tools locally or in containers.
pub struct ContainerizedAdapter {
    native: Arc<dyn Runner>,
    container: Arc<dyn Runner>,
    timeout: Duration,
}

impl ContainerizedAdapter {
    /// Create the adapter.
    pub fn new(native: Arc<dyn Runner>, container: Arc<dyn Runner>, timeout: Duration) -> Self {
        Self {
            native,
            container,
            timeout,
        }
    }
}

/// How paths in the working directory appear to the command.
struct PathMapper<'a> {
    work_dir: &'a Path,
    in_container: bool,
}

impl PathMapper<'_> {
    fn visible(&self, path: &Path) -> String {
        match (self.in_container, path.strip_prefix(self.work_dir)) {
            (true, Ok(relative)) => format!("{}/{}", CONTAINER_WORKDIR, relative.display()),
            _ => path.display().to_string(),
        }
    }
}

/// Copy a file input into `<work_dir>/inputs` and return its staged path.
async fn stage_file(
    value: &Value,
    id: &str,
    inputs_dir: &Path,
    index: usize,
) -> Result<PathBuf, ExecutionError> {
    let source = local_path(value, id)?;
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| id.to_string());
    let target = inputs_dir.join(format!("{}_{}_{}", id, index, name));
    tokio::fs::copy(&source, &target).await.map_err(|e| {
        ExecutionError::input(id, format!("cannot stage '{}': {}", source.display(), e))
    })?;
    Ok(target)
}

/// Render one input value as command-line words.
async fn render(
    spec: &ParameterSpec,
    value: &Value,
    inputs_dir: &Path,
    paths: &PathMapper<'_>,
) -> Result<Vec<String>, ExecutionError> {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    let is_file = match &spec.param_type {
        ParameterType::File => true,
        ParameterType::Array(inner) => **inner == ParameterType::File,
        _ => false,
    };

    let mut words = Vec::new();
    for (index, item) in items.into_iter().enumerate() {
        match item {
            _ if is_file => {
                let staged = stage_file(item, &spec.id, inputs_dir, index).await?;
                words.push(paths.visible(&staged));
            }
            Value::String(s) => words.push(s.clone()),
            Value::Bool(_) => {}
            Value::Null => {}
            other => words.push(other.to_string()),
        }
    }
    Ok(words)
}

/// Assemble the full command line.
async fn command_line(
    request: &ExecutionRequest<'_>,
    base: &[String],
    arguments: &[String],
    inputs_dir: &Path,
    paths: &PathMapper<'_>,
) -> Result<Vec<String>, ExecutionError> {
    let mut command: Vec<String> = base.iter().chain(arguments).cloned().collect();

    let mut bound: Vec<&ParameterSpec> = request
        .process
        .inputs
        .iter()
        .filter(|spec| spec.binding.is_some())
        .collect();
    bound.sort_by_key(|spec| (spec.binding.as_ref().map_or(0, |b| b.position), spec.id.clone()));

    for spec in bound {
        let Some(value) = request.inputs.get(&spec.id) else {
            continue;
        };
        let prefix = spec.binding.as_ref().and_then(|b| b.prefix.clone());
        if let Value::Bool(flag) = value {
            if *flag && let Some(prefix) = prefix {
                command.push(prefix);
            }
            continue;
        }
        let words = render(spec, value, inputs_dir, paths).await?;
        if words.is_empty() {
            continue;
        }
        if let Some(prefix) = prefix {
            command.push(prefix);
        }
        command.extend(words);
    }
    Ok(command)
}

/// Collect declared outputs from the working directory.
fn collect_outputs(
    specs: &[ParameterSpec],
    work_dir: &Path,
    stdout: Option<&Path>,
) -> Result<AdapterOutputs, ExecutionError> {
    let mut outputs = AdapterOutputs::new();
    for spec in specs {
        if spec.param_type == ParameterType::Stdout {
            if let Some(path) = stdout {
                outputs.insert(spec.id.clone(), OutputValue::File(path.to_path_buf()));
            }
            continue;
        }
        let Some(pattern) = &spec.glob else {
            if spec.optional {
                continue;
            }
            return Err(ExecutionError::execution_at(
                "output has no outputBinding.glob",
                spec.id.clone(),
            ));
        };

        let full = work_dir.join(pattern);
        let mut matches: Vec<PathBuf> = glob::glob(&full.to_string_lossy())
            .map_err(|e| ExecutionError::PackageRegistration {
                message: format!("invalid glob '{}': {}", pattern, e),
                locator: Some(format!("outputs.{}", spec.id)),
            })?
            .filter_map(|entry| entry.ok())
            .filter(|path| path.is_file())
            .collect();
        matches.sort();

        match (&spec.param_type, matches.len()) {
            (_, 0) if spec.optional => {}
            (_, 0) => {
                return Err(ExecutionError::execution_at(
                    format!("no file matched '{}'", pattern),
                    spec.id.clone(),
                ));
            }
            (ParameterType::Array(_), _) => {
                outputs.insert(spec.id.clone(), OutputValue::Files(matches));
            }
            _ => {
                outputs.insert(spec.id.clone(), OutputValue::File(matches.remove(0)));
            }
        }
    }
    Ok(outputs)
}

#[async_trait]
impl Adapter for ContainerizedAdapter {
    fn kind(&self) -> ExecutionKind {
        ExecutionKind::Containerized
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
        let image = package.container_image().map(str::to_string);
        let paths = PathMapper {
            work_dir: request.work_dir,
            in_container: image.is_some(),
        };

        ctx.progress(5.0, "Staging inputs").await?;
        let inputs_dir = request.work_dir.join("inputs");
        tokio::fs::create_dir_all(&inputs_dir).await?;
        let command = command_line(
            request,
            &package.command.base_command,
            &package.command.arguments,
            &inputs_dir,
            &paths,
        )
        .await?;

        let wants_stdout = package.command.stdout.is_some()
            || request
                .process
                .outputs
                .iter()
                .any(|o| o.param_type == ParameterType::Stdout);
        let stdout_path = wants_stdout.then(|| {
            request
                .work_dir
                .join(package.command.stdout.as_deref().unwrap_or(DEFAULT_STDOUT))
        });

        let options = LaunchOptions {
            job_id: ctx.job_id(),
            image: image.clone(),
            command,
            work_dir: request.work_dir.to_path_buf(),
            env: HashMap::new(),
            stdout_path: stdout_path.clone(),
            timeout: self.timeout,
        };
        let runner = match &image {
            Some(_) => &self.container,
            None => &self.native,
        };
        debug!(job_id = %ctx.job_id(), runner = runner.runner_type(), command = ?options.command, "Launching command");
        ctx.progress(
            10.0,
            &format!("Running command: {}", options.command.join(" ")),
        )
        .await?;

        let result = match runner.run(&options, Some(ctx.cancellation().clone())).await {
            Ok(result) => result,
            Err(RunnerError::Timeout) => return Err(ExecutionError::Timeout(self.timeout)),
            Err(RunnerError::ExitCode { exit_code, stderr }) => {
                if !stderr.is_empty()
                    && let Err(e) = ctx.log(LogLevel::Error, &stderr).await
                {
                    warn!(
                        job_id = %ctx.job_id(),
                        error = %e,
                        "Failed to record command stderr"
                    );
                }
                return Err(RunnerError::ExitCode { exit_code, stderr }.into());
            }
            Err(e) => return Err(e.into()),
        };
        if !result.stderr.is_empty() {
            ctx.log(LogLevel::Debug, &result.stderr).await?;
        }

        ctx.progress(90.0, "Collecting outputs").await?;
        let outputs = collect_outputs(
            &request.process.outputs,
            request.work_dir,
            stdout_path.as_deref(),
        )?;
        ctx.progress(
            100.0,
            &format!("Command finished in {} ms", result.duration_ms),
        )
        .await?;
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn specs(outputs: Value) -> Vec<ParameterSpec> {
        wems_core::Process::from_package(
            Some("tool"),
            json!({
                "class": "CommandLineTool",
                "baseCommand": "true",
                "outputs": outputs,
            }),
        )
        .unwrap()
        .outputs
    }

    #[test]
    fn test_container_paths() {
        let work_dir = PathBuf::from("/data/jobs/1");
        let mapper = PathMapper {
            work_dir: &work_dir,
            in_container: true,
        };
        assert_eq!(
            mapper.visible(&work_dir.join("inputs/a.nc")),
            "/workdir/inputs/a.nc"
        );
        let native = PathMapper {
            work_dir: &work_dir,
            in_container: false,
        };
        assert_eq!(
            native.visible(&work_dir.join("inputs/a.nc")),
            "/data/jobs/1/inputs/a.nc"
        );
    }

    #[test]
    fn test_collect_glob_outputs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.csv"), "b").unwrap();
        std::fs::write(dir.path().join("a.csv"), "a").unwrap();

        let specs = specs(json!({
            "first": {"type": "File", "outputBinding": {"glob": "*.csv"}},
            "all": {"type": "File[]", "outputBinding": {"glob": "*.csv"}},
        }));
        let outputs = collect_outputs(&specs, dir.path(), None).unwrap();
        assert_eq!(outputs["first"], OutputValue::File(dir.path().join("a.csv")));
        assert_eq!(
            outputs["all"],
            OutputValue::Files(vec![dir.path().join("a.csv"), dir.path().join("b.csv")])
        );
    }

    #[test]
    fn test_missing_glob_match() {
        let dir = tempfile::tempdir().unwrap();
        let specs = specs(json!({"result": {"type": "File", "outputBinding": {"glob": "*.nc"}}}));
        let err = collect_outputs(&specs, dir.path(), None).unwrap_err();
        assert_eq!(err.locator(), Some("result"));
    }

    #[test]
    fn test_stdout_output() {
        let dir = tempfile::tempdir().unwrap();
        let stdout = dir.path().join("stdout.txt");
        let specs = specs(json!({"output": {"type": "stdout"}}));
        let outputs = collect_outputs(&specs, dir.path(), Some(&stdout)).unwrap();
        assert_eq!(outputs["output"], OutputValue::File(stdout));
    }
}
