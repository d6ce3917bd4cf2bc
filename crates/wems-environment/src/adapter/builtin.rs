// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Builtin processes: small file utilities executed in-process.
//!
//! | Function | Inputs | Output |
//! |----------|--------|--------|
//! | `echo` | `message: string` | `output`: file holding the message |
//! | `file2string_array` | `input: File` | `output`: JSON file `["<path>"]` |
//! | `file_index_selector` | `files: File[]`, `index: int` | `output`: the selected file |
//! | `jsonarray2files` | `input: File` (JSON array of references) | `output`: the files |

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use wems_core::package::file_reference;
use wems_core::{ExecutionKind, ExecutionRequirement};

use super::{Adapter, AdapterOutputs, ExecutionRequest, OutputValue};
use crate::error::ExecutionError;
use crate::lifecycle::JobContext;

/// Signature of a builtin function.
pub type BuiltinFn = fn(&Map<String, Value>, &Path) -> Result<AdapterOutputs, ExecutionError>;

/// Executes registered builtin functions.
pub struct BuiltinAdapter {
    functions: HashMap<&'static str, BuiltinFn>,
}

impl Default for BuiltinAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl BuiltinAdapter {
    /// Adapter with the standard functions registered.
    pub fn new() -> Self {
        let mut functions: HashMap<&'static str, BuiltinFn> = HashMap::new();
        functions.insert("echo", echo);
        functions.insert("file2string_array", file2string_array);
        functions.insert("file_index_selector", file_index_selector);
        functions.insert("jsonarray2files", jsonarray2files);
        Self { functions }
    }

    /// Register an extra function.
    pub fn register(&mut self, name: &'static str, function: BuiltinFn) {
        self.functions.insert(name, function);
    }

    /// Whether `name` is registered.
    pub fn has(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

#[async_trait]
impl Adapter for BuiltinAdapter {
    fn kind(&self) -> ExecutionKind {
        ExecutionKind::Builtin
    }

    async fn execute(
        &self,
        ctx: &JobContext,
        request: &ExecutionRequest<'_>,
    ) -> Result<AdapterOutputs, ExecutionError> {
        let name = match &request.process.requirement {
            Some(ExecutionRequirement::Builtin { function }) => function.as_str(),
            _ => {
                return Err(ExecutionError::PackageRegistration {
                    message: "process has no builtin requirement".to_string(),
                    locator: Some("requirements".to_string()),
                });
            }
        };
        let function = *self
            .functions
            .get(name)
            .ok_or_else(|| ExecutionError::PackageRegistration {
                message: format!("unknown builtin function '{}'", name),
                locator: Some("requirements.BuiltinRequirement".to_string()),
            })?;

        ctx.progress(10.0, &format!("Running builtin '{}'", name))
            .await?;
        let inputs = request.inputs.clone();
        let work_dir = request.work_dir.to_path_buf();
        let outputs = tokio::task::spawn_blocking(move || function(&inputs, &work_dir))
            .await
            .map_err(|e| ExecutionError::execution(format!("builtin task failed: {}", e)))??;
        ctx.progress(100.0, &format!("Builtin '{}' complete", name))
            .await?;
        Ok(outputs)
    }
}

fn input<'a>(inputs: &'a Map<String, Value>, id: &str) -> Result<&'a Value, ExecutionError> {
    inputs
        .get(id)
        .ok_or_else(|| ExecutionError::input(id, "missing required input"))
}

/// Local path of a file reference (`/path`, `file:///path`, or an object
/// carrying one).
pub(crate) fn local_path(value: &Value, id: &str) -> Result<PathBuf, ExecutionError> {
    let reference =
        file_reference(value).ok_or_else(|| ExecutionError::input(id, "not a file reference"))?;
    if reference.starts_with("http://") || reference.starts_with("https://") {
        return Err(ExecutionError::input(
            id,
            format!("remote file '{}' cannot be read locally", reference),
        ));
    }
    let path = PathBuf::from(reference.strip_prefix("file://").unwrap_or(reference));
    if !path.is_file() {
        return Err(ExecutionError::input(
            id,
            format!("file '{}' does not exist", path.display()),
        ));
    }
    Ok(path)
}

fn single(path: PathBuf) -> AdapterOutputs {
    AdapterOutputs::from([("output".to_string(), OutputValue::File(path))])
}

fn echo(inputs: &Map<String, Value>, work_dir: &Path) -> Result<AdapterOutputs, ExecutionError> {
    let message = input(inputs, "message")?
        .as_str()
        .ok_or_else(|| ExecutionError::input("message", "expected a string"))?;
    let path = work_dir.join("output.txt");
    std::fs::write(&path, message)?;
    Ok(single(path))
}

fn file2string_array(
    inputs: &Map<String, Value>,
    work_dir: &Path,
) -> Result<AdapterOutputs, ExecutionError> {
    let source = local_path(input(inputs, "input")?, "input")?;
    let path = work_dir.join("output.json");
    let document = serde_json::to_string(&[source.display().to_string()])
        .map_err(|e| ExecutionError::execution(e.to_string()))?;
    std::fs::write(&path, document)?;
    Ok(single(path))
}

fn file_index_selector(
    inputs: &Map<String, Value>,
    _work_dir: &Path,
) -> Result<AdapterOutputs, ExecutionError> {
    let files = input(inputs, "files")?
        .as_array()
        .ok_or_else(|| ExecutionError::input("files", "expected an array of files"))?;
    let index = input(inputs, "index")?
        .as_u64()
        .ok_or_else(|| ExecutionError::input("index", "expected a non-negative integer"))?;
    let selected = files.get(index as usize).ok_or_else(|| {
        ExecutionError::input(
            "index",
            format!("index {} out of range for {} file(s)", index, files.len()),
        )
    })?;
    Ok(single(local_path(selected, "files")?))
}

fn jsonarray2files(
    inputs: &Map<String, Value>,
    _work_dir: &Path,
) -> Result<AdapterOutputs, ExecutionError> {
    let source = local_path(input(inputs, "input")?, "input")?;
    let content = std::fs::read_to_string(&source)?;
    let document: Value = serde_json::from_str(&content)
        .map_err(|e| ExecutionError::input("input", format!("invalid JSON: {}", e)))?;
    let items = document
        .as_array()
        .ok_or_else(|| ExecutionError::input("input", "expected a JSON array"))?;
    let files = items
        .iter()
        .map(|item| local_path(item, "input"))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(AdapterOutputs::from([(
        "output".to_string(),
        OutputValue::Files(files),
    )]))
}
