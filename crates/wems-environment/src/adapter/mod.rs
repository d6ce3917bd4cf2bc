// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Execution adapters.
//!
//! An adapter runs one process with validated inputs inside a job's working
//! directory and returns its outputs. Which adapter runs a process is a
//! pure function of the process's [`ExecutionKind`], resolved once at
//! deploy time; [`AdapterSet::select`] is the only place that maps a kind to
//! an adapter.
//!
//! | Kind | Adapter |
//! |------|---------|
//! | `builtin` | [`BuiltinAdapter`] |
//! | `containerized` | [`ContainerizedAdapter`] |
//! | `remote-v1`, `remote-ogc`, `remote-esgf` | [`RemoteAdapter`] |
//! | `workflow` | [`WorkflowAdapter`] |

pub mod builtin;
pub mod containerized;
pub mod remote;
pub mod workflow;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use wems_core::{ExecutionKind, Process, ProcessRepository, ServiceRepository};

use crate::config::Config;
use crate::error::ExecutionError;
use crate::lifecycle::JobContext;
use crate::runner::Runner;

pub use builtin::BuiltinAdapter;
pub use containerized::ContainerizedAdapter;
pub use remote::{ProgressCheckpoints, RemoteAdapter, RemoteProtocol, RetryPolicy};
pub use workflow::WorkflowAdapter;

/// One output produced by an adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputValue {
    /// A file in the working directory.
    File(PathBuf),
    /// Several files, for array outputs.
    Files(Vec<PathBuf>),
    /// A literal value.
    Literal(Value),
    /// A file held by a remote service.
    Reference(String),
}

impl OutputValue {
    /// Result document recorded on the job.
    pub fn to_result(&self) -> Value {
        match self {
            OutputValue::File(path) => json!({ "href": path.display().to_string() }),
            OutputValue::Files(paths) => Value::Array(
                paths
                    .iter()
                    .map(|p| json!({ "href": p.display().to_string() }))
                    .collect(),
            ),
            OutputValue::Literal(value) => json!({ "value": value }),
            OutputValue::Reference(href) => json!({ "href": href }),
        }
    }

    /// Value passed as an input to a downstream workflow step.
    pub fn to_input(&self) -> Value {
        match self {
            OutputValue::File(path) => Value::String(path.display().to_string()),
            OutputValue::Files(paths) => Value::Array(
                paths
                    .iter()
                    .map(|p| Value::String(p.display().to_string()))
                    .collect(),
            ),
            OutputValue::Literal(value) => value.clone(),
            OutputValue::Reference(href) => Value::String(href.clone()),
        }
    }
}

/// Outputs by output ID.
pub type AdapterOutputs = BTreeMap<String, OutputValue>;

/// What an adapter is asked to run.
pub struct ExecutionRequest<'a> {
    /// The deployed process.
    pub process: &'a Process,
    /// Validated inputs, defaults applied.
    pub inputs: &'a Map<String, Value>,
    /// Exclusive working directory.
    pub work_dir: &'a Path,
    /// Output IDs the caller expects back.
    pub expected_outputs: &'a [String],
}

/// Executes processes of one kind.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Kind handled by this adapter.
    fn kind(&self) -> ExecutionKind;

    /// Run the process.
    ///
    /// Reports progress through `ctx` on the 0-100 local scale and observes
    /// `ctx`'s cancellation token. On success every ID in
    /// `request.expected_outputs` is present in the returned map.
    async fn execute(
        &self,
        ctx: &JobContext,
        request: &ExecutionRequest<'_>,
    ) -> Result<AdapterOutputs, ExecutionError>;
}

/// The closed set of adapters.
pub struct AdapterSet {
    /// In-process functions.
    pub builtin: BuiltinAdapter,
    /// Local command lines, optionally in containers.
    pub containerized: ContainerizedAdapter,
    /// WPS 1.0 services.
    pub remote_v1: RemoteAdapter,
    /// OGC API - Processes services.
    pub remote_ogc: RemoteAdapter,
    /// ESGF compute services.
    pub remote_esgf: RemoteAdapter,
    /// Multi-step workflows.
    pub workflow: WorkflowAdapter,
}

impl AdapterSet {
    /// Build the default adapters.
    pub fn new(
        config: &Config,
        processes: Arc<dyn ProcessRepository>,
        services: Arc<dyn ServiceRepository>,
        native: Arc<dyn Runner>,
        container: Arc<dyn Runner>,
        http: reqwest::Client,
    ) -> Self {
        let remote = |protocol| RemoteAdapter::new(protocol, http.clone(), services.clone(), config);
        Self {
            builtin: BuiltinAdapter::new(),
            containerized: ContainerizedAdapter::new(native, container, config.job_timeout),
            remote_v1: remote(RemoteProtocol::V1),
            remote_ogc: remote(RemoteProtocol::Ogc),
            remote_esgf: remote(RemoteProtocol::Esgf),
            workflow: WorkflowAdapter::new(processes),
        }
    }

    /// Adapter for `kind`.
    pub fn select(&self, kind: ExecutionKind) -> &dyn Adapter {
        match kind {
            ExecutionKind::Builtin => &self.builtin,
            ExecutionKind::Containerized => &self.containerized,
            ExecutionKind::RemoteV1 => &self.remote_v1,
            ExecutionKind::RemoteOgc => &self.remote_ogc,
            ExecutionKind::RemoteEsgf => &self.remote_esgf,
            ExecutionKind::Workflow => &self.workflow,
        }
    }
}

/// Check that every expected output is present.
pub(crate) fn require_outputs(
    outputs: &AdapterOutputs,
    expected: &[String],
) -> Result<(), ExecutionError> {
    match expected.iter().find(|id| !outputs.contains_key(*id)) {
        Some(missing) => Err(ExecutionError::execution_at(
            "expected output was not produced",
            missing.clone(),
        )),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_documents() {
        assert_eq!(
            OutputValue::File(PathBuf::from("/data/out.txt")).to_result(),
            json!({"href": "/data/out.txt"})
        );
        assert_eq!(
            OutputValue::Literal(json!(3)).to_result(),
            json!({"value": 3})
        );
        assert_eq!(
            OutputValue::Files(vec![PathBuf::from("/a"), PathBuf::from("/b")]).to_input(),
            json!(["/a", "/b"])
        );
    }

    #[test]
    fn test_require_outputs() {
        let mut outputs = AdapterOutputs::new();
        outputs.insert("output".to_string(), OutputValue::Literal(json!(1)));
        assert!(require_outputs(&outputs, &["output".to_string()]).is_ok());
        let err = require_outputs(&outputs, &["other".to_string()]).unwrap_err();
        assert_eq!(err.locator(), Some("other"));
    }
}
