// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for wems-environment integration tests.
//!
//! Provides TestContext for running an in-memory runtime over a temporary
//! data directory.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use wems_core::{
    AccessScope, CoreError, GroupField, Job, JobEvent, JobEventRecord, JobFilter, JobGroups,
    JobPage, JobRepository, JobSort, MemoryRepository,
};
use wems_environment::config::Config;
use wems_environment::dispatcher::Dispatcher;
use wems_environment::runner::Runner;
use wems_environment::runtime::EnvironmentRuntime;

/// Test context holding a running runtime and its store.
pub struct TestContext {
    pub runtime: EnvironmentRuntime,
    pub repository: Arc<MemoryRepository>,
    pub data_dir: PathBuf,
    _temp_dir: tempfile::TempDir,
}

/// Configuration tuned for fast tests.
pub fn test_config(data_dir: PathBuf) -> Config {
    Config {
        database_url: "memory".to_string(),
        data_dir,
        poll_interval: Duration::from_millis(20),
        max_poll_duration: Duration::from_secs(30),
        job_timeout: Duration::from_secs(30),
        http_timeout: Duration::from_secs(5),
        http_retries: 1,
        stale_check_interval: Duration::from_secs(3600),
        sync_wait: Duration::from_secs(10),
        ..Config::default()
    }
}

impl TestContext {
    /// Runtime with the default runners.
    pub async fn new() -> Self {
        Self::with(|config| config, None).await
    }

    /// Runtime with an adjusted configuration and an optional runner used
    /// for both native and container commands.
    pub async fn with(
        adjust: impl FnOnce(Config) -> Config,
        runner: Option<Arc<dyn Runner>>,
    ) -> Self {
        Self::build(adjust, runner, |repository| {
            repository as Arc<dyn JobRepository>
        })
        .await
    }

    /// Runtime whose job writes go through `wrap` around the shared store.
    pub async fn with_jobs(
        runner: Option<Arc<dyn Runner>>,
        wrap: impl FnOnce(Arc<MemoryRepository>) -> Arc<dyn JobRepository>,
    ) -> Self {
        Self::build(|config| config, runner, wrap).await
    }

    async fn build(
        adjust: impl FnOnce(Config) -> Config,
        runner: Option<Arc<dyn Runner>>,
        wrap: impl FnOnce(Arc<MemoryRepository>) -> Arc<dyn JobRepository>,
    ) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let data_dir = temp_dir.path().to_path_buf();
        let repository = Arc::new(MemoryRepository::new());

        let mut builder = EnvironmentRuntime::builder()
            .config(adjust(test_config(data_dir.clone())))
            .jobs(wrap(repository.clone()))
            .processes(repository.clone())
            .services(repository.clone());
        if let Some(runner) = runner {
            builder = builder
                .native_runner(runner.clone())
                .container_runner(runner);
        }
        let runtime = builder
            .build()
            .expect("Failed to build runtime")
            .start()
            .await
            .expect("Failed to start runtime");

        Self {
            runtime,
            repository,
            data_dir,
            _temp_dir: temp_dir,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        self.runtime.dispatcher()
    }

    /// Deploy a public package under `id`.
    pub async fn deploy(&self, id: &str, package: Value) {
        self.dispatcher()
            .deploy(package, Some(id), None, Default::default())
            .await
            .expect("Failed to deploy package");
    }
}

/// Job store that rejects non-terminal writes carrying a log line that
/// contains `needle`. Batches that change the status always go through.
pub struct RejectingLogWrites {
    inner: Arc<MemoryRepository>,
    needle: String,
}

impl RejectingLogWrites {
    pub fn new(inner: Arc<MemoryRepository>, needle: &str) -> Arc<dyn JobRepository> {
        Arc::new(Self {
            inner,
            needle: needle.to_string(),
        })
    }

    fn rejects(&self, events: &[JobEvent]) -> bool {
        let changes_status = events
            .iter()
            .any(|event| matches!(event, JobEvent::StatusChanged { .. }));
        !changes_status
            && events.iter().any(|event| {
                matches!(event, JobEvent::Log { entry } if entry.message.contains(&self.needle))
            })
    }
}

#[async_trait]
impl JobRepository for RejectingLogWrites {
    async fn create(&self, job: &Job) -> Result<(), CoreError> {
        self.inner.create(job).await
    }

    async fn update(&self, job_id: Uuid, events: Vec<JobEvent>) -> Result<Job, CoreError> {
        if self.rejects(&events) {
            return Err(CoreError::Database {
                operation: "update_job".to_string(),
                details: "disk full".to_string(),
            });
        }
        self.inner.update(job_id, events).await
    }

    async fn get_by_id(&self, job_id: Uuid) -> Result<Option<Job>, CoreError> {
        self.inner.get_by_id(job_id).await
    }

    async fn find_many(
        &self,
        filter: &JobFilter,
        sort: &JobSort,
        page: usize,
        limit: usize,
    ) -> Result<JobPage, CoreError> {
        self.inner.find_many(filter, sort, page, limit).await
    }

    async fn find_many_grouped(
        &self,
        filter: &JobFilter,
        sort: &JobSort,
        group_by: &[GroupField],
    ) -> Result<JobGroups, CoreError> {
        self.inner.find_many_grouped(filter, sort, group_by).await
    }

    async fn delete(&self, job_id: Uuid) -> Result<bool, CoreError> {
        self.inner.delete(job_id).await
    }

    async fn events(&self, job_id: Uuid) -> Result<Vec<JobEventRecord>, CoreError> {
        self.inner.events(job_id).await
    }
}

/// Poll until `predicate` holds for the job, or panic after 10 seconds.
pub async fn wait_for(
    dispatcher: &Dispatcher,
    job_id: Uuid,
    predicate: impl Fn(&Job) -> bool,
) -> Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let job = dispatcher
            .get_job(job_id, &AccessScope::Any)
            .await
            .expect("Failed to load job");
        if predicate(&job) {
            return job;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "job {} did not reach the expected state, last status: {}",
                job_id, job.status
            );
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Poll until the job is terminal.
pub async fn wait_for_terminal(dispatcher: &Dispatcher, job_id: Uuid) -> Job {
    wait_for(dispatcher, job_id, |job| job.status.is_terminal()).await
}

/// Inputs from a JSON object literal.
pub fn inputs(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

/// A builtin process package.
pub fn builtin_package(function: &str, inputs: Value) -> Value {
    json!({
        "class": "CommandLineTool",
        "hints": {"BuiltinRequirement": {"process": function}},
        "inputs": inputs,
        "outputs": {"output": "File"}
    })
}

/// A package running `printf <message>` with its stdout as the output.
pub fn printf_package() -> Value {
    json!({
        "class": "CommandLineTool",
        "baseCommand": "printf",
        "stdout": "output.txt",
        "inputs": {
            "message": {"type": "string", "inputBinding": {"position": 1}}
        },
        "outputs": {"output": {"type": "stdout"}}
    })
}

/// A package pointing at a remote process.
pub fn remote_package(marker: &str, provider: &str, process: &str) -> Value {
    json!({
        "class": "CommandLineTool",
        "requirements": {marker: {"provider": provider, "process": process}},
        "inputs": {"message": "string"},
        "outputs": {"output": "File"}
    })
}

/// Containerized package for an image, used with a mock runner.
pub fn docker_package(image: &str) -> Value {
    json!({
        "class": "CommandLineTool",
        "requirements": {"DockerRequirement": {"dockerPull": image}},
        "baseCommand": "run",
        "inputs": {"message": {"type": "string", "inputBinding": {"position": 1}}},
        "outputs": {"output": {"type": "stdout"}}
    })
}
