// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Entry point for process, service and job operations.
//!
//! The [`Dispatcher`] validates packages at deploy time, validates inputs
//! at submit time, creates the `accepted` job and hands it to the
//! [`LifecycleManager`] on its own task. Reads go straight to the
//! repositories.

use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wems_core::workflow::StepGraph;
use wems_core::{
    AccessScope, CoreError, ExceptionEntry, ExecutionKind, ExecutionMode, ExecutionRequirement,
    GroupField, Job, JobEvent, JobEventRecord, JobFilter, JobGroups, JobPage, JobRepository,
    JobSort, JobStatus, LogEntry, LogLevel, Process, ProcessRepository, Service,
    ServiceRepository, Visibility,
};

use crate::adapter::AdapterSet;
use crate::error::{Error, Result};
use crate::lifecycle::{LifecycleManager, persist};
use crate::monitor::{MonitorConfig, MonitorError, poll_until};

/// How long [`Dispatcher::dismiss`] waits for a live job to settle.
const DISMISS_WAIT: Duration = Duration::from_secs(5);
const SETTLE_INTERVAL: Duration = Duration::from_millis(50);

/// Request to execute a process.
#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    /// Process to run.
    pub process_id: String,
    /// Raw inputs.
    pub inputs: Map<String, Value>,
    /// Sync or async.
    pub mode: ExecutionMode,
    /// Tags attached to the job.
    pub tags: Vec<String>,
    /// Visibility of the job.
    pub visibility: Visibility,
    /// Address notified on completion.
    pub notification_email: Option<String>,
    /// Language requested by the caller.
    pub accept_language: Option<String>,
    /// Submitting user.
    pub user_id: Option<String>,
    /// Scope of the caller, checked against the process visibility.
    pub access: AccessScope,
}

impl SubmitRequest {
    /// Async request with no metadata.
    pub fn new(process_id: impl Into<String>, inputs: Map<String, Value>) -> Self {
        Self {
            process_id: process_id.into(),
            inputs,
            ..Self::default()
        }
    }

    /// Set the execution mode.
    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Add tags.
    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Set the submitting user; the user may also run their own private processes.
    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        self.access = AccessScope::Owner(user_id.clone());
        self.user_id = Some(user_id);
        self
    }

    /// Set the caller's access scope.
    pub fn access(mut self, access: AccessScope) -> Self {
        self.access = access;
        self
    }
}

/// Composes repositories, adapters and the lifecycle manager.
pub struct Dispatcher {
    processes: Arc<dyn ProcessRepository>,
    services: Arc<dyn ServiceRepository>,
    jobs: Arc<dyn JobRepository>,
    adapters: Arc<AdapterSet>,
    lifecycle: Arc<LifecycleManager>,
    tasks: TaskTracker,
    sync_wait: Duration,
}

impl Dispatcher {
    /// Create a dispatcher.
    pub fn new(
        processes: Arc<dyn ProcessRepository>,
        services: Arc<dyn ServiceRepository>,
        jobs: Arc<dyn JobRepository>,
        adapters: Arc<AdapterSet>,
        lifecycle: Arc<LifecycleManager>,
        sync_wait: Duration,
    ) -> Self {
        Self {
            processes,
            services,
            jobs,
            adapters,
            lifecycle,
            tasks: TaskTracker::new(),
            sync_wait,
        }
    }

    /// The lifecycle manager.
    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    // ========================================================================
    // Processes
    // ========================================================================

    /// Deploy a package.
    ///
    /// The ID comes from `id` or from the package. Every check that could
    /// make dispatch ambiguous or impossible runs here.
    pub async fn deploy(
        &self,
        package: Value,
        id: Option<&str>,
        owner: Option<&str>,
        visibility: Visibility,
    ) -> Result<Process> {
        let mut process = Process::from_package(id, package)?.with_visibility(visibility);
        if let Some(owner) = owner {
            process = process.with_owner(owner);
        }
        self.check_deployable(&process).await?;
        self.processes.save(&process).await?;
        info!(process_id = %process.id, kind = %process.kind, "Process deployed");
        Ok(process)
    }

    /// Deploy a `.json`, `.yaml` or `.yml` package file as public.
    pub async fn deploy_file(&self, path: &Path) -> Result<Process> {
        let content = tokio::fs::read_to_string(path).await?;
        let document: Value = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?,
        };
        let fallback_id = path.file_stem().and_then(|s| s.to_str());
        let id = match document.get("id").and_then(Value::as_str) {
            Some(_) => None,
            None => fallback_id,
        };
        self.deploy(document, id, None, Visibility::Public).await
    }

    async fn check_deployable(&self, process: &Process) -> Result<()> {
        match &process.requirement {
            Some(ExecutionRequirement::Builtin { function }) if !self.adapters.builtin.has(function) => {
                return Err(registration(
                    format!("unknown builtin function '{}'", function),
                    "requirements.BuiltinRequirement",
                ));
            }
            Some(requirement) => {
                if let Some(service_id) = requirement.remote_target().and_then(|t| t.service_id()) {
                    let service = self
                        .services
                        .get(service_id)
                        .await?
                        .ok_or_else(|| {
                            registration(
                                format!("provider '{}' is not a registered service", service_id),
                                "requirements.provider",
                            )
                        })?;
                    if service.kind != process.kind {
                        return Err(registration(
                            format!(
                                "service '{}' speaks '{}', not '{}'",
                                service.id, service.kind, process.kind
                            ),
                            "requirements.provider",
                        ));
                    }
                }
            }
            None => {}
        }

        if process.kind == ExecutionKind::Workflow {
            let package = process.definition()?;
            StepGraph::from_package(&package)?.plan()?;
            for step in &package.steps {
                if self.processes.get(&step.run).await?.is_none() {
                    return Err(registration(
                        format!("step runs unknown process '{}'", step.run),
                        &format!("steps.{}.run", step.id),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Remove a process. Rejected while non-terminal jobs reference it or
    /// a deployed workflow runs it as a step.
    pub async fn undeploy(&self, process_id: &str) -> Result<()> {
        let active_jobs = self.jobs.count_active(process_id).await?;
        if active_jobs > 0 {
            return Err(CoreError::ProcessInUse {
                process_id: process_id.to_string(),
                active_jobs,
            }
            .into());
        }
        if let Some(workflow_id) = self.workflow_using(process_id).await? {
            return Err(CoreError::ProcessReferenced {
                process_id: process_id.to_string(),
                workflow_id,
            }
            .into());
        }
        if !self.processes.delete(process_id).await? {
            return Err(not_found(process_id).into());
        }
        info!(process_id = %process_id, "Process undeployed");
        Ok(())
    }

    async fn workflow_using(&self, process_id: &str) -> Result<Option<String>> {
        for workflow in self.processes.list(&AccessScope::Any).await? {
            if workflow.kind != ExecutionKind::Workflow || workflow.id == process_id {
                continue;
            }
            let Ok(package) = workflow.definition() else {
                continue;
            };
            if package.steps.iter().any(|step| step.run == process_id) {
                return Ok(Some(workflow.id));
            }
        }
        Ok(None)
    }

    /// A process visible in `scope`.
    pub async fn describe_process(&self, process_id: &str, scope: &AccessScope) -> Result<Process> {
        match self.processes.get(process_id).await? {
            Some(process) if process.is_visible_to(scope) => Ok(process),
            _ => Err(not_found(process_id).into()),
        }
    }

    /// Processes visible in `scope`.
    pub async fn list_processes(&self, scope: &AccessScope) -> Result<Vec<Process>> {
        Ok(self.processes.list(scope).await?)
    }

    /// Change a process's visibility.
    pub async fn set_process_visibility(
        &self,
        process_id: &str,
        visibility: Visibility,
    ) -> Result<Process> {
        let process = self
            .processes
            .set_visibility(process_id, visibility)
            .await?;
        info!(process_id = %process_id, visibility = %visibility, "Process visibility changed");
        Ok(process)
    }

    // ========================================================================
    // Services
    // ========================================================================

    /// Register a remote service.
    pub async fn register_service(&self, service: Service) -> Result<Service> {
        self.services.add(&service).await?;
        info!(service_id = %service.id, kind = %service.kind, url = %service.url, "Service registered");
        Ok(service)
    }

    /// Remove a remote service. Jobs keep its ID.
    pub async fn unregister_service(&self, service_id: &str) -> Result<()> {
        if !self.services.remove(service_id).await? {
            return Err(CoreError::ServiceNotFound {
                service_id: service_id.to_string(),
            }
            .into());
        }
        info!(service_id = %service_id, "Service unregistered");
        Ok(())
    }

    /// A service visible in `scope`.
    pub async fn get_service(&self, service_id: &str, scope: &AccessScope) -> Result<Service> {
        match self.services.get(service_id).await? {
            Some(service) if service.is_visible_to(scope) => Ok(service),
            _ => Err(CoreError::ServiceNotFound {
                service_id: service_id.to_string(),
            }
            .into()),
        }
    }

    /// Services visible in `scope`.
    pub async fn list_services(&self, scope: &AccessScope) -> Result<Vec<Service>> {
        Ok(self.services.list(scope).await?)
    }

    // ========================================================================
    // Jobs
    // ========================================================================

    /// Validate inputs, create an `accepted` job and start it.
    ///
    /// Invalid inputs, or a dispatcher that has been shut down, fail before
    /// any job exists. In sync mode the call waits up to the configured
    /// bound for the job to finish; either way the latest job view is
    /// returned.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Job> {
        if self.tasks.is_closed() {
            return Err(Error::ShuttingDown);
        }
        let process = self
            .describe_process(&request.process_id, &request.access)
            .await?;
        let inputs = process.validate_inputs(&request.inputs)?;

        let mut job = Job::new(process.id.clone(), inputs);
        job.service_id = process
            .requirement
            .as_ref()
            .and_then(|r| r.remote_target())
            .and_then(|t| t.service_id())
            .map(str::to_string);
        job.is_workflow = process.kind == ExecutionKind::Workflow;
        job.tags = request.tags.into_iter().collect();
        job.visibility = request.visibility;
        job.notification_email = request.notification_email;
        job.accept_language = request.accept_language;
        job.execution_mode = request.mode;
        job.user_id = request.user_id;

        self.jobs.create(&job).await?;
        info!(
            job_id = %job.id,
            process_id = %process.id,
            kind = %process.kind,
            mode = ?job.execution_mode,
            "Job accepted"
        );

        let job_id = job.id;
        self.lifecycle.register(job_id);
        let lifecycle = self.lifecycle.clone();
        let handle = self
            .tasks
            .spawn(async move { lifecycle.run(job_id, &process).await });

        if job.execution_mode == ExecutionMode::Sync {
            match tokio::time::timeout(self.sync_wait, handle).await {
                Ok(Ok(Ok(finished))) => return Ok(finished),
                Ok(Ok(Err(e))) => warn!(job_id = %job_id, error = %e, "Sync job ended with an error"),
                Ok(Err(e)) => warn!(job_id = %job_id, error = %e, "Sync job task panicked"),
                Err(_) => debug!(job_id = %job_id, "Sync wait elapsed, returning running job"),
            }
            return self.load(job_id).await;
        }
        Ok(job)
    }

    /// Dismiss a job.
    ///
    /// A job executing here is signalled and given a short time to settle;
    /// any other non-terminal job is dismissed directly. Dismissing a
    /// terminal job is an invalid transition.
    pub async fn dismiss(&self, job_id: Uuid) -> Result<Job> {
        let job = self.load(job_id).await?;
        if job.status.is_terminal() {
            return Err(CoreError::InvalidTransition {
                job_id,
                from: job.status,
                to: JobStatus::Dismissed,
            }
            .into());
        }

        if self.lifecycle.dismiss(job_id) {
            return self.settle(job_id).await;
        }

        let path = job
            .status
            .path_to(JobStatus::Dismissed)
            .ok_or(CoreError::InvalidTransition {
                job_id,
                from: job.status,
                to: JobStatus::Dismissed,
            })?;
        let mut events = vec![JobEvent::Log {
            entry: LogEntry {
                at: Utc::now(),
                level: LogLevel::Info,
                progress: job.progress,
                status: JobStatus::Dismissed,
                message: "Job dismissed".to_string(),
            },
        }];
        events.extend(path.into_iter().map(|status| JobEvent::StatusChanged {
            status,
            message: Some("Job dismissed".to_string()),
        }));
        let dismissed = persist(self.jobs.as_ref(), job_id, events).await?;
        info!(job_id = %job_id, "Job dismissed without a live execution");
        Ok(dismissed)
    }

    /// Wait briefly for a signalled job to reach a terminal status.
    async fn settle(&self, job_id: Uuid) -> Result<Job> {
        let never = CancellationToken::new();
        let settled = poll_until(
            MonitorConfig::new(SETTLE_INTERVAL, DISMISS_WAIT),
            &never,
            move |_| async move {
                let job = self.load(job_id).await?;
                if job.status.is_terminal() {
                    Ok::<_, Error>(ControlFlow::Break(job))
                } else {
                    Ok(ControlFlow::Continue(()))
                }
            },
        )
        .await;
        match settled {
            Ok(job) => Ok(job),
            Err(MonitorError::Check(e)) => Err(e),
            Err(_) => self.load(job_id).await,
        }
    }

    async fn load(&self, job_id: Uuid) -> Result<Job> {
        Ok(self
            .jobs
            .get_by_id(job_id)
            .await?
            .ok_or(CoreError::JobNotFound { job_id })?)
    }

    /// A job visible in `scope`.
    pub async fn get_job(&self, job_id: Uuid, scope: &AccessScope) -> Result<Job> {
        let job = self.load(job_id).await?;
        if !job.is_visible_to(scope) {
            return Err(CoreError::JobNotFound { job_id }.into());
        }
        Ok(job)
    }

    /// One page of jobs.
    pub async fn list_jobs(
        &self,
        filter: &JobFilter,
        sort: &JobSort,
        page: usize,
        limit: usize,
    ) -> Result<JobPage> {
        Ok(self.jobs.find_many(filter, sort, page, limit).await?)
    }

    /// Jobs grouped by the given attributes.
    pub async fn list_jobs_grouped(
        &self,
        filter: &JobFilter,
        sort: &JobSort,
        group_by: &[GroupField],
    ) -> Result<JobGroups> {
        Ok(self.jobs.find_many_grouped(filter, sort, group_by).await?)
    }

    /// Results of a succeeded job.
    pub async fn job_results(
        &self,
        job_id: Uuid,
        scope: &AccessScope,
    ) -> Result<std::collections::BTreeMap<String, Value>> {
        let job = self.get_job(job_id, scope).await?;
        if job.status != JobStatus::Succeeded {
            return Err(CoreError::JobResultsUnavailable {
                job_id,
                status: job.status,
            }
            .into());
        }
        Ok(job.results)
    }

    /// Log entries of a job.
    pub async fn job_logs(&self, job_id: Uuid, scope: &AccessScope) -> Result<Vec<LogEntry>> {
        Ok(self.get_job(job_id, scope).await?.logs)
    }

    /// Exceptions of a job.
    pub async fn job_exceptions(
        &self,
        job_id: Uuid,
        scope: &AccessScope,
    ) -> Result<Vec<ExceptionEntry>> {
        Ok(self.get_job(job_id, scope).await?.exceptions)
    }

    /// Validated inputs of a job.
    pub async fn job_inputs(&self, job_id: Uuid, scope: &AccessScope) -> Result<Map<String, Value>> {
        Ok(self.get_job(job_id, scope).await?.inputs)
    }

    /// Event history of a job.
    pub async fn job_events(&self, job_id: Uuid) -> Result<Vec<JobEventRecord>> {
        self.load(job_id).await?;
        Ok(self.jobs.events(job_id).await?)
    }

    /// Delete a terminal job, its history and its working directory.
    pub async fn purge_job(&self, job_id: Uuid) -> Result<()> {
        let job = self.load(job_id).await?;
        if !job.status.is_terminal() {
            return Err(CoreError::Validation {
                field: "status".to_string(),
                message: format!("job '{}' is still {}", job_id, job.status),
            }
            .into());
        }
        self.jobs.delete(job_id).await?;
        let work_dir = self.lifecycle.work_dir(job_id);
        if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(job_id = %job_id, error = %e, "Failed to remove job working directory");
        }
        info!(job_id = %job_id, "Job purged");
        Ok(())
    }

    /// Stop every live job and wait for their tasks to record it.
    pub async fn shutdown(&self) {
        let active = self.lifecycle.active_jobs().len();
        info!(active_jobs = active, "Dispatcher shutting down");
        self.lifecycle.shutdown();
        self.tasks.close();
        self.tasks.wait().await;
    }
}

fn registration(message: String, locator: &str) -> Error {
    CoreError::PackageRegistration {
        message,
        locator: Some(locator.to_string()),
    }
    .into()
}

fn not_found(process_id: &str) -> CoreError {
    CoreError::ProcessNotFound {
        process_id: process_id.to_string(),
    }
}
