// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job lifecycle management.
//!
//! The [`LifecycleManager`] owns every status change of a job it executes:
//! it moves the job to `running`, hands it to the adapter selected by the
//! process kind, enforces the job timeout, stages results and records the
//! terminal status. Adapters never write statuses directly; they report
//! through a [`JobContext`], which remaps their local progress into the
//! slice of the global range they were given.
//!
//! | Global progress | Stage |
//! |-----------------|-------|
//! | 1 | Job started |
//! | 2 | Working directory prepared |
//! | 5-95 | Adapter execution |
//! | 98 | Results staged |
//! | 100 | Succeeded |

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use wems_core::{
    CoreError, ExceptionEntry, Job, JobEvent, JobRepository, JobStatus, LogEntry, LogLevel,
    Process, ProgressRange,
};

use crate::adapter::{AdapterSet, ExecutionRequest, require_outputs};
use crate::error::ExecutionError;

/// Global progress slice given to the adapter.
pub const ADAPTER_RANGE: ProgressRange = ProgressRange::new(5.0, 95.0);

/// Highest progress an adapter may report.
const PROGRESS_CAP: u8 = 99;
const PROGRESS_STARTED: u8 = 1;
const PROGRESS_PREPARED: u8 = 2;
const PROGRESS_STAGED: u8 = 98;

/// Attempts for a single repository write.
const MAX_WRITE_ATTEMPTS: u32 = 3;

/// Time an adapter gets to clean up after a timeout.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Why a running execution was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StopReason {
    /// Not stopped.
    None = 0,
    /// Dismissed by a caller.
    Dismissed = 1,
    /// Job timeout reached.
    Timeout = 2,
    /// Environment shutting down.
    Shutdown = 3,
}

impl StopReason {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => StopReason::Dismissed,
            2 => StopReason::Timeout,
            3 => StopReason::Shutdown,
            _ => StopReason::None,
        }
    }
}

/// Cancellation handle for one live execution.
#[derive(Debug, Clone)]
pub struct ExecutionControl {
    token: CancellationToken,
    reason: Arc<AtomicU8>,
}

impl ExecutionControl {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(AtomicU8::new(StopReason::None as u8)),
        }
    }

    /// Request a stop. The first reason wins.
    pub fn stop(&self, reason: StopReason) {
        let _ = self.reason.compare_exchange(
            StopReason::None as u8,
            reason as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        self.token.cancel();
    }

    /// Reason recorded by [`stop`](Self::stop).
    pub fn reason(&self) -> StopReason {
        StopReason::from_u8(self.reason.load(Ordering::SeqCst))
    }

    /// The cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

#[derive(Debug)]
struct ContextState {
    progress: u8,
    status: JobStatus,
}

/// Write lease for one job, handed to adapters.
///
/// Clones and [`child`](JobContext::child) contexts share the same progress
/// floor, so progress stays monotonic across concurrently running workflow
/// steps.
#[derive(Clone)]
pub struct JobContext {
    job_id: Uuid,
    jobs: Arc<dyn JobRepository>,
    adapters: Arc<AdapterSet>,
    range: ProgressRange,
    state: Arc<Mutex<ContextState>>,
    cancel: CancellationToken,
    step: Option<String>,
}

impl JobContext {
    /// Context for `job` covering `range` of the global progress scale.
    pub fn new(
        job: &Job,
        jobs: Arc<dyn JobRepository>,
        adapters: Arc<AdapterSet>,
        range: ProgressRange,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            job_id: job.id,
            jobs,
            adapters,
            range,
            state: Arc::new(Mutex::new(ContextState {
                progress: job.progress,
                status: job.status,
            })),
            cancel,
            step: None,
        }
    }

    /// Job being executed.
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Cancellation token; adapters stop when it fires.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether a stop was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// All adapters, for nested execution.
    pub fn adapters(&self) -> &AdapterSet {
        &self.adapters
    }

    /// Global progress range of this context.
    pub fn range(&self) -> ProgressRange {
        self.range
    }

    /// Workflow step this context runs, if any.
    pub fn step(&self) -> Option<&str> {
        self.step.as_deref()
    }

    /// Context covering `[from, to]` (local scale) of this one, for a step.
    pub fn child(&self, from: f64, to: f64, step: &str) -> JobContext {
        JobContext {
            range: self.range.slice(from, to),
            step: Some(match &self.step {
                Some(parent) => format!("{}/{}", parent, step),
                None => step.to_string(),
            }),
            ..self.clone()
        }
    }

    fn decorate(&self, message: &str) -> String {
        match &self.step {
            Some(step) => format!("[{}] {}", step, message),
            None => message.to_string(),
        }
    }

    fn entry(&self, state: &ContextState, level: LogLevel, message: String) -> LogEntry {
        LogEntry {
            at: Utc::now(),
            level,
            progress: state.progress,
            status: state.status,
            message,
        }
    }

    async fn write(
        &self,
        state: &mut ContextState,
        events: Vec<JobEvent>,
    ) -> Result<(), ExecutionError> {
        let job = persist(self.jobs.as_ref(), self.job_id, events).await?;
        state.progress = job.progress;
        state.status = job.status;
        Ok(())
    }

    /// Report progress on the local 0-100 scale.
    ///
    /// Values below what was already recorded only add a log line.
    pub async fn progress(&self, local: f64, message: &str) -> Result<(), ExecutionError> {
        let mut state = self.state.lock().await;
        let target = (self.range.scale(local).floor() as u8).min(PROGRESS_CAP);
        let message = self.decorate(message);

        let mut events = Vec::with_capacity(2);
        if target > state.progress {
            events.push(JobEvent::Progress {
                progress: target,
                message: Some(message.clone()),
            });
        }
        let mut entry = self.entry(&state, LogLevel::Info, message.clone());
        entry.progress = entry.progress.max(target);
        events.push(JobEvent::Log { entry });

        info!(job_id = %self.job_id, progress = target.max(state.progress), "{}", message);
        self.write(&mut state, events).await
    }

    /// Append a log line.
    pub async fn log(&self, level: LogLevel, message: &str) -> Result<(), ExecutionError> {
        let mut state = self.state.lock().await;
        let message = self.decorate(message);
        match level {
            LogLevel::Debug => debug!(job_id = %self.job_id, "{}", message),
            LogLevel::Info => info!(job_id = %self.job_id, "{}", message),
            LogLevel::Warn => warn!(job_id = %self.job_id, "{}", message),
            LogLevel::Error => error!(job_id = %self.job_id, "{}", message),
        }
        let entry = self.entry(&state, level, message);
        self.write(&mut state, vec![JobEvent::Log { entry }]).await
    }

    /// Record the remote job ID.
    pub async fn backend_assigned(&self, backend_job_id: &str) -> Result<(), ExecutionError> {
        let mut state = self.state.lock().await;
        self.write(
            &mut state,
            vec![JobEvent::BackendAssigned {
                backend_job_id: backend_job_id.to_string(),
            }],
        )
        .await
    }

    /// Mirror a remote pause or resume. Only `running` and `paused` are
    /// accepted; terminal statuses belong to the lifecycle manager.
    pub async fn set_status(&self, status: JobStatus, message: &str) -> Result<(), ExecutionError> {
        if !matches!(status, JobStatus::Running | JobStatus::Paused) {
            return Err(ExecutionError::execution(format!(
                "adapters cannot set status '{}'",
                status
            )));
        }
        let mut state = self.state.lock().await;
        if state.status == status {
            return Ok(());
        }
        let message = self.decorate(message);
        info!(job_id = %self.job_id, status = %status, "{}", message);
        let entry = LogEntry {
            status,
            ..self.entry(&state, LogLevel::Info, message.clone())
        };
        self.write(
            &mut state,
            vec![
                JobEvent::StatusChanged {
                    status,
                    message: Some(message),
                },
                JobEvent::Log { entry },
            ],
        )
        .await
    }
}

/// Append events, retrying retryable repository failures.
pub(crate) async fn persist(
    jobs: &dyn JobRepository,
    job_id: Uuid,
    events: Vec<JobEvent>,
) -> Result<Job, CoreError> {
    let mut attempt = 1;
    loop {
        match jobs.update(job_id, events.clone()).await {
            Ok(job) => return Ok(job),
            Err(e) if e.is_retryable() && attempt < MAX_WRITE_ATTEMPTS => {
                warn!(job_id = %job_id, attempt = attempt, error = %e, "Job update failed, retrying");
                tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Log entry written by the lifecycle manager itself.
fn lifecycle_log(job: &Job, level: LogLevel, status: JobStatus, message: &str) -> JobEvent {
    JobEvent::Log {
        entry: LogEntry {
            at: Utc::now(),
            level,
            progress: job.progress,
            status,
            message: message.to_string(),
        },
    }
}

/// Runs jobs from `accepted` to a terminal status.
pub struct LifecycleManager {
    jobs: Arc<dyn JobRepository>,
    adapters: Arc<AdapterSet>,
    controls: DashMap<Uuid, ExecutionControl>,
    data_dir: PathBuf,
    job_timeout: Duration,
    worker_id: String,
}

impl LifecycleManager {
    /// Create a lifecycle manager.
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        adapters: Arc<AdapterSet>,
        data_dir: PathBuf,
        job_timeout: Duration,
    ) -> Self {
        Self {
            jobs,
            adapters,
            controls: DashMap::new(),
            data_dir,
            job_timeout,
            worker_id: format!("wems-{}", std::process::id()),
        }
    }

    /// Working directory of a job.
    pub fn work_dir(&self, job_id: Uuid) -> PathBuf {
        self.data_dir.join("jobs").join(job_id.to_string())
    }

    /// Register a job before spawning it so it can be dismissed right away.
    pub fn register(&self, job_id: Uuid) -> ExecutionControl {
        self.controls
            .entry(job_id)
            .or_insert_with(ExecutionControl::new)
            .clone()
    }

    /// Whether this manager is executing `job_id`.
    pub fn is_active(&self, job_id: Uuid) -> bool {
        self.controls.contains_key(&job_id)
    }

    /// IDs of jobs being executed.
    pub fn active_jobs(&self) -> Vec<Uuid> {
        self.controls.iter().map(|entry| *entry.key()).collect()
    }

    /// Signal a live execution to stop as dismissed. `false` when this
    /// manager does not own the job.
    pub fn dismiss(&self, job_id: Uuid) -> bool {
        match self.controls.get(&job_id) {
            Some(control) => {
                info!(job_id = %job_id, "Dismissal requested");
                control.stop(StopReason::Dismissed);
                true
            }
            None => false,
        }
    }

    /// Stop every live execution.
    pub fn shutdown(&self) {
        for entry in self.controls.iter() {
            entry.value().stop(StopReason::Shutdown);
        }
    }

    /// Execute `job_id` to completion. Returns the final job.
    pub async fn run(&self, job_id: Uuid, process: &Process) -> Result<Job, ExecutionError> {
        let control = self.register(job_id);
        let result = self.execute(job_id, process, &control).await;
        self.controls.remove(&job_id);
        if let Err(e) = &result {
            error!(job_id = %job_id, error = %e, "Failed to record job outcome");
        }
        result
    }

    async fn execute(
        &self,
        job_id: Uuid,
        process: &Process,
        control: &ExecutionControl,
    ) -> Result<Job, ExecutionError> {
        let job = self
            .jobs
            .get_by_id(job_id)
            .await?
            .ok_or(CoreError::JobNotFound { job_id })?;
        if job.status.is_terminal() {
            return Ok(job);
        }
        if control.token().is_cancelled() {
            return self.finish_stopped(job_id, control.reason()).await;
        }

        let started = match persist(
            self.jobs.as_ref(),
            job_id,
            vec![
                JobEvent::TaskAssigned {
                    task_id: self.worker_id.clone(),
                },
                JobEvent::StatusChanged {
                    status: JobStatus::Running,
                    message: Some("Job started".to_string()),
                },
                JobEvent::Progress {
                    progress: PROGRESS_STARTED,
                    message: Some("Job started".to_string()),
                },
            ],
        )
        .await
        {
            Ok(job) => job,
            Err(e) => return self.finish_failed(job_id, &e.into()).await,
        };
        info!(job_id = %job_id, process_id = %process.id, kind = %process.kind, "Job started");

        let work_dir = self.work_dir(job_id);
        if let Err(e) = tokio::fs::create_dir_all(&work_dir).await {
            return self.finish_failed(job_id, &ExecutionError::from(e)).await;
        }
        let ctx = JobContext::new(
            &started,
            self.jobs.clone(),
            self.adapters.clone(),
            ProgressRange::FULL,
            control.token().clone(),
        );
        if let Err(e) = ctx
            .progress(PROGRESS_PREPARED as f64, "Working directory prepared")
            .await
        {
            return self.finish_failed(job_id, &e).await;
        }
        let ctx = JobContext {
            range: ADAPTER_RANGE,
            ..ctx
        };

        let expected: Vec<String> = process.outputs.iter().map(|o| o.id.clone()).collect();
        let request = ExecutionRequest {
            process,
            inputs: &started.inputs,
            work_dir: &work_dir,
            expected_outputs: &expected,
        };
        let adapter = self.adapters.select(process.kind);

        let execution = adapter.execute(&ctx, &request);
        tokio::pin!(execution);
        let outcome = tokio::select! {
            result = &mut execution => result,
            _ = tokio::time::sleep(self.job_timeout) => {
                warn!(job_id = %job_id, timeout_secs = self.job_timeout.as_secs(), "Job timed out");
                control.stop(StopReason::Timeout);
                let _ = tokio::time::timeout(CANCEL_GRACE, &mut execution).await;
                Err(ExecutionError::Timeout(self.job_timeout))
            }
        };

        match (control.reason(), outcome) {
            (reason @ (StopReason::Dismissed | StopReason::Shutdown), _) => {
                self.finish_stopped(job_id, reason).await
            }
            (StopReason::Timeout, _) => {
                self.finish_failed(job_id, &ExecutionError::Timeout(self.job_timeout))
                    .await
            }
            (StopReason::None, Ok(outputs)) => {
                if let Err(e) = require_outputs(&outputs, &expected) {
                    return self.finish_failed(job_id, &e).await;
                }
                let results: BTreeMap<String, serde_json::Value> = outputs
                    .iter()
                    .map(|(id, value)| (id.clone(), value.to_result()))
                    .collect();
                self.finish_succeeded(job_id, results).await
            }
            (StopReason::None, Err(ExecutionError::Cancelled)) => {
                self.finish_stopped(job_id, StopReason::Dismissed).await
            }
            (StopReason::None, Err(e)) => self.finish_failed(job_id, &e).await,
        }
    }

    /// Append terminal events after whatever intermediate statuses are
    /// needed to reach `target`.
    async fn finalize(
        &self,
        job_id: Uuid,
        target: JobStatus,
        message: &str,
        mut before: Vec<JobEvent>,
    ) -> Result<Job, ExecutionError> {
        let current = self
            .jobs
            .get_by_id(job_id)
            .await?
            .ok_or(CoreError::JobNotFound { job_id })?;
        if current.status.is_terminal() {
            warn!(job_id = %job_id, status = %current.status, "Job already finished");
            return Ok(current);
        }
        let path = current
            .status
            .path_to(target)
            .ok_or(CoreError::InvalidTransition {
                job_id,
                from: current.status,
                to: target,
            })?;
        // staging progress may already be behind what the adapter reported
        before.retain(|event| {
            !matches!(event, JobEvent::Progress { progress, .. } if *progress <= current.progress)
        });
        before.push(lifecycle_log(&current, LogLevel::Info, target, message));
        for status in path {
            before.push(JobEvent::StatusChanged {
                status,
                message: Some(message.to_string()),
            });
        }
        Ok(persist(self.jobs.as_ref(), job_id, before).await?)
    }

    async fn finish_succeeded(
        &self,
        job_id: Uuid,
        results: BTreeMap<String, serde_json::Value>,
    ) -> Result<Job, ExecutionError> {
        let job = self
            .finalize(
                job_id,
                JobStatus::Succeeded,
                "Job succeeded",
                vec![
                    JobEvent::Progress {
                        progress: PROGRESS_STAGED,
                        message: Some("Results staged".to_string()),
                    },
                    JobEvent::Results { results },
                ],
            )
            .await?;
        info!(job_id = %job_id, "Job succeeded");
        Ok(job)
    }

    async fn finish_failed(&self, job_id: Uuid, err: &ExecutionError) -> Result<Job, ExecutionError> {
        error!(job_id = %job_id, code = err.code(), error = %err, "Job failed");
        let exception = err.to_exception();
        let message = format!("Job failed: {}", exception.text);
        self.finalize(
            job_id,
            JobStatus::Failed,
            &message,
            vec![JobEvent::Exception { entry: exception }],
        )
        .await
    }

    async fn finish_stopped(&self, job_id: Uuid, reason: StopReason) -> Result<Job, ExecutionError> {
        match reason {
            StopReason::Shutdown => {
                let exception = ExceptionEntry {
                    code: "SHUTDOWN".to_string(),
                    text: "Environment shut down before the job finished".to_string(),
                    locator: None,
                };
                self.finalize(
                    job_id,
                    JobStatus::Failed,
                    "Job failed: environment shut down",
                    vec![JobEvent::Exception { entry: exception }],
                )
                .await
            }
            _ => {
                info!(job_id = %job_id, "Job dismissed");
                self.finalize(job_id, JobStatus::Dismissed, "Job dismissed", Vec::new())
                    .await
            }
        }
    }
}
