// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Remote execution adapter.
//!
//! All remote protocols share one flow:
//!
//! 1. resolve the provider (URL or registered service)
//! 2. make sure the process exists remotely (OGC deploys it when absent)
//! 3. submit, record the remote job ID
//! 4. poll the status until it is terminal, mirroring progress and pauses
//! 5. fetch the results
//!
//! Idempotent reads are retried on transient failures; submission and
//! deployment are not. When the job is cancelled the adapter asks the remote
//! service to dismiss its job and ignores any failure to do so.

pub mod client;
pub mod ogc;
pub mod wps1;

use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};
use wems_core::package::file_reference;
use wems_core::{
    ExecutionKind, ExecutionRequirement, JobStatus, LogLevel, RemoteTarget, ServiceRepository,
    canonical_status,
};

use super::{Adapter, AdapterOutputs, ExecutionRequest, OutputValue, require_outputs};
use crate::config::Config;
use crate::error::ExecutionError;
use crate::lifecycle::JobContext;
use crate::monitor::{MonitorConfig, MonitorError, poll_until};

pub use client::{ClientError, RemoteClient, RemoteStatus};
pub use ogc::OgcClient;
pub use wps1::Wps1Client;

/// Remote protocol spoken by an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteProtocol {
    /// WPS 1.0 key-value-pair requests.
    V1,
    /// OGC API - Processes.
    Ogc,
    /// ESGF compute (WPS 1.0 with an API key).
    Esgf,
}

impl RemoteProtocol {
    fn kind(&self) -> ExecutionKind {
        match self {
            RemoteProtocol::V1 => ExecutionKind::RemoteV1,
            RemoteProtocol::Ogc => ExecutionKind::RemoteOgc,
            RemoteProtocol::Esgf => ExecutionKind::RemoteEsgf,
        }
    }
}

/// Local progress values reported at each stage of a remote execution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressCheckpoints {
    /// Request prepared.
    pub prepare: f64,
    /// Remote process confirmed.
    pub describe: f64,
    /// Package deployed remotely.
    pub deploy: f64,
    /// Remote process made public.
    pub visible: f64,
    /// Remote job submitted.
    pub submitted: f64,
    /// Start of the monitoring range.
    pub monitoring: f64,
    /// Monitoring finished, fetching results.
    pub fetch_output: f64,
}

impl Default for ProgressCheckpoints {
    fn default() -> Self {
        Self {
            prepare: 2.0,
            describe: 3.0,
            deploy: 3.0,
            visible: 4.0,
            submitted: 5.0,
            monitoring: 10.0,
            fetch_output: 90.0,
        }
    }
}

impl ProgressCheckpoints {
    /// Local progress for a remotely reported percentage.
    pub fn monitored(&self, remote_percent: f64) -> f64 {
        let fraction = (remote_percent / 100.0).clamp(0.0, 1.0);
        self.monitoring + fraction * (self.fetch_output - self.monitoring)
    }
}

/// Retry policy for idempotent remote calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry, doubled after each one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

/// Run an idempotent call, retrying transient failures.
pub async fn retry_idempotent<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut attempt = 0u32;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                let delay = policy.base_delay * 2u32.saturating_pow(attempt);
                attempt += 1;
                warn!(
                    operation = operation,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient remote failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Executes processes on remote services.
pub struct RemoteAdapter {
    protocol: RemoteProtocol,
    http: reqwest::Client,
    services: Arc<dyn ServiceRepository>,
    monitor: MonitorConfig,
    retry: RetryPolicy,
    checkpoints: ProgressCheckpoints,
}

impl RemoteAdapter {
    /// Create an adapter for `protocol`.
    pub fn new(
        protocol: RemoteProtocol,
        http: reqwest::Client,
        services: Arc<dyn ServiceRepository>,
        config: &Config,
    ) -> Self {
        Self {
            protocol,
            http,
            services,
            monitor: MonitorConfig::new(config.poll_interval, config.max_poll_duration),
            retry: RetryPolicy {
                max_retries: config.http_retries,
                ..RetryPolicy::default()
            },
            checkpoints: ProgressCheckpoints::default(),
        }
    }

    /// Override the progress checkpoints.
    pub fn with_checkpoints(mut self, checkpoints: ProgressCheckpoints) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    /// Override the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Progress checkpoints in use.
    pub fn checkpoints(&self) -> &ProgressCheckpoints {
        &self.checkpoints
    }

    /// Endpoint URL and credentials for a target.
    async fn resolve(
        &self,
        target: &RemoteTarget,
    ) -> Result<(String, Option<String>), ExecutionError> {
        if let Some(url) = target.provider_url() {
            return Ok((url.to_string(), None));
        }
        let service_id = target.provider.as_str();
        let service = self.services.get(service_id).await?.ok_or_else(|| {
            ExecutionError::execution_at(
                format!("service '{}' is not registered", service_id),
                "provider",
            )
        })?;
        Ok((service.url, service.credentials))
    }

    /// Confirm the remote process exists.
    async fn describe<C: RemoteClient>(
        &self,
        ctx: &JobContext,
        client: &C,
        target: &RemoteTarget,
    ) -> Result<(), ExecutionError> {
        match retry_idempotent(&self.retry, "describe", || client.describe(&target.process)).await {
            Ok(_) => {
                ctx.progress(self.checkpoints.describe, "Remote process available")
                    .await
            }
            Err(ClientError::NotFound(_)) => Err(ExecutionError::execution_at(
                format!("remote process '{}' not found", target.process),
                "process",
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Deploy the package remotely when absent, then make it public.
    ///
    /// A describe answered with 401 or 403 means the process exists but is
    /// private to another owner scope; it is promoted without redeploying.
    async fn ensure_deployed(
        &self,
        ctx: &JobContext,
        client: &OgcClient,
        request: &ExecutionRequest<'_>,
        target: &RemoteTarget,
    ) -> Result<(), ExecutionError> {
        let presence =
            retry_idempotent(&self.retry, "describe", || client.describe(&target.process)).await;
        match presence {
            Ok(_) => {
                ctx.progress(self.checkpoints.describe, "Remote process available")
                    .await?;
                // already callable, so a refused promotion is not fatal
                if let Err(e) = self.make_public(client, target).await {
                    warn!(
                        job_id = %ctx.job_id(),
                        process_id = %target.process,
                        error = %e,
                        "Could not make remote process public"
                    );
                    return Ok(());
                }
            }
            Err(ClientError::Api {
                status: 401 | 403, ..
            }) => {
                info!(
                    job_id = %ctx.job_id(),
                    process_id = %target.process,
                    "Remote process is private, promoting it"
                );
                ctx.progress(self.checkpoints.describe, "Remote process is private")
                    .await?;
                self.make_public(client, target).await?;
            }
            Err(ClientError::NotFound(_)) => {
                let package = request
                    .process
                    .definition()
                    .map_err(|e| ExecutionError::PackageRegistration {
                        message: e.to_string(),
                        locator: None,
                    })?
                    .without_markers();
                client.deploy(&target.process, &package).await?;
                ctx.progress(self.checkpoints.deploy, "Process deployed on remote service")
                    .await?;
                self.make_public(client, target).await?;
            }
            Err(e) => return Err(e.into()),
        }
        ctx.progress(self.checkpoints.visible, "Remote process made public")
            .await
    }

    async fn make_public(
        &self,
        client: &OgcClient,
        target: &RemoteTarget,
    ) -> Result<(), ClientError> {
        retry_idempotent(&self.retry, "set_visibility", || {
            client.set_visibility(&target.process, "public")
        })
        .await
    }

    /// One monitoring step.
    async fn check<C: RemoteClient>(
        &self,
        ctx: &JobContext,
        client: &C,
        remote_id: &str,
    ) -> Result<ControlFlow<()>, ExecutionError> {
        let status =
            retry_idempotent(&self.retry, "get_status", || client.get_status(remote_id)).await?;
        let message = status
            .message
            .clone()
            .unwrap_or_else(|| format!("Remote job {}", status.status));

        match canonical_status(&status.status) {
            Some(JobStatus::Succeeded) => Ok(ControlFlow::Break(())),
            Some(JobStatus::Failed) => Err(ExecutionError::Execution {
                message: status
                    .message
                    .unwrap_or_else(|| "remote job failed".to_string()),
                locator: Some("remote".to_string()),
                exit_code: None,
            }),
            Some(JobStatus::Dismissed) => Err(ExecutionError::execution_at(
                "remote job was dismissed by the service",
                "remote",
            )),
            Some(JobStatus::Paused) => {
                ctx.set_status(JobStatus::Paused, &message).await?;
                Ok(ControlFlow::Continue(()))
            }
            Some(JobStatus::Accepted | JobStatus::Running) => {
                ctx.set_status(JobStatus::Running, &message).await?;
                if let Some(percent) = status.progress {
                    ctx.progress(self.checkpoints.monitored(percent), &message)
                        .await?;
                }
                Ok(ControlFlow::Continue(()))
            }
            None => {
                warn!(
                    job_id = %ctx.job_id(),
                    remote_status = %status.status,
                    "Unrecognised remote status"
                );
                Ok(ControlFlow::Continue(()))
            }
        }
    }

    /// Submit, monitor and fetch.
    async fn run<C: RemoteClient>(
        &self,
        ctx: &JobContext,
        client: &C,
        request: &ExecutionRequest<'_>,
        target: &RemoteTarget,
    ) -> Result<AdapterOutputs, ExecutionError> {
        let remote_id = client.submit(&target.process, request.inputs).await?;
        ctx.backend_assigned(&remote_id).await?;
        ctx.progress(
            self.checkpoints.submitted,
            &format!("Remote job {} submitted", remote_id),
        )
        .await?;
        info!(
            job_id = %ctx.job_id(),
            protocol = client.protocol(),
            remote_job_id = %remote_id,
            "Monitoring remote job"
        );

        let monitored = poll_until(self.monitor, ctx.cancellation(), |_| {
            self.check(ctx, client, &remote_id)
        })
        .await;

        match monitored {
            Ok(()) => {}
            Err(MonitorError::Check(e)) => return Err(e),
            Err(MonitorError::Cancelled) => {
                self.dismiss_remote(ctx, client, &remote_id).await;
                return Err(ExecutionError::Cancelled);
            }
            Err(MonitorError::Exceeded(limit)) => {
                self.dismiss_remote(ctx, client, &remote_id).await;
                return Err(ExecutionError::execution_at(
                    format!("remote job did not finish within {}s", limit.as_secs()),
                    "remote",
                ));
            }
        }

        ctx.progress(self.checkpoints.fetch_output, "Fetching remote results")
            .await?;
        let results =
            retry_idempotent(&self.retry, "get_results", || client.get_results(&remote_id))
                .await?;

        let mut outputs = AdapterOutputs::new();
        for id in request.expected_outputs {
            if let Some(value) = results.get(id) {
                outputs.insert(id.clone(), output_value(value));
            }
        }
        require_outputs(&outputs, request.expected_outputs)?;

        ctx.progress(100.0, "Remote execution complete").await?;
        Ok(outputs)
    }

    /// Best-effort remote dismissal.
    async fn dismiss_remote<C: RemoteClient>(&self, ctx: &JobContext, client: &C, remote_id: &str) {
        match client.cancel(remote_id).await {
            Ok(true) => {
                info!(job_id = %ctx.job_id(), remote_job_id = %remote_id, "Remote job dismissed");
            }
            Ok(false) => {
                if let Err(e) = ctx
                    .log(LogLevel::Warn, "Remote service refused to dismiss the job")
                    .await
                {
                    warn!(
                        job_id = %ctx.job_id(),
                        error = %e,
                        "Failed to record refused remote dismissal"
                    );
                }
            }
            Err(e) => {
                warn!(job_id = %ctx.job_id(), remote_job_id = %remote_id, error = %e, "Failed to dismiss remote job");
            }
        }
    }
}

fn output_value(value: &Value) -> OutputValue {
    if let Some(obj) = value.as_object() {
        if let Some(href) = obj.get("href").and_then(Value::as_str) {
            return OutputValue::Reference(href.to_string());
        }
        if let Some(literal) = obj.get("value") {
            return OutputValue::Literal(literal.clone());
        }
    }
    match value {
        Value::String(s) if s.starts_with("http://") || s.starts_with("https://") => {
            OutputValue::Reference(s.clone())
        }
        other => match file_reference(other) {
            Some(href) if other.is_object() => OutputValue::Reference(href.to_string()),
            _ => OutputValue::Literal(other.clone()),
        },
    }
}

#[async_trait]
impl Adapter for RemoteAdapter {
    fn kind(&self) -> ExecutionKind {
        self.protocol.kind()
    }

    async fn execute(
        &self,
        ctx: &JobContext,
        request: &ExecutionRequest<'_>,
    ) -> Result<AdapterOutputs, ExecutionError> {
        let requirement = request.process.requirement.as_ref();
        let target = requirement
            .and_then(ExecutionRequirement::remote_target)
            .ok_or_else(|| ExecutionError::PackageRegistration {
                message: "process has no remote requirement".to_string(),
                locator: Some("requirements".to_string()),
            })?;

        ctx.progress(self.checkpoints.prepare, "Preparing remote execution request")
            .await?;
        let (url, credentials) = self.resolve(target).await?;

        match self.protocol {
            RemoteProtocol::V1 => {
                let client = Wps1Client::new(self.http.clone(), url);
                self.describe(ctx, &client, target).await?;
                self.run(ctx, &client, request, target).await
            }
            RemoteProtocol::Esgf => {
                let api_key = match requirement {
                    Some(ExecutionRequirement::RemoteEsgf { api_key, .. }) => api_key.clone(),
                    _ => None,
                }
                .or(credentials);
                let client = Wps1Client::esgf(self.http.clone(), &url, api_key);
                self.describe(ctx, &client, target).await?;
                self.run(ctx, &client, request, target).await
            }
            RemoteProtocol::Ogc => {
                let client = OgcClient::new(self.http.clone(), &url, credentials);
                self.ensure_deployed(ctx, &client, request, target).await?;
                self.run(ctx, &client, request, target).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_monitored_progress_range() {
        let checkpoints = ProgressCheckpoints::default();
        assert_eq!(checkpoints.monitored(0.0), 10.0);
        assert_eq!(checkpoints.monitored(50.0), 50.0);
        assert_eq!(checkpoints.monitored(100.0), 90.0);
        assert_eq!(checkpoints.monitored(250.0), 90.0);
    }

    #[test]
    fn test_output_value_classification() {
        assert_eq!(
            output_value(&json!({"href": "http://remote/out.nc"})),
            OutputValue::Reference("http://remote/out.nc".to_string())
        );
        assert_eq!(
            output_value(&json!({"value": 42})),
            OutputValue::Literal(json!(42))
        );
        assert_eq!(
            output_value(&json!("https://remote/x")),
            OutputValue::Reference("https://remote/x".to_string())
        );
        assert_eq!(output_value(&json!("plain")), OutputValue::Literal(json!("plain")));
    }

    #[tokio::test]
    async fn test_retry_transient_then_succeed() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        };
        let result = retry_idempotent(&policy, "get_status", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ClientError::Api {
                        status: 503,
                        body: String::new(),
                    })
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_idempotent(&RetryPolicy::default(), "describe", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ClientError::NotFound("echo".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(ClientError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_bounded() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
        };
        let result: Result<(), _> = retry_idempotent(&policy, "get_results", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ClientError::Api {
                    status: 502,
                    body: String::new(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
