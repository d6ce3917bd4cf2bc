// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker for detecting and failing stale jobs.
//!
//! A job is stale when it is not terminal, no execution task in this
//! process owns it, and nothing has been recorded for it within the job
//! timeout. This happens when the environment restarts while jobs are
//! running: the record survives in the repository but the task that was
//! driving it does not. Stale jobs are failed with a `STALE_JOB` exception
//! so they never stay `running` forever.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use wems_core::{
    ExceptionEntry, Job, JobEvent, JobFilter, JobRepository, JobSort, JobStatus, LogEntry,
    LogLevel,
};

use crate::error::{Error, Result};
use crate::lifecycle::{LifecycleManager, persist};

/// Jobs fetched per page while scanning.
const SCAN_PAGE_SIZE: usize = 500;

/// Configuration for the stale job monitor.
#[derive(Debug, Clone)]
pub struct StaleJobMonitorConfig {
    /// How often to check for stale jobs.
    pub poll_interval: Duration,
    /// Time without recorded activity before a job is failed.
    pub stale_after: Duration,
}

impl Default for StaleJobMonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(3600),
        }
    }
}

/// Background worker that fails orphaned jobs.
pub struct StaleJobMonitor {
    jobs: Arc<dyn JobRepository>,
    lifecycle: Arc<LifecycleManager>,
    config: StaleJobMonitorConfig,
    shutdown: Arc<Notify>,
}

impl StaleJobMonitor {
    /// Create a new monitor.
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        lifecycle: Arc<LifecycleManager>,
        config: StaleJobMonitorConfig,
    ) -> Self {
        Self {
            jobs,
            lifecycle,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the monitor loop until shutdown is signalled.
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            stale_after_secs = self.config.stale_after.as_secs(),
            "Stale job monitor started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Stale job monitor received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.fail_stale_jobs().await {
                        error!(error = %e, "Failed to check stale jobs");
                    }
                }
            }
        }

        info!("Stale job monitor stopped");
    }

    /// Fail every stale job once. Returns how many were failed.
    pub async fn fail_stale_jobs(&self) -> Result<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.stale_after)
                .map_err(|e| Error::Other(format!("Invalid duration: {}", e)))?;

        let stale = self.find_stale(cutoff).await?;
        if stale.is_empty() {
            debug!("No stale jobs found");
            return Ok(0);
        }
        info!(stale_jobs = stale.len(), "Found stale jobs to fail");

        let mut failed = 0;
        for job in stale {
            match self.fail(&job).await {
                Ok(()) => failed += 1,
                Err(e) => error!(job_id = %job.id, error = %e, "Failed to mark stale job as failed"),
            }
        }
        Ok(failed)
    }

    async fn find_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>> {
        let filter = JobFilter {
            created_before: Some(cutoff),
            ..JobFilter::any().statuses(JobStatus::ACTIVE)
        };
        let sort = JobSort::default();

        let mut stale = Vec::new();
        let mut page = 0;
        loop {
            let found = self
                .jobs
                .find_many(&filter, &sort, page, SCAN_PAGE_SIZE)
                .await?;
            let seen = (page + 1) * SCAN_PAGE_SIZE;
            stale.extend(
                found
                    .items
                    .into_iter()
                    .filter(|job| job.updated < cutoff && !self.lifecycle.is_active(job.id)),
            );
            if seen >= found.total {
                break;
            }
            page += 1;
        }
        Ok(stale)
    }

    async fn fail(&self, job: &Job) -> Result<()> {
        let Some(path) = job.status.path_to(JobStatus::Failed) else {
            return Ok(());
        };
        let text = format!(
            "Job stale: no activity since {} (timeout: {}s)",
            job.updated.format("%Y-%m-%d %H:%M:%S UTC"),
            self.config.stale_after.as_secs()
        );
        warn!(job_id = %job.id, status = %job.status, last_activity = %job.updated, "Failing stale job");

        let mut events = vec![
            JobEvent::Exception {
                entry: ExceptionEntry {
                    code: "STALE_JOB".to_string(),
                    text: text.clone(),
                    locator: None,
                },
            },
            JobEvent::Log {
                entry: LogEntry {
                    at: Utc::now(),
                    level: LogLevel::Error,
                    progress: job.progress,
                    status: JobStatus::Failed,
                    message: text.clone(),
                },
            },
        ];
        events.extend(path.into_iter().map(|status| JobEvent::StatusChanged {
            status,
            message: Some(text.clone()),
        }));
        persist(self.jobs.as_ref(), job.id, events).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = StaleJobMonitorConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.stale_after, Duration::from_secs(3600));
    }
}
