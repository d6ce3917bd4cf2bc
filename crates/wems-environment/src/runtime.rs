// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for wems-environment.
//!
//! [`EnvironmentRuntime`] wires the repositories, runners, adapters,
//! lifecycle manager and dispatcher together and runs the background
//! workers, so the execution engine can live inside an existing tokio
//! application.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wems_core::SqliteRepository;
//! use wems_environment::runtime::EnvironmentRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let repository = Arc::new(SqliteRepository::connect("sqlite:wems.db?mode=rwc").await?);
//!
//!     let runtime = EnvironmentRuntime::builder()
//!         .repository(repository)
//!         .data_dir("/var/lib/wems")
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     let job = runtime
//!         .dispatcher()
//!         .submit(SubmitRequest::new("echo", inputs))
//!         .await?;
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use wems_core::{JobRepository, ProcessRepository, ServiceRepository};

use crate::adapter::AdapterSet;
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::lifecycle::LifecycleManager;
use crate::runner::{ContainerRunner, NativeRunner, Runner};
use crate::stale_job_monitor::{StaleJobMonitor, StaleJobMonitorConfig};

/// Convert a path to absolute if it's relative.
///
/// Job working directories are mounted into containers, which need
/// absolute host paths.
fn ensure_absolute_path(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(&path))
            .unwrap_or(path)
    }
}

/// Builder for creating an [`EnvironmentRuntime`].
#[derive(Default)]
pub struct EnvironmentRuntimeBuilder {
    config: Config,
    jobs: Option<Arc<dyn JobRepository>>,
    processes: Option<Arc<dyn ProcessRepository>>,
    services: Option<Arc<dyn ServiceRepository>>,
    native_runner: Option<Arc<dyn Runner>>,
    container_runner: Option<Arc<dyn Runner>>,
    http_client: Option<reqwest::Client>,
}

impl EnvironmentRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Use one store for jobs, processes and services.
    pub fn repository<R>(mut self, repository: Arc<R>) -> Self
    where
        R: JobRepository + ProcessRepository + ServiceRepository + 'static,
    {
        self.jobs = Some(repository.clone());
        self.processes = Some(repository.clone());
        self.services = Some(repository);
        self
    }

    /// Set the job repository.
    pub fn jobs(mut self, jobs: Arc<dyn JobRepository>) -> Self {
        self.jobs = Some(jobs);
        self
    }

    /// Set the process repository.
    pub fn processes(mut self, processes: Arc<dyn ProcessRepository>) -> Self {
        self.processes = Some(processes);
        self
    }

    /// Set the service repository.
    pub fn services(mut self, services: Arc<dyn ServiceRepository>) -> Self {
        self.services = Some(services);
        self
    }

    /// Set the runner for commands without a container image.
    ///
    /// Default: [`NativeRunner`]
    pub fn native_runner(mut self, runner: Arc<dyn Runner>) -> Self {
        self.native_runner = Some(runner);
        self
    }

    /// Set the runner for commands with a container image.
    ///
    /// Default: [`ContainerRunner`] using the configured container CLI.
    pub fn container_runner(mut self, runner: Arc<dyn Runner>) -> Self {
        self.container_runner = Some(runner);
        self
    }

    /// Set the HTTP client used by remote adapters.
    ///
    /// Default: a client with the configured per-call timeout.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Set the data directory for job working directories.
    ///
    /// Default: `.data`
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if a repository is missing.
    pub fn build(self) -> Result<EnvironmentRuntimeConfig> {
        let jobs = self
            .jobs
            .ok_or_else(|| anyhow::anyhow!("job repository is required"))?;
        let processes = self
            .processes
            .ok_or_else(|| anyhow::anyhow!("process repository is required"))?;
        let services = self
            .services
            .ok_or_else(|| anyhow::anyhow!("service repository is required"))?;

        let native_runner = self
            .native_runner
            .unwrap_or_else(|| Arc::new(NativeRunner::new()));
        let container_runner = self
            .container_runner
            .unwrap_or_else(|| Arc::new(ContainerRunner::new(self.config.container_runtime.clone())));
        let http_client = match self.http_client {
            Some(client) => client,
            None => reqwest::Client::builder()
                .timeout(self.config.http_timeout)
                .connect_timeout(self.config.http_timeout)
                .build()?,
        };

        let mut config = self.config;
        config.data_dir = ensure_absolute_path(config.data_dir);

        Ok(EnvironmentRuntimeConfig {
            config,
            jobs,
            processes,
            services,
            native_runner,
            container_runner,
            http_client,
        })
    }
}

/// Configuration for an [`EnvironmentRuntime`].
pub struct EnvironmentRuntimeConfig {
    config: Config,
    jobs: Arc<dyn JobRepository>,
    processes: Arc<dyn ProcessRepository>,
    services: Arc<dyn ServiceRepository>,
    native_runner: Arc<dyn Runner>,
    container_runner: Arc<dyn Runner>,
    http_client: reqwest::Client,
}

impl EnvironmentRuntimeConfig {
    /// Start the runtime: deploy start-up packages and spawn the stale job
    /// monitor.
    pub async fn start(self) -> Result<EnvironmentRuntime> {
        tokio::fs::create_dir_all(self.config.data_dir.join("jobs")).await?;

        let adapters = Arc::new(AdapterSet::new(
            &self.config,
            self.processes.clone(),
            self.services.clone(),
            self.native_runner.clone(),
            self.container_runner.clone(),
            self.http_client,
        ));
        let lifecycle = Arc::new(LifecycleManager::new(
            self.jobs.clone(),
            adapters.clone(),
            self.config.data_dir.clone(),
            self.config.job_timeout,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            self.processes,
            self.services,
            self.jobs.clone(),
            adapters,
            lifecycle.clone(),
            self.config.sync_wait,
        ));

        if let Some(dir) = &self.config.process_dir {
            deploy_directory(&dispatcher, dir).await?;
        }

        let monitor = StaleJobMonitor::new(
            self.jobs,
            lifecycle,
            StaleJobMonitorConfig {
                poll_interval: self.config.stale_check_interval,
                stale_after: self.config.job_timeout,
            },
        );
        let monitor_shutdown = monitor.shutdown_handle();
        let monitor_handle = tokio::spawn(async move {
            monitor.run().await;
        });

        info!(
            data_dir = %self.config.data_dir.display(),
            native_runner = self.native_runner.runner_type(),
            container_runner = self.container_runner.runner_type(),
            "EnvironmentRuntime started"
        );

        Ok(EnvironmentRuntime {
            dispatcher,
            monitor_handle,
            monitor_shutdown,
        })
    }
}

/// Deploy every package file in `dir`, in name order. Packages that fail
/// to deploy are logged and skipped.
async fn deploy_directory(dispatcher: &Dispatcher, dir: &std::path::Path) -> Result<usize> {
    let mut files = Vec::new();
    for extension in ["json", "yaml", "yml"] {
        let pattern = dir.join(format!("*.{}", extension));
        files.extend(glob::glob(&pattern.to_string_lossy())?.filter_map(|entry| entry.ok()));
    }
    files.sort();

    let mut deployed = 0;
    for file in files {
        match dispatcher.deploy_file(&file).await {
            Ok(process) => {
                info!(process_id = %process.id, file = %file.display(), "Deployed start-up package");
                deployed += 1;
            }
            Err(e) => {
                warn!(file = %file.display(), error = %e, "Failed to deploy start-up package");
            }
        }
    }
    Ok(deployed)
}

/// A running wems-environment instance that can be embedded in an application.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct EnvironmentRuntime {
    dispatcher: Arc<Dispatcher>,
    monitor_handle: JoinHandle<()>,
    monitor_shutdown: Arc<Notify>,
}

impl EnvironmentRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> EnvironmentRuntimeBuilder {
        EnvironmentRuntimeBuilder::new()
    }

    /// The dispatcher serving process, service and job operations.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Gracefully shut down the runtime.
    ///
    /// Live jobs are stopped and recorded as failed, then the stale job
    /// monitor is stopped.
    pub async fn shutdown(self) -> Result<()> {
        info!("EnvironmentRuntime shutting down...");

        self.dispatcher.shutdown().await;
        self.monitor_shutdown.notify_one();

        if let Err(e) = self.monitor_handle.await {
            error!("Stale job monitor task panicked: {}", e);
            return Err(anyhow::anyhow!("stale job monitor task panicked: {}", e));
        }

        info!("EnvironmentRuntime shutdown complete");
        Ok(())
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        !self.monitor_handle.is_finished()
    }
}
