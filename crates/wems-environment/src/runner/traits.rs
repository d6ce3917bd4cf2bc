// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runner trait definitions.
//!
//! Defines the abstract interface for command-line runners.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Errors from runner operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunnerError {
    /// Program executable was not found.
    #[error("Program not found: {0}")]
    ProgramNotFound(String),

    /// Execution timed out.
    #[error("Execution timeout")]
    Timeout,

    /// Execution was cancelled.
    #[error("Execution cancelled")]
    Cancelled,

    /// Container/process failed to start.
    #[error("Start failed: {0}")]
    StartFailed(String),

    /// Process exited with non-zero code.
    #[error("Exit code {exit_code}: {stderr}")]
    ExitCode {
        /// Exit code from the process.
        exit_code: i32,
        /// Standard error output.
        stderr: String,
    },

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("Other: {0}")]
    Other(String),
}

/// Result type for runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Options for launching a command line.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Job the command runs for.
    pub job_id: Uuid,
    /// Container image. `None` runs the command on the host.
    pub image: Option<String>,
    /// Program followed by its arguments.
    pub command: Vec<String>,
    /// Working directory, mounted at `/workdir` for containers.
    pub work_dir: PathBuf,
    /// Extra environment variables.
    pub env: HashMap<String, String>,
    /// File receiving standard output.
    pub stdout_path: Option<PathBuf>,
    /// Execution timeout.
    pub timeout: Duration,
}

/// Result of a completed command.
#[derive(Debug, Clone)]
pub struct LaunchResult {
    /// Job ID.
    pub job_id: Uuid,
    /// Process exit code (always 0, failures are errors).
    pub exit_code: i32,
    /// Captured standard error.
    pub stderr: String,
    /// Execution duration in milliseconds.
    pub duration_ms: u64,
}

/// Trait for command-line runners.
///
/// Runners are PURE execution engines - they do NOT access the job
/// repository. Progress and status updates are handled by the caller.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Runner type identifier (e.g., "native", "container")
    fn runner_type(&self) -> &'static str;

    /// Run a command, waiting for completion.
    ///
    /// Returns when the command exits, times out, or `cancel` fires. On
    /// timeout or cancellation the process is killed.
    async fn run(
        &self,
        options: &LaunchOptions,
        cancel: Option<CancellationToken>,
    ) -> Result<LaunchResult>;
}
