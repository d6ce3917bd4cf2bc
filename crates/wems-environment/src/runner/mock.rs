// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock runner for testing.
//!
//! Simulates command execution without spawning processes. Writes a fixed
//! stdout to the requested file and honours timeout and cancellation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::traits::*;

/// Mock runner for testing.
#[derive(Clone)]
pub struct MockRunner {
    launches: Arc<Mutex<Vec<LaunchOptions>>>,
    /// Simulated execution time.
    pub execution_delay: Duration,
    /// Exit code to report. Non-zero produces [`RunnerError::ExitCode`].
    pub exit_code: i32,
    /// Content written to the stdout file.
    pub stdout: String,
    /// Stderr reported on failure.
    pub stderr: String,
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRunner {
    /// Create a new mock runner that succeeds quickly.
    pub fn new() -> Self {
        Self {
            launches: Arc::new(Mutex::new(Vec::new())),
            execution_delay: Duration::from_millis(10),
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Create a mock runner that exits with `exit_code`.
    pub fn failing(exit_code: i32, stderr: &str) -> Self {
        Self {
            exit_code,
            stderr: stderr.to_string(),
            ..Self::new()
        }
    }

    /// Create a mock runner whose commands only end on timeout or cancellation.
    pub fn never_completing() -> Self {
        Self {
            execution_delay: Duration::MAX,
            ..Self::new()
        }
    }

    /// Set the stdout content.
    pub fn with_stdout(mut self, stdout: &str) -> Self {
        self.stdout = stdout.to_string();
        self
    }

    /// Options of every launch so far.
    pub async fn launches(&self) -> Vec<LaunchOptions> {
        self.launches.lock().await.clone()
    }
}

#[async_trait]
impl Runner for MockRunner {
    fn runner_type(&self) -> &'static str {
        "mock"
    }

    async fn run(
        &self,
        options: &LaunchOptions,
        cancel: Option<CancellationToken>,
    ) -> Result<LaunchResult> {
        let start = Instant::now();
        self.launches.lock().await.push(options.clone());

        let cancel = cancel.unwrap_or_default();
        let delay = self.execution_delay.min(options.timeout);
        tokio::select! {
            _ = cancel.cancelled() => return Err(RunnerError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        if self.execution_delay > options.timeout {
            return Err(RunnerError::Timeout);
        }

        if self.exit_code != 0 {
            return Err(RunnerError::ExitCode {
                exit_code: self.exit_code,
                stderr: self.stderr.clone(),
            });
        }

        if let Some(path) = &options.stdout_path {
            tokio::fs::write(path, &self.stdout).await?;
        }

        Ok(LaunchResult {
            job_id: options.job_id,
            exit_code: 0,
            stderr: self.stderr.clone(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}
