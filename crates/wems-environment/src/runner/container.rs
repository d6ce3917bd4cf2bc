// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Container runner: executes the command line inside an image through the
//! docker or podman CLI, with the job's working directory mounted at
//! `/workdir`.

use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::native::{collect_stderr, command, spawn, wait_with_cancellation};
use super::traits::*;

/// Mount point of the working directory inside the container.
pub const CONTAINER_WORKDIR: &str = "/workdir";

/// Runs command lines in containers.
#[derive(Debug, Clone)]
pub struct ContainerRunner {
    runtime: String,
}

impl ContainerRunner {
    /// Create a runner using `runtime` (`docker` or `podman`).
    pub fn new(runtime: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
        }
    }

    /// Container name for a job.
    pub fn container_name(options: &LaunchOptions) -> String {
        format!("wems-{}", options.job_id)
    }

    /// Arguments passed to the container CLI.
    pub fn run_args(&self, options: &LaunchOptions) -> Result<Vec<String>> {
        let image = options
            .image
            .as_deref()
            .ok_or_else(|| RunnerError::Other("container runner needs an image".to_string()))?;

        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            Self::container_name(options),
            "-v".to_string(),
            format!("{}:{}", options.work_dir.display(), CONTAINER_WORKDIR),
            "-w".to_string(),
            CONTAINER_WORKDIR.to_string(),
        ];
        let mut env: Vec<_> = options.env.iter().collect();
        env.sort();
        for (key, value) in env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(image.to_string());
        args.extend(options.command.iter().cloned());
        Ok(args)
    }

    async fn kill_container(&self, name: &str) {
        let _ = Command::new(&self.runtime)
            .args(["kill", name])
            .output()
            .await;
    }
}

#[async_trait]
impl Runner for ContainerRunner {
    fn runner_type(&self) -> &'static str {
        "container"
    }

    async fn run(
        &self,
        options: &LaunchOptions,
        cancel: Option<CancellationToken>,
    ) -> Result<LaunchResult> {
        let args = self.run_args(options)?;
        let name = Self::container_name(options);
        debug!(job_id = %options.job_id, runtime = %self.runtime, args = ?args, "Starting container");

        let start = Instant::now();
        let mut cmd = command(&self.runtime, &args, options)?;
        let mut child = spawn(&mut cmd, &self.runtime)?;
        let stderr_task = collect_stderr(&mut child);

        let result = wait_with_cancellation(
            &mut child,
            &name,
            cancel.as_ref(),
            options.timeout,
            stderr_task,
        )
        .await;

        if matches!(result, Err(RunnerError::Cancelled | RunnerError::Timeout)) {
            warn!(container = %name, "Stopping container");
            self.kill_container(&name).await;
        }

        Ok(LaunchResult {
            job_id: options.job_id,
            exit_code: 0,
            stderr: result?,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::Duration;
    use uuid::Uuid;

    fn options(image: Option<&str>) -> LaunchOptions {
        LaunchOptions {
            job_id: Uuid::nil(),
            image: image.map(str::to_string),
            command: vec!["printf".to_string(), "hello".to_string()],
            work_dir: PathBuf::from("/data/jobs/1"),
            env: HashMap::from([("LANG".to_string(), "C".to_string())]),
            stdout_path: None,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_run_args() {
        let runner = ContainerRunner::new("podman");
        let args = runner.run_args(&options(Some("alpine:3"))).unwrap();
        assert_eq!(
            args,
            vec![
                "run",
                "--rm",
                "--name",
                "wems-00000000-0000-0000-0000-000000000000",
                "-v",
                "/data/jobs/1:/workdir",
                "-w",
                "/workdir",
                "-e",
                "LANG=C",
                "alpine:3",
                "printf",
                "hello",
            ]
        );
    }

    #[test]
    fn test_image_required() {
        let runner = ContainerRunner::new("docker");
        assert!(runner.run_args(&options(None)).is_err());
    }
}
