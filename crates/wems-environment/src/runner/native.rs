// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Native runner: executes the command line directly on the host, inside
//! the job's working directory.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::traits::*;

/// Runs command lines as host processes.
#[derive(Debug, Default, Clone)]
pub struct NativeRunner;

impl NativeRunner {
    /// Create a new native runner.
    pub fn new() -> Self {
        Self
    }
}

/// Build a command with stdout redirected to `options.stdout_path` and
/// stderr piped.
pub(super) fn command(program: &str, args: &[String], options: &LaunchOptions) -> Result<Command> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(&options.work_dir)
        .envs(&options.env)
        .stdin(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    match &options.stdout_path {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            cmd.stdout(Stdio::from(file));
        }
        None => {
            cmd.stdout(Stdio::null());
        }
    }
    Ok(cmd)
}

/// Spawn `cmd`, translating a missing executable.
pub(super) fn spawn(cmd: &mut Command, program: &str) -> Result<Child> {
    cmd.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => RunnerError::ProgramNotFound(program.to_string()),
        _ => RunnerError::StartFailed(e.to_string()),
    })
}

/// Drain stderr in the background so a chatty process cannot block on a
/// full pipe.
pub(super) fn collect_stderr(child: &mut Child) -> Option<JoinHandle<String>> {
    child.stderr.take().map(|mut handle| {
        tokio::spawn(async move {
            let mut buf = String::new();
            let _ = handle.read_to_string(&mut buf).await;
            buf.trim().to_string()
        })
    })
}

/// Wait for `child` with timeout and cancellation support.
///
/// Kills the child on timeout or cancellation. Returns the captured
/// stderr on success.
pub(super) async fn wait_with_cancellation(
    child: &mut Child,
    label: &str,
    cancel: Option<&CancellationToken>,
    timeout: Duration,
    stderr_task: Option<JoinHandle<String>>,
) -> Result<String> {
    let poll_interval = Duration::from_millis(100);
    let start = Instant::now();

    loop {
        if let Some(token) = cancel
            && token.is_cancelled()
        {
            warn!(process = %label, "Execution cancelled, killing process");
            let _ = child.kill().await;
            return Err(RunnerError::Cancelled);
        }

        if start.elapsed() > timeout {
            warn!(process = %label, "Execution timed out, killing process");
            let _ = child.kill().await;
            return Err(RunnerError::Timeout);
        }

        match child.try_wait() {
            Ok(Some(status)) => {
                let stderr = match stderr_task {
                    Some(task) => task.await.unwrap_or_default(),
                    None => String::new(),
                };
                if status.success() {
                    info!(process = %label, "Process completed successfully");
                    return Ok(stderr);
                }
                let exit_code = status.code().unwrap_or(-1);
                error!(process = %label, exit_code = exit_code, stderr = %stderr, "Process failed");
                return Err(RunnerError::ExitCode { exit_code, stderr });
            }
            Ok(None) => {
                tokio::time::sleep(poll_interval).await;
            }
            Err(e) => {
                error!(process = %label, error = %e, "Error waiting for process");
                return Err(RunnerError::Io(e));
            }
        }
    }
}

#[async_trait]
impl Runner for NativeRunner {
    fn runner_type(&self) -> &'static str {
        "native"
    }

    async fn run(
        &self,
        options: &LaunchOptions,
        cancel: Option<CancellationToken>,
    ) -> Result<LaunchResult> {
        let (program, args) = options
            .command
            .split_first()
            .ok_or_else(|| RunnerError::Other("empty command line".to_string()))?;

        debug!(
            job_id = %options.job_id,
            program = %program,
            args = ?args,
            work_dir = %options.work_dir.display(),
            "Starting native process"
        );

        let start = Instant::now();
        let mut cmd = command(program, args, options)?;
        let mut child = spawn(&mut cmd, program)?;
        let stderr_task = collect_stderr(&mut child);

        let stderr = wait_with_cancellation(
            &mut child,
            program,
            cancel.as_ref(),
            options.timeout,
            stderr_task,
        )
        .await?;

        Ok(LaunchResult {
            job_id: options.job_id,
            exit_code: 0,
            stderr,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn options(dir: &tempfile::TempDir, command: &[&str]) -> LaunchOptions {
        LaunchOptions {
            job_id: Uuid::new_v4(),
            image: None,
            command: command.iter().map(|s| s.to_string()).collect(),
            work_dir: dir.path().to_path_buf(),
            env: HashMap::new(),
            stdout_path: Some(dir.path().join("stdout.txt")),
            timeout: Duration::from_secs(10),
        }
    }

    #[tokio::test]
    async fn test_captures_stdout_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = NativeRunner::new()
            .run(&options(&dir, &["printf", "hello"]), None)
            .await
            .unwrap();
        assert_eq!(result.exit_code, 0);
        let written = std::fs::read_to_string(dir.path().join("stdout.txt")).unwrap();
        assert_eq!(written, "hello");
    }

    #[tokio::test]
    async fn test_non_zero_exit_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let err = NativeRunner::new()
            .run(&options(&dir, &["sh", "-c", "echo broken >&2; exit 3"]), None)
            .await
            .unwrap_err();
        match err {
            RunnerError::ExitCode { exit_code, stderr } => {
                assert_eq!(exit_code, 3);
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let err = NativeRunner::new()
            .run(&options(&dir, &["wems-no-such-program"]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::ProgramNotFound(_)));
    }

    #[tokio::test]
    async fn test_cancellation_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let err = NativeRunner::new()
            .run(&options(&dir, &["sleep", "30"]), Some(token))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(&dir, &["sleep", "30"]);
        opts.timeout = Duration::from_millis(300);
        let err = NativeRunner::new().run(&opts, None).await.unwrap_err();
        assert!(matches!(err, RunnerError::Timeout));
    }
}
