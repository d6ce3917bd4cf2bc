// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for wems-environment.
//!
//! [`Error`] is returned by the dispatcher and the runtime. [`ExecutionError`]
//! is what adapters return; the lifecycle manager turns it into a job
//! exception and a `failed` (or `dismissed`) status.

use std::time::Duration;

use thiserror::Error;
use wems_core::{CoreError, ExceptionEntry};

use crate::adapter::remote::ClientError;
use crate::runner::RunnerError;

/// Environment errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Core model or repository operation failed.
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML package file could not be parsed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Runner (container/process execution) failed.
    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),

    /// HTTP client could not be built.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The dispatcher no longer accepts jobs.
    #[error("Environment is shutting down")]
    ShuttingDown,

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable code for the error.
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Core(err) => err.error_code(),
            Error::Config(_) => "CONFIGURATION_ERROR",
            Error::Yaml(_) | Error::Json(_) => "INVALID_DOCUMENT",
            Error::ShuttingDown => "SHUTTING_DOWN",
            _ => "INTERNAL_ERROR",
        }
    }
}

/// Result type using Environment Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad category of an execution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The package itself is unusable.
    PackageRegistration,
    /// An input is missing, malformed or cannot be staged.
    Input,
    /// The process ran and failed.
    Execution,
    /// A remote service could not be reached or answered badly.
    Transport,
    /// Execution was stopped before it finished.
    Cancelled,
}

/// Failure of one execution, as reported by an adapter.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The package cannot be executed as declared.
    #[error("Package registration error: {message}")]
    PackageRegistration {
        /// What is wrong.
        message: String,
        /// Package field at fault.
        locator: Option<String>,
    },

    /// An input could not be used.
    #[error("Invalid input '{locator}': {message}")]
    Input {
        /// Input ID.
        locator: String,
        /// What is wrong.
        message: String,
    },

    /// The process failed.
    #[error("Package execution error: {message}")]
    Execution {
        /// Failure description.
        message: String,
        /// Step, output or component at fault.
        locator: Option<String>,
        /// Exit code, for local processes.
        exit_code: Option<i32>,
    },

    /// A remote call failed after retries.
    #[error("Transport error: {message}")]
    Transport {
        /// Failure description.
        message: String,
        /// Remote operation that failed.
        locator: Option<String>,
    },

    /// Stopped on request.
    #[error("Execution cancelled")]
    Cancelled,

    /// The job ran past its wall-clock ceiling.
    #[error("Execution timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// Recording progress or logs failed.
    #[error("Job repository error: {0}")]
    Repository(#[from] CoreError),
}

impl ExecutionError {
    /// Execution failure without a locator.
    pub fn execution(message: impl Into<String>) -> Self {
        ExecutionError::Execution {
            message: message.into(),
            locator: None,
            exit_code: None,
        }
    }

    /// Execution failure attributed to `locator`.
    pub fn execution_at(message: impl Into<String>, locator: impl Into<String>) -> Self {
        ExecutionError::Execution {
            message: message.into(),
            locator: Some(locator.into()),
            exit_code: None,
        }
    }

    /// Input failure.
    pub fn input(locator: impl Into<String>, message: impl Into<String>) -> Self {
        ExecutionError::Input {
            locator: locator.into(),
            message: message.into(),
        }
    }

    /// Error category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutionError::PackageRegistration { .. } => ErrorKind::PackageRegistration,
            ExecutionError::Input { .. } => ErrorKind::Input,
            ExecutionError::Execution { .. }
            | ExecutionError::Timeout(_)
            | ExecutionError::Repository(_) => ErrorKind::Execution,
            ExecutionError::Transport { .. } => ErrorKind::Transport,
            ExecutionError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Exception code recorded on the job.
    pub fn code(&self) -> &'static str {
        match self {
            ExecutionError::PackageRegistration { .. } => "PACKAGE_REGISTRATION_ERROR",
            ExecutionError::Input { .. } => "INVALID_INPUT",
            ExecutionError::Execution { .. } => "PACKAGE_EXECUTION_ERROR",
            ExecutionError::Transport { .. } => "TRANSPORT_ERROR",
            ExecutionError::Cancelled => "CANCELLED",
            ExecutionError::Timeout(_) => "JOB_TIMEOUT",
            ExecutionError::Repository(err) => err.error_code(),
        }
    }

    /// The locator, if any.
    pub fn locator(&self) -> Option<&str> {
        match self {
            ExecutionError::PackageRegistration { locator, .. }
            | ExecutionError::Execution { locator, .. }
            | ExecutionError::Transport { locator, .. } => locator.as_deref(),
            ExecutionError::Input { locator, .. } => Some(locator),
            _ => None,
        }
    }

    /// Exception entry for the job record.
    pub fn to_exception(&self) -> ExceptionEntry {
        ExceptionEntry {
            code: self.code().to_string(),
            text: self.to_string(),
            locator: self.locator().map(str::to_string),
        }
    }
}

impl From<RunnerError> for ExecutionError {
    fn from(err: RunnerError) -> Self {
        match err {
            RunnerError::Cancelled => ExecutionError::Cancelled,
            RunnerError::ExitCode { exit_code, stderr } => ExecutionError::Execution {
                message: if stderr.is_empty() {
                    format!("process exited with code {}", exit_code)
                } else {
                    format!("process exited with code {}: {}", exit_code, stderr)
                },
                locator: None,
                exit_code: Some(exit_code),
            },
            other => ExecutionError::execution(other.to_string()),
        }
    }
}

impl From<ClientError> for ExecutionError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Protocol(message) => ExecutionError::execution(message),
            other => ExecutionError::Transport {
                message: other.to_string(),
                locator: None,
            },
        }
    }
}

impl From<std::io::Error> for ExecutionError {
    fn from(err: std::io::Error) -> Self {
        ExecutionError::execution(format!("IO error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_becomes_execution_error() {
        let err = ExecutionError::from(RunnerError::ExitCode {
            exit_code: 2,
            stderr: "no such file".to_string(),
        });
        assert_eq!(err.kind(), ErrorKind::Execution);
        let exception = err.to_exception();
        assert_eq!(exception.code, "PACKAGE_EXECUTION_ERROR");
        assert!(exception.text.contains("code 2"));
        assert!(exception.text.contains("no such file"));
    }

    #[test]
    fn test_runner_cancel_maps_to_cancelled() {
        let err = ExecutionError::from(RunnerError::Cancelled);
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(err.code(), "CANCELLED");
    }

    #[test]
    fn test_input_exception_carries_locator() {
        let exception = ExecutionError::input("message", "file not found").to_exception();
        assert_eq!(exception.code, "INVALID_INPUT");
        assert_eq!(exception.locator.as_deref(), Some("message"));
    }

    #[test]
    fn test_timeout_message() {
        let err = ExecutionError::Timeout(Duration::from_secs(90));
        assert_eq!(err.to_string(), "Execution timed out after 90s");
        assert_eq!(err.code(), "JOB_TIMEOUT");
    }

    #[test]
    fn test_environment_error_codes() {
        let err = Error::from(CoreError::ProcessNotFound {
            process_id: "echo".to_string(),
        });
        assert_eq!(err.error_code(), "PROCESS_NOT_FOUND");
        assert_eq!(Error::Other("boom".to_string()).error_code(), "INTERNAL_ERROR");
        assert_eq!(Error::ShuttingDown.error_code(), "SHUTTING_DOWN");
    }
}
