// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for wems-core.
//!
//! Every variant maps to a stable machine-readable code via
//! [`CoreError::error_code`], which is what gets recorded on job exceptions
//! and returned to callers.

use thiserror::Error;
use uuid::Uuid;

use crate::status::JobStatus;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors raised by the model, the state machine and the repositories.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// Job was not found in the repository.
    #[error("Job '{job_id}' not found")]
    JobNotFound {
        /// The job ID that was not found.
        job_id: Uuid,
    },

    /// A job with the same ID already exists.
    #[error("Job '{job_id}' already exists")]
    JobAlreadyExists {
        /// The duplicated job ID.
        job_id: Uuid,
    },

    /// A status transition outside the lifecycle graph was attempted.
    #[error("Job '{job_id}' cannot transition from '{from}' to '{to}'")]
    InvalidTransition {
        /// The job ID.
        job_id: Uuid,
        /// Current status.
        from: JobStatus,
        /// Requested status.
        to: JobStatus,
    },

    /// A progress update would break monotonicity or the 100-iff-succeeded rule.
    #[error("Job '{job_id}' cannot move progress from {current} to {requested}")]
    InvalidProgress {
        /// The job ID.
        job_id: Uuid,
        /// Progress currently recorded.
        current: u8,
        /// Progress that was requested.
        requested: u8,
    },

    /// Results were requested for a job that did not succeed.
    #[error("Results for job '{job_id}' are unavailable (status '{status}')")]
    JobResultsUnavailable {
        /// The job ID.
        job_id: Uuid,
        /// Current status.
        status: JobStatus,
    },

    /// Process was not found.
    #[error("Process '{process_id}' not found")]
    ProcessNotFound {
        /// The process ID that was not found.
        process_id: String,
    },

    /// A process with the same ID is already deployed.
    #[error("Process '{process_id}' already exists")]
    ProcessAlreadyExists {
        /// The duplicated process ID.
        process_id: String,
    },

    /// Process cannot be undeployed while jobs still run against it.
    #[error("Process '{process_id}' is referenced by {active_jobs} active job(s)")]
    ProcessInUse {
        /// The process ID.
        process_id: String,
        /// Number of non-terminal jobs referencing it.
        active_jobs: usize,
    },

    /// Process cannot be undeployed while a workflow runs it as a step.
    #[error("Process '{process_id}' is a step of workflow '{workflow_id}'")]
    ProcessReferenced {
        /// The process ID.
        process_id: String,
        /// A deployed workflow using it.
        workflow_id: String,
    },

    /// Service/provider was not found.
    #[error("Service '{service_id}' not found")]
    ServiceNotFound {
        /// The service ID that was not found.
        service_id: String,
    },

    /// A service with the same ID is already registered.
    #[error("Service '{service_id}' already exists")]
    ServiceAlreadyExists {
        /// The duplicated service ID.
        service_id: String,
    },

    /// The package definition is invalid or ambiguous. Raised at deploy time.
    #[error("Package registration error: {message}")]
    PackageRegistration {
        /// What is wrong with the package.
        message: String,
        /// Which part of the package caused it.
        locator: Option<String>,
    },

    /// A submitted input is missing or invalid.
    #[error("Invalid input '{input_id}': {message}")]
    InvalidInput {
        /// The offending input ID.
        input_id: String,
        /// Validation error message.
        message: String,
    },

    /// Request validation failed.
    #[error("Validation error for '{field}': {message}")]
    Validation {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// Optimistic update kept losing against concurrent writers.
    #[error("Concurrent update conflict on job '{job_id}'")]
    Conflict {
        /// The job ID.
        job_id: Uuid,
    },

    /// Database operation failed.
    #[error("Database error during '{operation}': {details}")]
    Database {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::JobNotFound { .. } => "JOB_NOT_FOUND",
            Self::JobAlreadyExists { .. } => "JOB_ALREADY_EXISTS",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::InvalidProgress { .. } => "INVALID_PROGRESS",
            Self::JobResultsUnavailable { .. } => "JOB_RESULTS_UNAVAILABLE",
            Self::ProcessNotFound { .. } => "PROCESS_NOT_FOUND",
            Self::ProcessAlreadyExists { .. } => "PROCESS_ALREADY_EXISTS",
            Self::ProcessInUse { .. } | Self::ProcessReferenced { .. } => "PROCESS_IN_USE",
            Self::ServiceNotFound { .. } => "SERVICE_NOT_FOUND",
            Self::ServiceAlreadyExists { .. } => "SERVICE_ALREADY_EXISTS",
            Self::PackageRegistration { .. } => "PACKAGE_REGISTRATION_ERROR",
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Conflict { .. } => "CONFLICT",
            Self::Database { .. } => "DATABASE_ERROR",
        }
    }

    /// Whether retrying the same repository write may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Database { .. })
    }

    pub(crate) fn package(message: impl Into<String>, locator: Option<&str>) -> Self {
        Self::PackageRegistration {
            message: message.into(),
            locator: locator.map(str::to_string),
        }
    }

    pub(crate) fn input(input_id: &str, message: impl Into<String>) -> Self {
        Self::InvalidInput {
            input_id: input_id.to_string(),
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::Database {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for CoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        CoreError::Database {
            operation: "migrate".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Database {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        let id = Uuid::nil();
        let cases = vec![
            (CoreError::JobNotFound { job_id: id }, "JOB_NOT_FOUND"),
            (
                CoreError::InvalidTransition {
                    job_id: id,
                    from: JobStatus::Succeeded,
                    to: JobStatus::Running,
                },
                "INVALID_TRANSITION",
            ),
            (
                CoreError::package("two markers", Some("hints")),
                "PACKAGE_REGISTRATION_ERROR",
            ),
            (CoreError::input("message", "missing"), "INVALID_INPUT"),
            (
                CoreError::ProcessInUse {
                    process_id: "echo".to_string(),
                    active_jobs: 2,
                },
                "PROCESS_IN_USE",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.error_code(), expected, "{:?}", error);
            assert!(!error.to_string().is_empty());
        }
    }

    #[test]
    fn test_error_display() {
        let err = CoreError::InvalidTransition {
            job_id: Uuid::nil(),
            from: JobStatus::Failed,
            to: JobStatus::Running,
        };
        assert_eq!(
            err.to_string(),
            "Job '00000000-0000-0000-0000-000000000000' cannot transition from 'failed' to 'running'"
        );

        let err = CoreError::input("count", "expected an integer");
        assert_eq!(err.to_string(), "Invalid input 'count': expected an integer");
    }

    #[test]
    fn test_retryable() {
        assert!(CoreError::Conflict { job_id: Uuid::nil() }.is_retryable());
        assert!(
            CoreError::Database {
                operation: "update".to_string(),
                details: "locked".to_string()
            }
            .is_retryable()
        );
        assert!(!CoreError::JobNotFound { job_id: Uuid::nil() }.is_retryable());
    }
}
