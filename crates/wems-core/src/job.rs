// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job records and their append-only event history.
//!
//! A [`Job`] is never mutated directly by the execution path. Every change is
//! expressed as a [`JobEvent`] and applied through [`Job::apply`], which
//! enforces the lifecycle rules:
//!
//! - status changes follow [`JobStatus::can_transition_to`]
//! - progress never decreases and reaches 100 only on success
//! - `finished` is set exactly when a terminal status is entered
//!
//! Repositories persist the events next to the folded job, so the history
//! of a job can always be replayed.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::process::{AccessScope, Visibility};
use crate::status::JobStatus;

/// Whether the submitter waits for the result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Return immediately with the job ID.
    #[default]
    Async,
    /// Wait (bounded) for completion before returning.
    Sync,
}

/// Severity of a job log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal progress.
    Info,
    /// Recoverable problem.
    Warn,
    /// Failure.
    Error,
}

/// One line of a job's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Time the entry was written.
    pub at: DateTime<Utc>,
    /// Severity.
    pub level: LogLevel,
    /// Progress when the entry was written.
    pub progress: u8,
    /// Status when the entry was written.
    pub status: JobStatus,
    /// Message text.
    pub message: String,
}

impl LogEntry {
    /// Render as a single log line.
    pub fn line(&self) -> String {
        format!(
            "[{}] {:<5} [{}] {:>3}% {}",
            self.at.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            format!("{:?}", self.level).to_uppercase(),
            self.status,
            self.progress,
            self.message
        )
    }
}

/// A structured exception recorded on a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionEntry {
    /// Machine-readable code.
    pub code: String,
    /// Human-readable description.
    pub text: String,
    /// What caused it (input ID, package field, step).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
}

/// A change to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// Status transition, with an optional status message.
    StatusChanged {
        /// New status.
        status: JobStatus,
        /// Status message.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Progress update, with an optional status message.
    Progress {
        /// New progress.
        progress: u8,
        /// Status message.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Log line.
    Log {
        /// Entry to append.
        entry: LogEntry,
    },
    /// Exception record.
    Exception {
        /// Entry to append.
        entry: ExceptionEntry,
    },
    /// The remote service assigned its own job ID.
    BackendAssigned {
        /// Remote job ID.
        backend_job_id: String,
    },
    /// The execution unit handling the job.
    TaskAssigned {
        /// Execution unit ID.
        task_id: String,
    },
    /// Staged results.
    Results {
        /// Output ID to result document.
        results: BTreeMap<String, Value>,
    },
    /// Tags added.
    Tagged {
        /// Tags to add.
        tags: Vec<String>,
    },
}

/// A persisted event with its position in the job's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEventRecord {
    /// Owning job.
    pub job_id: Uuid,
    /// 1-based position in the history.
    pub sequence: u64,
    /// Time the event was applied.
    pub at: DateTime<Utc>,
    /// The event.
    pub event: JobEvent,
}

/// A unit of execution of a process with specific inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Job identifier.
    pub id: Uuid,
    /// Execution unit handling the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Remote job ID, for remote executions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_job_id: Option<String>,
    /// Process the job runs.
    pub process_id: String,
    /// Registered service the job was sent to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    /// Current status.
    pub status: JobStatus,
    /// Latest status message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    /// Progress 0-100.
    pub progress: u8,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// Time the job first entered `running`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    /// Time the job entered a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished: Option<DateTime<Utc>>,
    /// Time of the last applied event.
    pub updated: DateTime<Utc>,
    /// Validated inputs.
    pub inputs: Map<String, Value>,
    /// Log lines.
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    /// Exceptions.
    #[serde(default)]
    pub exceptions: Vec<ExceptionEntry>,
    /// Output ID to result document.
    #[serde(default)]
    pub results: BTreeMap<String, Value>,
    /// Free-form tags.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Listing visibility.
    #[serde(default)]
    pub visibility: Visibility,
    /// Address notified on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_email: Option<String>,
    /// Language requested by the submitter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept_language: Option<String>,
    /// Sync or async submission.
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    /// Whether the process is a workflow.
    #[serde(default)]
    pub is_workflow: bool,
    /// Submitting user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Job {
    /// New `accepted` job for a process.
    pub fn new(process_id: impl Into<String>, inputs: Map<String, Value>) -> Job {
        let now = Utc::now();
        Job {
            id: Uuid::new_v4(),
            task_id: None,
            backend_job_id: None,
            process_id: process_id.into(),
            service_id: None,
            status: JobStatus::Accepted,
            status_message: None,
            progress: 0,
            created: now,
            started: None,
            finished: None,
            updated: now,
            inputs,
            logs: Vec::new(),
            exceptions: Vec::new(),
            results: BTreeMap::new(),
            tags: BTreeSet::new(),
            visibility: Visibility::Public,
            notification_email: None,
            accept_language: None,
            execution_mode: ExecutionMode::Async,
            is_workflow: false,
            user_id: None,
        }
    }

    /// Apply one event, enforcing the lifecycle rules.
    pub fn apply(&mut self, event: &JobEvent, at: DateTime<Utc>) -> Result<()> {
        match event {
            JobEvent::StatusChanged { status, message } => {
                let status = *status;
                if status == self.status && !status.is_terminal() {
                    // re-asserting a live status only refreshes the message
                } else if !self.status.can_transition_to(status) {
                    return Err(CoreError::InvalidTransition {
                        job_id: self.id,
                        from: self.status,
                        to: status,
                    });
                } else {
                    self.status = status;
                    if status == JobStatus::Running && self.started.is_none() {
                        self.started = Some(at);
                    }
                    if status == JobStatus::Succeeded {
                        self.progress = 100;
                    }
                    if status.is_terminal() {
                        self.finished = Some(at);
                    }
                }
                if message.is_some() {
                    self.status_message = message.clone();
                }
            }
            JobEvent::Progress { progress, message } => {
                let progress = *progress;
                let invalid = self.status.is_terminal()
                    || progress < self.progress
                    || progress > 100
                    || (progress == 100 && self.status != JobStatus::Succeeded);
                if invalid {
                    return Err(CoreError::InvalidProgress {
                        job_id: self.id,
                        current: self.progress,
                        requested: progress,
                    });
                }
                self.progress = progress;
                if message.is_some() {
                    self.status_message = message.clone();
                }
            }
            JobEvent::Log { entry } => self.logs.push(entry.clone()),
            JobEvent::Exception { entry } => self.exceptions.push(entry.clone()),
            JobEvent::BackendAssigned { backend_job_id } => {
                self.backend_job_id = Some(backend_job_id.clone());
            }
            JobEvent::TaskAssigned { task_id } => self.task_id = Some(task_id.clone()),
            JobEvent::Results { results } => {
                self.results
                    .extend(results.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            JobEvent::Tagged { tags } => self.tags.extend(tags.iter().cloned()),
        }
        self.updated = at;
        Ok(())
    }

    /// Apply events in order, all-or-nothing.
    pub fn fold(&self, events: &[JobEvent], at: DateTime<Utc>) -> Result<Job> {
        let mut next = self.clone();
        for event in events {
            next.apply(event, at)?;
        }
        Ok(next)
    }

    /// Replay a recorded history over the job's initial state.
    pub fn replay(genesis: &Job, records: &[JobEventRecord]) -> Result<Job> {
        let mut job = genesis.clone();
        for record in records {
            job.apply(&record.event, record.at)?;
        }
        Ok(job)
    }

    /// Elapsed time from start to finish, or to now while still active.
    /// `None` before the job starts.
    pub fn duration(&self) -> Option<chrono::Duration> {
        let started = self.started?;
        let end = self.finished.unwrap_or_else(Utc::now);
        Some((end - started).max(chrono::Duration::zero()))
    }

    /// Duration formatted as `HH:MM:SS`.
    pub fn duration_str(&self) -> Option<String> {
        self.duration().map(|duration| {
            let secs = duration.num_seconds();
            format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
        })
    }

    /// Whether the job is visible in `scope`.
    pub fn is_visible_to(&self, scope: &AccessScope) -> bool {
        scope.permits(self.visibility, self.user_id.as_deref())
    }

    /// Status summary document.
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.id,
            process_id: self.process_id.clone(),
            provider_id: self.service_id.clone(),
            status: self.status,
            message: self.status_message.clone(),
            progress: self.progress,
            created: self.created,
            started: self.started,
            finished: self.finished,
            updated: self.updated,
            duration: self.duration_str(),
        }
    }
}

/// Status document returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    /// Job identifier. Older clients send it as `jobID`.
    #[serde(rename = "id", alias = "jobID")]
    pub job_id: Uuid,
    /// Process identifier.
    #[serde(rename = "processID")]
    pub process_id: String,
    /// Service identifier, for remote jobs.
    #[serde(rename = "providerID", default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    /// Current status.
    pub status: JobStatus,
    /// Latest status message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Progress 0-100.
    pub progress: u8,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// Start time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    /// Finish time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished: Option<DateTime<Utc>>,
    /// Last update time.
    pub updated: DateTime<Utc>,
    /// Elapsed time as `HH:MM:SS`, null before start.
    pub duration: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn status(status: JobStatus) -> JobEvent {
        JobEvent::StatusChanged {
            status,
            message: None,
        }
    }

    fn progress(progress: u8) -> JobEvent {
        JobEvent::Progress {
            progress,
            message: None,
        }
    }

    #[test]
    fn test_happy_path() {
        let job = Job::new("echo", Map::new());
        let done = job
            .fold(
                &[
                    status(JobStatus::Running),
                    progress(50),
                    status(JobStatus::Succeeded),
                ],
                Utc::now(),
            )
            .unwrap();
        assert_eq!(done.status, JobStatus::Succeeded);
        assert_eq!(done.progress, 100);
        assert!(done.started.is_some());
        assert!(done.finished.is_some());
    }

    #[test]
    fn test_terminal_is_final() {
        let job = Job::new("echo", Map::new())
            .fold(&[status(JobStatus::Running), status(JobStatus::Failed)], Utc::now())
            .unwrap();
        for next in JobStatus::ALL {
            assert!(job.fold(&[status(next)], Utc::now()).is_err(), "{}", next);
        }
        assert!(job.fold(&[progress(10)], Utc::now()).is_err());
    }

    #[test]
    fn test_progress_monotonic_and_below_100() {
        let job = Job::new("echo", Map::new())
            .fold(&[status(JobStatus::Running), progress(40)], Utc::now())
            .unwrap();
        assert!(matches!(
            job.fold(&[progress(30)], Utc::now()),
            Err(CoreError::InvalidProgress { current: 40, requested: 30, .. })
        ));
        assert!(job.fold(&[progress(100)], Utc::now()).is_err());
        assert_eq!(job.fold(&[progress(40)], Utc::now()).unwrap().progress, 40);
    }

    #[test]
    fn test_fold_is_all_or_nothing() {
        let job = Job::new("echo", Map::new());
        let result = job.fold(
            &[progress(10), status(JobStatus::Succeeded)],
            Utc::now(),
        );
        assert!(result.is_err());
        assert_eq!(job.progress, 0);
    }

    #[test]
    fn test_rewriting_live_status_updates_message() {
        let job = Job::new("echo", Map::new())
            .fold(&[status(JobStatus::Running)], Utc::now())
            .unwrap();
        let job = job
            .fold(
                &[JobEvent::StatusChanged {
                    status: JobStatus::Running,
                    message: Some("still going".to_string()),
                }],
                Utc::now(),
            )
            .unwrap();
        assert_eq!(job.status_message.as_deref(), Some("still going"));
    }

    #[test]
    fn test_replay_matches_fold() {
        let genesis = Job::new("echo", Map::new());
        let at = Utc::now();
        let events = vec![
            JobEvent::TaskAssigned {
                task_id: "worker-1".to_string(),
            },
            status(JobStatus::Running),
            JobEvent::Results {
                results: BTreeMap::from([("output".to_string(), json!({"value": 1}))]),
            },
            status(JobStatus::Succeeded),
        ];
        let folded = genesis.fold(&events, at).unwrap();
        let records: Vec<_> = events
            .into_iter()
            .enumerate()
            .map(|(i, event)| JobEventRecord {
                job_id: genesis.id,
                sequence: i as u64 + 1,
                at,
                event,
            })
            .collect();
        assert_eq!(Job::replay(&genesis, &records).unwrap(), folded);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let value = serde_json::to_value(status(JobStatus::Dismissed)).unwrap();
        assert_eq!(value, json!({"type": "status_changed", "status": "dismissed"}));
    }

    #[test]
    fn test_summary_and_duration() {
        let mut job = Job::new("echo", Map::new());
        let pending = serde_json::to_value(job.summary()).unwrap();
        assert_eq!(pending["duration"], Value::Null);

        let now = Utc::now();
        job.started = Some(now - chrono::Duration::seconds(3725));
        job.finished = Some(now);
        let summary = serde_json::to_value(job.summary()).unwrap();
        assert_eq!(summary["id"], json!(job.id.to_string()));
        assert!(summary.get("jobID").is_none());
        assert_eq!(summary["processID"], "echo");
        assert_eq!(summary["status"], "accepted");
        assert_eq!(summary["duration"], "01:02:05");
        assert!(summary.get("providerID").is_none());
    }
}
