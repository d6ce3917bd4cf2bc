// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for repository tests.

#![allow(dead_code)]

use chrono::Utc;
use serde_json::{Map, json};
use wems_core::{Job, JobEvent, JobStatus, LogEntry, LogLevel, Process};

/// A fresh accepted job for `process`, created `minutes_ago`.
pub fn job(process: &str, minutes_ago: i64) -> Job {
    let mut job = Job::new(process, Map::new());
    job.created = Utc::now() - chrono::Duration::minutes(minutes_ago);
    job.updated = job.created;
    job
}

pub fn status(status: JobStatus) -> JobEvent {
    JobEvent::StatusChanged {
        status,
        message: None,
    }
}

pub fn progress(progress: u8) -> JobEvent {
    JobEvent::Progress {
        progress,
        message: None,
    }
}

pub fn log(message: &str) -> JobEvent {
    JobEvent::Log {
        entry: LogEntry {
            at: Utc::now(),
            level: LogLevel::Info,
            progress: 0,
            status: JobStatus::Running,
            message: message.to_string(),
        },
    }
}

/// A builtin echo process.
pub fn echo_process() -> Process {
    Process::from_package(
        Some("echo"),
        json!({
            "class": "CommandLineTool",
            "hints": {"BuiltinRequirement": {"process": "echo"}},
            "inputs": {"message": "string"},
            "outputs": {"output": "Any"}
        }),
    )
    .expect("valid package")
}
