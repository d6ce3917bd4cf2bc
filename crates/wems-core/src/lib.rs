// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! WEMS Core - process, job and status model
//!
//! This crate holds everything about workflow execution that does not need a
//! runtime: application packages and how they select an execution backend,
//! the job lifecycle state machine, status vocabulary translation, progress
//! remapping, and the job repositories with their query engine.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        wems-environment                             │
//! │      (Dispatcher, Lifecycle Manager, Adapters, Polling Monitor)     │
//! └─────────────────────────────────────────────────────────────────────┘
//!                 │ parses packages            │ appends job events
//!                 ▼                            ▼
//! ┌──────────────────────────────┐  ┌───────────────────────────────────┐
//! │  package / process / workflow│  │ persistence (memory, sqlite)      │
//! │  (marker -> execution kind)  │  │ job = fold(events), query engine  │
//! └──────────────────────────────┘  └───────────────────────────────────┘
//! ```
//!
//! # Job Lifecycle
//!
//! | Status | Description |
//! |--------|-------------|
//! | `accepted` | Job record created, execution not started |
//! | `running` | An adapter is executing the job |
//! | `paused` | Suspended by the remote service |
//! | `succeeded` | Finished, results staged, progress 100 |
//! | `failed` | Finished with exceptions |
//! | `dismissed` | Cancelled on request |
//!
//! Terminal statuses are final. Progress is monotonic and reaches 100 only
//! on success.
//!
//! # Execution Kinds
//!
//! | Marker | Kind |
//! |--------|------|
//! | `BuiltinRequirement` | `builtin` |
//! | `DockerRequirement` or none | `containerized` |
//! | `WPS1Requirement` | `remote-v1` |
//! | `OGCAPIRequirement` | `remote-ogc` |
//! | `ESGF-CWTRequirement` | `remote-esgf` |
//! | `class: Workflow` | `workflow` |
//!
//! # Modules
//!
//! - [`compliance`]: Status vocabulary translation
//! - [`error`]: Error types with stable error codes
//! - [`job`]: Jobs, job events and status summaries
//! - [`package`]: Package parsing and execution marker detection
//! - [`persistence`]: Job, process and service repositories
//! - [`process`]: Deployed processes and access scopes
//! - [`progress`]: Linear progress remapping
//! - [`service`]: Registered remote services
//! - [`status`]: Job status state machine
//! - [`workflow`]: Workflow step graph and batch planning

#![deny(missing_docs)]

/// Status vocabulary translation.
pub mod compliance;

/// Error types with stable error codes.
pub mod error;

/// Jobs and their event history.
pub mod job;

/// Package parsing and execution marker detection.
pub mod package;

/// Job, process and service repositories.
pub mod persistence;

/// Deployed processes and visibility.
pub mod process;

/// Linear progress remapping.
pub mod progress;

/// Registered remote services.
pub mod service;

/// Job status state machine.
pub mod status;

/// Workflow step graph and batch planning.
pub mod workflow;

pub use compliance::{StatusVocabulary, UNKNOWN_STATUS, canonical_status, map_status};
pub use error::{CoreError, Result};
pub use job::{
    ExceptionEntry, ExecutionMode, Job, JobEvent, JobEventRecord, JobSummary, LogEntry, LogLevel,
};
pub use package::{ExecutionKind, ExecutionRequirement, Package, ParameterSpec, RemoteTarget};
pub use persistence::{
    GroupField, JobFilter, JobGroups, JobPage, JobRepository, JobSort, MemoryRepository,
    ProcessRepository, ServiceRepository, SortField, SortOrder, SqliteRepository,
};
pub use process::{AccessScope, Process, Visibility};
pub use progress::{ProgressRange, remap, remap_percent};
pub use service::Service;
pub use status::JobStatus;
