// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! wems Environment - Execution Dispatch & Job Lifecycle
//!
//! This crate executes deployed processes and drives each job from
//! `accepted` to a terminal status. A process runs in-process (builtin),
//! as a local command line or container (containerized), on a remote
//! WPS 1.0, OGC API - Processes or ESGF service, or as a workflow of other
//! deployed processes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Callers (API layer, CLI)                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              Dispatcher                                 │
//! │     deploy / undeploy · services · submit / dismiss · job queries       │
//! └─────────────────────────────────────────────────────────────────────────┘
//!           │                        │ one task per job
//!           │                        ▼
//!           │        ┌───────────────────────────────┐
//!           │        │       LifecycleManager        │
//!           │        │ status · progress · timeout   │
//!           │        └───────────────────────────────┘
//!           │                        │ select(kind)
//!           │                        ▼
//!           │  ┌──────────┐ ┌──────────────┐ ┌──────────┐ ┌──────────┐
//!           │  │ Builtin  │ │Containerized │ │  Remote  │ │ Workflow │
//!           │  └──────────┘ └──────┬───────┘ └────┬─────┘ └────┬─────┘
//!           │                      │ runners      │ HTTP       │ steps
//!           ▼                      ▼              ▼            ▼
//! ┌───────────────────────┐   docker/podman   WPS / OGC     (recursive)
//! │ wems-core repositories│   or native       / ESGF
//! │ (SQLite or in-memory) │
//! └───────────────────────┘
//! ```
//!
//! # Progress
//!
//! | Global progress | Stage |
//! |-----------------|-------|
//! | 0 | Accepted |
//! | 1-2 | Started, working directory prepared |
//! | 5-95 | Adapter execution (remapped from the adapter's 0-100) |
//! | 98 | Results staged |
//! | 100 | Succeeded |
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `WEMS_DATABASE_URL` | `sqlite:.data/wems.db?mode=rwc` | Store URL, or `memory` |
//! | `DATA_DIR` | `.data` | Root of per-job working directories |
//! | `WEMS_PROCESS_DIR` | - | Packages deployed at start-up |
//! | `WEMS_POLL_INTERVAL_MS` | `2000` | Remote status polling interval |
//! | `WEMS_MAX_POLL_DURATION_SECS` | `86400` | Remote monitoring ceiling |
//! | `WEMS_JOB_TIMEOUT_SECS` | `3600` | Job wall-clock ceiling |
//! | `WEMS_HTTP_TIMEOUT_SECS` | `30` | Per-request timeout |
//! | `WEMS_HTTP_RETRIES` | `3` | Retries for idempotent remote reads |
//! | `WEMS_CONTAINER_RUNTIME` | `docker` | `docker` or `podman` |
//! | `WEMS_STALE_CHECK_INTERVAL_SECS` | `60` | Stale job monitor interval |
//! | `WEMS_SYNC_WAIT_SECS` | `20` | Sync submission wait |
//!
//! # Modules
//!
//! - [`adapter`]: Execution adapters, one per execution kind
//! - [`config`]: Configuration from environment variables
//! - [`dispatcher`]: Process, service and job operations
//! - [`error`]: Error types and the execution error taxonomy
//! - [`lifecycle`]: Job state machine driver and progress remapping
//! - [`monitor`]: Cancellable polling loop
//! - [`runner`]: Native and container command execution
//! - [`runtime`]: Embeddable runtime
//! - [`stale_job_monitor`]: Failing orphaned jobs

#![deny(missing_docs)]

/// Execution adapters (builtin, containerized, remote, workflow).
pub mod adapter;

/// Configuration loaded from environment variables.
pub mod config;

/// Process, service and job operations.
pub mod dispatcher;

/// Error types for Environment operations.
pub mod error;

/// Job lifecycle driver.
pub mod lifecycle;

/// Cancellable polling loop for remote jobs.
pub mod monitor;

/// Command execution backends (native, container).
pub mod runner;

/// Embeddable runtime for wems-environment.
pub mod runtime;

/// Background worker for detecting and failing stale jobs.
pub mod stale_job_monitor;

pub use config::Config;
pub use dispatcher::{Dispatcher, SubmitRequest};
pub use error::{Error, ExecutionError};
pub use runtime::EnvironmentRuntime;
