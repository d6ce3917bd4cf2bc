// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for wems-core.
//!
//! Jobs are updated by appending [`JobEvent`]s: a backend folds the events
//! onto the stored job, rejects the whole batch if any event breaks a
//! lifecycle rule, and commits the folded job together with the events.
//! Concurrent writers to the same job never lose each other's events.

pub mod memory;
pub mod query;
pub mod sqlite;

pub use self::memory::MemoryRepository;
pub use self::query::{
    GroupField, JobFilter, JobGroup, JobGroups, JobPage, JobSort, SortField, SortOrder,
};
pub use self::sqlite::SqliteRepository;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::CoreError;
use crate::job::{Job, JobEvent, JobEventRecord};
use crate::process::{AccessScope, Process, Visibility};
use crate::service::Service;
use crate::status::JobStatus;

/// Storage for jobs and their event history.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new job. Fails if the ID is taken.
    async fn create(&self, job: &Job) -> Result<(), CoreError>;

    /// Atomically apply events to a job and return the updated job.
    async fn update(&self, job_id: Uuid, events: Vec<JobEvent>) -> Result<Job, CoreError>;

    /// Fetch a job.
    async fn get_by_id(&self, job_id: Uuid) -> Result<Option<Job>, CoreError>;

    /// One page of jobs matching `filter`.
    async fn find_many(
        &self,
        filter: &JobFilter,
        sort: &JobSort,
        page: usize,
        limit: usize,
    ) -> Result<JobPage, CoreError>;

    /// Jobs matching `filter`, grouped by the given attributes.
    async fn find_many_grouped(
        &self,
        filter: &JobFilter,
        sort: &JobSort,
        group_by: &[GroupField],
    ) -> Result<JobGroups, CoreError>;

    /// Remove a job and its history. Returns whether it existed.
    async fn delete(&self, job_id: Uuid) -> Result<bool, CoreError>;

    /// The job's event history in application order.
    async fn events(&self, job_id: Uuid) -> Result<Vec<JobEventRecord>, CoreError>;

    /// Number of non-terminal jobs running a process.
    async fn count_active(&self, process_id: &str) -> Result<usize, CoreError> {
        let filter = JobFilter::any()
            .process(process_id)
            .statuses(JobStatus::ACTIVE);
        Ok(self.find_many(&filter, &JobSort::default(), 0, 1).await?.total)
    }
}

/// Storage for deployed processes.
#[async_trait]
pub trait ProcessRepository: Send + Sync {
    /// Store a new process. Fails if the ID is taken.
    async fn save(&self, process: &Process) -> Result<(), CoreError>;

    /// Fetch a process.
    async fn get(&self, process_id: &str) -> Result<Option<Process>, CoreError>;

    /// Processes visible in `scope`, ordered by ID.
    async fn list(&self, scope: &AccessScope) -> Result<Vec<Process>, CoreError>;

    /// Remove a process. Returns whether it existed.
    async fn delete(&self, process_id: &str) -> Result<bool, CoreError>;

    /// Change a process's visibility and return it.
    async fn set_visibility(
        &self,
        process_id: &str,
        visibility: Visibility,
    ) -> Result<Process, CoreError>;
}

/// Storage for registered remote services.
#[async_trait]
pub trait ServiceRepository: Send + Sync {
    /// Register a service. Fails if the ID is taken.
    async fn add(&self, service: &Service) -> Result<(), CoreError>;

    /// Fetch a service.
    async fn get(&self, service_id: &str) -> Result<Option<Service>, CoreError>;

    /// Services visible in `scope`, ordered by ID.
    async fn list(&self, scope: &AccessScope) -> Result<Vec<Service>, CoreError>;

    /// Remove a service. Returns whether it existed.
    async fn remove(&self, service_id: &str) -> Result<bool, CoreError>;
}
