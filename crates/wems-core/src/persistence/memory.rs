// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory repositories, used by tests and ephemeral deployments.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use super::query::{self, GroupField, JobFilter, JobGroups, JobPage, JobSort};
use super::{JobRepository, ProcessRepository, ServiceRepository};
use crate::error::CoreError;
use crate::job::{Job, JobEvent, JobEventRecord};
use crate::process::{AccessScope, Process, Visibility};
use crate::service::Service;

struct JobEntry {
    job: Job,
    events: Vec<JobEventRecord>,
}

/// Job, process and service storage backed by concurrent maps.
///
/// Updates hold the job's shard lock while folding, which serializes
/// writers per job without blocking unrelated jobs.
#[derive(Default)]
pub struct MemoryRepository {
    jobs: DashMap<Uuid, JobEntry>,
    processes: DashMap<String, Process>,
    services: DashMap<String, Service>,
}

impl MemoryRepository {
    /// Empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Vec<Job> {
        self.jobs.iter().map(|entry| entry.job.clone()).collect()
    }
}

#[async_trait]
impl JobRepository for MemoryRepository {
    async fn create(&self, job: &Job) -> Result<(), CoreError> {
        match self.jobs.entry(job.id) {
            Entry::Occupied(_) => Err(CoreError::JobAlreadyExists { job_id: job.id }),
            Entry::Vacant(slot) => {
                slot.insert(JobEntry {
                    job: job.clone(),
                    events: Vec::new(),
                });
                Ok(())
            }
        }
    }

    async fn update(&self, job_id: Uuid, events: Vec<JobEvent>) -> Result<Job, CoreError> {
        let mut entry = self
            .jobs
            .get_mut(&job_id)
            .ok_or(CoreError::JobNotFound { job_id })?;
        let at = Utc::now();
        let next = entry.job.fold(&events, at)?;

        let base = entry.events.len() as u64;
        entry
            .events
            .extend(events.into_iter().enumerate().map(|(i, event)| JobEventRecord {
                job_id,
                sequence: base + i as u64 + 1,
                at,
                event,
            }));
        entry.job = next.clone();
        Ok(next)
    }

    async fn get_by_id(&self, job_id: Uuid) -> Result<Option<Job>, CoreError> {
        Ok(self.jobs.get(&job_id).map(|entry| entry.job.clone()))
    }

    async fn find_many(
        &self,
        filter: &JobFilter,
        sort: &JobSort,
        page: usize,
        limit: usize,
    ) -> Result<JobPage, CoreError> {
        query::paginate(self.snapshot(), filter, sort, page, limit)
    }

    async fn find_many_grouped(
        &self,
        filter: &JobFilter,
        sort: &JobSort,
        group_by: &[GroupField],
    ) -> Result<JobGroups, CoreError> {
        query::group(self.snapshot(), filter, sort, group_by)
    }

    async fn delete(&self, job_id: Uuid) -> Result<bool, CoreError> {
        Ok(self.jobs.remove(&job_id).is_some())
    }

    async fn events(&self, job_id: Uuid) -> Result<Vec<JobEventRecord>, CoreError> {
        self.jobs
            .get(&job_id)
            .map(|entry| entry.events.clone())
            .ok_or(CoreError::JobNotFound { job_id })
    }
}

#[async_trait]
impl ProcessRepository for MemoryRepository {
    async fn save(&self, process: &Process) -> Result<(), CoreError> {
        match self.processes.entry(process.id.clone()) {
            Entry::Occupied(_) => Err(CoreError::ProcessAlreadyExists {
                process_id: process.id.clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(process.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, process_id: &str) -> Result<Option<Process>, CoreError> {
        Ok(self.processes.get(process_id).map(|p| p.clone()))
    }

    async fn list(&self, scope: &AccessScope) -> Result<Vec<Process>, CoreError> {
        let visible: BTreeMap<String, Process> = self
            .processes
            .iter()
            .filter(|p| p.is_visible_to(scope))
            .map(|p| (p.id.clone(), p.clone()))
            .collect();
        Ok(visible.into_values().collect())
    }

    async fn delete(&self, process_id: &str) -> Result<bool, CoreError> {
        Ok(self.processes.remove(process_id).is_some())
    }

    async fn set_visibility(
        &self,
        process_id: &str,
        visibility: Visibility,
    ) -> Result<Process, CoreError> {
        let mut process =
            self.processes
                .get_mut(process_id)
                .ok_or_else(|| CoreError::ProcessNotFound {
                    process_id: process_id.to_string(),
                })?;
        process.visibility = visibility;
        Ok(process.clone())
    }
}

#[async_trait]
impl ServiceRepository for MemoryRepository {
    async fn add(&self, service: &Service) -> Result<(), CoreError> {
        match self.services.entry(service.id.clone()) {
            Entry::Occupied(_) => Err(CoreError::ServiceAlreadyExists {
                service_id: service.id.clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(service.clone());
                Ok(())
            }
        }
    }

    async fn get(&self, service_id: &str) -> Result<Option<Service>, CoreError> {
        Ok(self.services.get(service_id).map(|s| s.clone()))
    }

    async fn list(&self, scope: &AccessScope) -> Result<Vec<Service>, CoreError> {
        let visible: BTreeMap<String, Service> = self
            .services
            .iter()
            .filter(|s| s.is_visible_to(scope))
            .map(|s| (s.id.clone(), s.clone()))
            .collect();
        Ok(visible.into_values().collect())
    }

    async fn remove(&self, service_id: &str) -> Result<bool, CoreError> {
        Ok(self.services.remove(service_id).is_some())
    }
}
