// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed repositories.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use super::query::{self, GroupField, JobFilter, JobGroups, JobPage, JobSort};
use super::{JobRepository, ProcessRepository, ServiceRepository};
use crate::error::CoreError;
use crate::job::{Job, JobEvent, JobEventRecord};
use crate::process::{AccessScope, Process, Visibility};
use crate::service::Service;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// Optimistic update attempts before giving up with [`CoreError::Conflict`].
const MAX_UPDATE_ATTEMPTS: usize = 16;

/// SQLite-backed job, process and service storage.
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Wrap an existing, migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) a database file and run migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| CoreError::Database {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        Self::connect(&format!("sqlite:{}?mode=rwc", path.to_string_lossy())).await
    }

    /// Private in-memory database, lost when the repository is dropped.
    pub async fn in_memory() -> Result<Self, CoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // a single connection that never expires keeps the database alive
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }

    /// Connect to a database URL and run migrations.
    pub async fn connect(url: &str) -> Result<Self, CoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| CoreError::Database {
                operation: "connect".to_string(),
                details: format!("Invalid SQLite URL '{}': {}", url, e),
            })?
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| CoreError::Database {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at '{}': {}", url, e),
            })?;

        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn load_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, CoreError> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT document FROM jobs WHERE 1 = 1");
        if let Some(process_id) = &filter.process_id {
            qb.push(" AND process_id = ").push_bind(process_id.clone());
        }
        if let Some(service_id) = &filter.service_id {
            qb.push(" AND service_id = ").push_bind(service_id.clone());
        }
        if let Some(user_id) = &filter.user_id {
            qb.push(" AND user_id = ").push_bind(user_id.clone());
        }
        if !filter.status.is_empty() {
            qb.push(" AND status IN (");
            let mut separated = qb.separated(", ");
            for status in &filter.status {
                separated.push_bind(status.as_str());
            }
            separated.push_unseparated(")");
        }

        let rows: Vec<(String,)> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|(document,)| serde_json::from_str(&document).map_err(CoreError::from))
            .collect()
    }

    async fn load_job(&self, job_id: Uuid) -> Result<Option<(Job, i64)>, CoreError> {
        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT document, version FROM jobs WHERE id = ?")
                .bind(job_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((document, version)) => Ok(Some((serde_json::from_str(&document)?, version))),
            None => Ok(None),
        }
    }

    /// One optimistic attempt. `Ok(None)` means another writer got there first.
    async fn try_update(
        &self,
        job_id: Uuid,
        events: &[JobEvent],
    ) -> Result<Option<Job>, CoreError> {
        let (current, version) = self
            .load_job(job_id)
            .await?
            .ok_or(CoreError::JobNotFound { job_id })?;

        let at = Utc::now();
        let next = current.fold(events, at)?;
        let document = serde_json::to_string(&next)?;

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, service_id = ?, updated_at = ?, document = ?, version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(next.status.as_str())
        .bind(next.service_id.clone())
        .bind(next.updated)
        .bind(document)
        .bind(job_id.to_string())
        .bind(version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let (last,): (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(sequence), 0) FROM job_events WHERE job_id = ?")
                .bind(job_id.to_string())
                .fetch_one(&mut *tx)
                .await?;

        for (i, event) in events.iter().enumerate() {
            sqlx::query("INSERT INTO job_events (job_id, sequence, at, event) VALUES (?, ?, ?, ?)")
                .bind(job_id.to_string())
                .bind(last + i as i64 + 1)
                .bind(at)
                .bind(serde_json::to_string(event)?)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(Some(next))
    }
}

#[async_trait]
impl JobRepository for SqliteRepository {
    async fn create(&self, job: &Job) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (id, process_id, service_id, status, user_id, visibility,
                              created_at, updated_at, version, document)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(job.id.to_string())
        .bind(&job.process_id)
        .bind(job.service_id.clone())
        .bind(job.status.as_str())
        .bind(job.user_id.clone())
        .bind(job.visibility.as_str())
        .bind(job.created)
        .bind(job.updated)
        .bind(serde_json::to_string(job)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::JobAlreadyExists { job_id: job.id });
        }
        Ok(())
    }

    async fn update(&self, job_id: Uuid, events: Vec<JobEvent>) -> Result<Job, CoreError> {
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            if let Some(job) = self.try_update(job_id, &events).await? {
                return Ok(job);
            }
            debug!(job_id = %job_id, attempt, "Concurrent job update, retrying");
            tokio::time::sleep(Duration::from_millis(2 * attempt as u64)).await;
        }
        Err(CoreError::Conflict { job_id })
    }

    async fn get_by_id(&self, job_id: Uuid) -> Result<Option<Job>, CoreError> {
        Ok(self.load_job(job_id).await?.map(|(job, _)| job))
    }

    async fn find_many(
        &self,
        filter: &JobFilter,
        sort: &JobSort,
        page: usize,
        limit: usize,
    ) -> Result<JobPage, CoreError> {
        let jobs = self.load_jobs(filter).await?;
        query::paginate(jobs, filter, sort, page, limit)
    }

    async fn find_many_grouped(
        &self,
        filter: &JobFilter,
        sort: &JobSort,
        group_by: &[GroupField],
    ) -> Result<JobGroups, CoreError> {
        let jobs = self.load_jobs(filter).await?;
        query::group(jobs, filter, sort, group_by)
    }

    async fn delete(&self, job_id: Uuid) -> Result<bool, CoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM job_events WHERE job_id = ?")
            .bind(job_id.to_string())
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(job_id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn events(&self, job_id: Uuid) -> Result<Vec<JobEventRecord>, CoreError> {
        if self.load_job(job_id).await?.is_none() {
            return Err(CoreError::JobNotFound { job_id });
        }
        let rows: Vec<(i64, DateTime<Utc>, String)> = sqlx::query_as(
            "SELECT sequence, at, event FROM job_events WHERE job_id = ? ORDER BY sequence ASC",
        )
        .bind(job_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(sequence, at, event)| {
                Ok(JobEventRecord {
                    job_id,
                    sequence: sequence as u64,
                    at,
                    event: serde_json::from_str(&event)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ProcessRepository for SqliteRepository {
    async fn save(&self, process: &Process) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO processes (id, visibility, owner, document)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&process.id)
        .bind(process.visibility.as_str())
        .bind(process.owner.clone())
        .bind(serde_json::to_string(process)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::ProcessAlreadyExists {
                process_id: process.id.clone(),
            });
        }
        Ok(())
    }

    async fn get(&self, process_id: &str) -> Result<Option<Process>, CoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT document FROM processes WHERE id = ?")
            .bind(process_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some((document,)) => Ok(Some(serde_json::from_str(&document)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, scope: &AccessScope) -> Result<Vec<Process>, CoreError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT document FROM processes ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        let mut processes = Vec::with_capacity(rows.len());
        for (document,) in rows {
            let process: Process = serde_json::from_str(&document)?;
            if process.is_visible_to(scope) {
                processes.push(process);
            }
        }
        Ok(processes)
    }

    async fn delete(&self, process_id: &str) -> Result<bool, CoreError> {
        let result = sqlx::query("DELETE FROM processes WHERE id = ?")
            .bind(process_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_visibility(
        &self,
        process_id: &str,
        visibility: Visibility,
    ) -> Result<Process, CoreError> {
        let mut process =
            ProcessRepository::get(self, process_id)
                .await?
                .ok_or_else(|| CoreError::ProcessNotFound {
                    process_id: process_id.to_string(),
                })?;
        process.visibility = visibility;

        sqlx::query("UPDATE processes SET visibility = ?, document = ? WHERE id = ?")
            .bind(visibility.as_str())
            .bind(serde_json::to_string(&process)?)
            .bind(process_id)
            .execute(&self.pool)
            .await?;
        Ok(process)
    }
}

#[async_trait]
impl ServiceRepository for SqliteRepository {
    async fn add(&self, service: &Service) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO services (id, visibility, document)
            VALUES (?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&service.id)
        .bind(service.visibility.as_str())
        .bind(serde_json::to_string(service)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::ServiceAlreadyExists {
                service_id: service.id.clone(),
            });
        }
        Ok(())
    }

    async fn get(&self, service_id: &str) -> Result<Option<Service>, CoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT document FROM services WHERE id = ?")
            .bind(service_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some((document,)) => Ok(Some(serde_json::from_str(&document)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, scope: &AccessScope) -> Result<Vec<Service>, CoreError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT document FROM services ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        let mut services = Vec::with_capacity(rows.len());
        for (document,) in rows {
            let service: Service = serde_json::from_str(&document)?;
            if service.is_visible_to(scope) {
                services.push(service);
            }
        }
        Ok(services)
    }

    async fn remove(&self, service_id: &str) -> Result<bool, CoreError> {
        let result = sqlx::query("DELETE FROM services WHERE id = ?")
            .bind(service_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
