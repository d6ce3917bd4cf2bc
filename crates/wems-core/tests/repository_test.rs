// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Repository behaviour shared by the memory and SQLite backends.

mod common;

use std::sync::Arc;

use common::*;
use wems_core::{
    AccessScope, CoreError, ExecutionKind, GroupField, Job, JobFilter, JobRepository, JobSort,
    JobStatus, MemoryRepository, ProcessRepository, Service, ServiceRepository, SortField,
    SortOrder, SqliteRepository, Visibility,
};

async fn sqlite_repo(dir: &tempfile::TempDir) -> SqliteRepository {
    SqliteRepository::from_path(dir.path().join("wems.db"))
        .await
        .expect("sqlite repository")
}

async fn check_lifecycle(repo: &dyn JobRepository) {
    let job = job("echo", 0);
    repo.create(&job).await.unwrap();
    assert!(matches!(
        repo.create(&job).await,
        Err(CoreError::JobAlreadyExists { .. })
    ));

    let running = repo
        .update(job.id, vec![status(JobStatus::Running), progress(40)])
        .await
        .unwrap();
    assert_eq!(running.status, JobStatus::Running);
    assert_eq!(running.progress, 40);

    // rejected batch leaves the stored job untouched
    let err = repo
        .update(job.id, vec![progress(50), progress(10)])
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "INVALID_PROGRESS");
    let stored = repo.get_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(stored.progress, 40);

    let done = repo
        .update(job.id, vec![status(JobStatus::Succeeded)])
        .await
        .unwrap();
    assert_eq!(done.progress, 100);
    assert!(done.finished.is_some());

    let err = repo
        .update(job.id, vec![status(JobStatus::Running)])
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidTransition { .. }));

    let events = repo.events(job.id).await.unwrap();
    let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);
    assert_eq!(Job::replay(&job, &events).unwrap().status, JobStatus::Succeeded);

    assert!(repo.delete(job.id).await.unwrap());
    assert!(repo.get_by_id(job.id).await.unwrap().is_none());
    assert!(!repo.delete(job.id).await.unwrap());
}

async fn check_queries(repo: &dyn JobRepository) {
    let mut ids = Vec::new();
    for (i, process) in ["echo", "sum", "echo", "sum", "echo"].iter().enumerate() {
        let job = job(process, 10 - i as i64);
        repo.create(&job).await.unwrap();
        ids.push(job.id);
    }
    repo.update(ids[0], vec![status(JobStatus::Running), status(JobStatus::Failed)])
        .await
        .unwrap();
    repo.update(ids[1], vec![status(JobStatus::Running)])
        .await
        .unwrap();

    let page = repo
        .find_many(&JobFilter::default(), &JobSort::default(), 0, 2)
        .await
        .unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.items[0].id, ids[4]);

    let oldest_first = JobSort::new(SortField::Created, SortOrder::Asc);
    let last = repo
        .find_many(&JobFilter::default(), &oldest_first, 2, 2)
        .await
        .unwrap();
    assert_eq!(last.items.len(), 1);
    assert_eq!(last.items[0].id, ids[4]);

    let echo = repo
        .find_many(&JobFilter::default().process("echo"), &JobSort::default(), 0, 10)
        .await
        .unwrap();
    assert_eq!(echo.total, 3);

    let active = repo.count_active("echo").await.unwrap();
    assert_eq!(active, 2);

    let failed = repo
        .find_many(
            &JobFilter::default().statuses([JobStatus::Failed]),
            &JobSort::default(),
            0,
            10,
        )
        .await
        .unwrap();
    assert_eq!(failed.total, 1);
    assert_eq!(failed.items[0].id, ids[0]);

    let grouped = repo
        .find_many_grouped(&JobFilter::default(), &JobSort::default(), &[GroupField::Process])
        .await
        .unwrap();
    assert_eq!(grouped.total, 5);
    assert_eq!(grouped.groups.len(), 2);
    assert_eq!(grouped.groups.iter().map(|g| g.count).sum::<usize>(), 5);

    assert!(
        repo.find_many(&JobFilter::default(), &JobSort::default(), 0, 0)
            .await
            .is_err()
    );
}

async fn check_concurrent_writers(repo: Arc<dyn JobRepository>) {
    let job = job("echo", 0);
    repo.create(&job).await.unwrap();
    let job_id = job.id;

    let mut handles = Vec::new();
    for i in 0..10 {
        let repo = repo.clone();
        handles.push(tokio::spawn(async move {
            repo.update(job_id, vec![log(&format!("writer {}", i))]).await
        }));
    }
    for result in futures::future::join_all(handles).await {
        result.unwrap().unwrap();
    }

    let stored = repo.get_by_id(job_id).await.unwrap().unwrap();
    assert_eq!(stored.logs.len(), 10);
    let events = repo.events(job_id).await.unwrap();
    assert_eq!(events.len(), 10);
    let mut sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
    sequences.dedup();
    assert_eq!(sequences.len(), 10);
}

async fn check_processes_and_services<R>(repo: &R)
where
    R: ProcessRepository + ServiceRepository,
{
    let process = echo_process().with_owner("alice");
    ProcessRepository::save(repo, &process).await.unwrap();
    assert!(matches!(
        ProcessRepository::save(repo, &process).await,
        Err(CoreError::ProcessAlreadyExists { .. })
    ));

    let stored = ProcessRepository::get(repo, "echo").await.unwrap().unwrap();
    assert_eq!(stored.kind, ExecutionKind::Builtin);

    let hidden = repo.set_visibility("echo", Visibility::Private).await.unwrap();
    assert_eq!(hidden.visibility, Visibility::Private);
    assert!(
        ProcessRepository::list(repo, &AccessScope::Public)
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(
        ProcessRepository::list(repo, &AccessScope::Owner("alice".to_string()))
            .await
            .unwrap()
            .len(),
        1
    );
    assert!(matches!(
        repo.set_visibility("ghost", Visibility::Public).await,
        Err(CoreError::ProcessNotFound { .. })
    ));
    assert!(ProcessRepository::delete(repo, "echo").await.unwrap());

    let service = Service::new("remote", "http://remote/wps", ExecutionKind::RemoteV1).unwrap();
    repo.add(&service).await.unwrap();
    assert!(matches!(
        repo.add(&service).await,
        Err(CoreError::ServiceAlreadyExists { .. })
    ));
    assert_eq!(
        ServiceRepository::get(repo, "remote").await.unwrap(),
        Some(service)
    );
    assert_eq!(
        ServiceRepository::list(repo, &AccessScope::Public)
            .await
            .unwrap()
            .len(),
        1
    );
    assert!(repo.remove("remote").await.unwrap());
    assert!(ServiceRepository::get(repo, "remote").await.unwrap().is_none());
}

#[tokio::test]
async fn test_memory_job_lifecycle() {
    check_lifecycle(&MemoryRepository::new()).await;
}

#[tokio::test]
async fn test_sqlite_job_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    check_lifecycle(&sqlite_repo(&dir).await).await;
}

#[tokio::test]
async fn test_memory_queries() {
    check_queries(&MemoryRepository::new()).await;
}

#[tokio::test]
async fn test_sqlite_queries() {
    let dir = tempfile::tempdir().unwrap();
    check_queries(&sqlite_repo(&dir).await).await;
}

#[tokio::test]
async fn test_sqlite_in_memory_queries() {
    check_queries(&SqliteRepository::in_memory().await.unwrap()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_memory_concurrent_writers() {
    check_concurrent_writers(Arc::new(MemoryRepository::new())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_concurrent_writers() {
    let dir = tempfile::tempdir().unwrap();
    check_concurrent_writers(Arc::new(sqlite_repo(&dir).await)).await;
}

#[tokio::test]
async fn test_memory_processes_and_services() {
    check_processes_and_services(&MemoryRepository::new()).await;
}

#[tokio::test]
async fn test_sqlite_processes_and_services() {
    let dir = tempfile::tempdir().unwrap();
    check_processes_and_services(&sqlite_repo(&dir).await).await;
}

#[tokio::test]
async fn test_sqlite_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let job = job("echo", 0);
    {
        let repo = sqlite_repo(&dir).await;
        repo.create(&job).await.unwrap();
        repo.update(job.id, vec![status(JobStatus::Running), progress(12)])
            .await
            .unwrap();
        repo.pool().close().await;
    }
    let repo = sqlite_repo(&dir).await;
    let stored = repo.get_by_id(job.id).await.unwrap().unwrap();
    assert_eq!(stored.progress, 12);
    assert_eq!(repo.events(job.id).await.unwrap().len(), 2);
}
