// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job query engine: filtering, sorting, pagination and grouping.
//!
//! Backends narrow the candidate set however they can and then hand the
//! remaining jobs to [`paginate`] or [`group`], so every backend returns the
//! same pages for the same filter.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};
use crate::job::Job;
use crate::process::AccessScope;
use crate::status::JobStatus;

/// Largest accepted page size.
pub const MAX_PAGE_LIMIT: usize = 10_000;

/// Criteria a job must match. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobFilter {
    /// Exact process ID.
    pub process_id: Option<String>,
    /// Exact service ID.
    pub service_id: Option<String>,
    /// Any of these statuses.
    #[serde(default)]
    pub status: Vec<JobStatus>,
    /// All of these tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Visibility scope of the caller.
    #[serde(default)]
    pub access: AccessScope,
    /// Exact notification address.
    pub notification_email: Option<String>,
    /// Exact submitting user.
    pub user_id: Option<String>,
    /// Created at or after.
    pub created_after: Option<DateTime<Utc>>,
    /// Created strictly before.
    pub created_before: Option<DateTime<Utc>>,
    /// Workflow or single-process jobs only.
    pub is_workflow: Option<bool>,
    /// Case-insensitive substring of the process ID or status message.
    pub text: Option<String>,
}

impl JobFilter {
    /// Filter for every job regardless of visibility.
    pub fn any() -> Self {
        Self {
            access: AccessScope::Any,
            ..Self::default()
        }
    }

    /// Restrict to one process.
    pub fn process(mut self, process_id: impl Into<String>) -> Self {
        self.process_id = Some(process_id.into());
        self
    }

    /// Restrict to some statuses.
    pub fn statuses(mut self, statuses: impl IntoIterator<Item = JobStatus>) -> Self {
        self.status = statuses.into_iter().collect();
        self
    }

    /// Whether `job` matches every criterion.
    pub fn matches(&self, job: &Job) -> bool {
        if let Some(process_id) = &self.process_id
            && &job.process_id != process_id
        {
            return false;
        }
        if let Some(service_id) = &self.service_id
            && job.service_id.as_ref() != Some(service_id)
        {
            return false;
        }
        if !self.status.is_empty() && !self.status.contains(&job.status) {
            return false;
        }
        if !self.tags.iter().all(|tag| job.tags.contains(tag)) {
            return false;
        }
        if !job.is_visible_to(&self.access) {
            return false;
        }
        if let Some(email) = &self.notification_email
            && job.notification_email.as_ref() != Some(email)
        {
            return false;
        }
        if let Some(user_id) = &self.user_id
            && job.user_id.as_ref() != Some(user_id)
        {
            return false;
        }
        if let Some(after) = self.created_after
            && job.created < after
        {
            return false;
        }
        if let Some(before) = self.created_before
            && job.created >= before
        {
            return false;
        }
        if let Some(is_workflow) = self.is_workflow
            && job.is_workflow != is_workflow
        {
            return false;
        }
        if let Some(text) = &self.text {
            let needle = text.to_lowercase();
            let in_process = job.process_id.to_lowercase().contains(&needle);
            let in_message = job
                .status_message
                .as_deref()
                .is_some_and(|m| m.to_lowercase().contains(&needle));
            if !in_process && !in_message {
                return false;
            }
        }
        true
    }
}

/// Sort key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    /// Creation time.
    #[default]
    Created,
    /// Finish time (unfinished jobs last).
    Finished,
    /// Last update time.
    Updated,
    /// Status, in lifecycle order.
    Status,
    /// Process ID.
    Process,
    /// Service ID.
    Service,
    /// Submitting user.
    User,
    /// Progress.
    Progress,
    /// Elapsed time.
    Duration,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Smallest first.
    Asc,
    /// Largest first.
    #[default]
    Desc,
}

/// Sort specification. Defaults to newest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSort {
    /// Key.
    pub field: SortField,
    /// Direction.
    pub order: SortOrder,
}

impl JobSort {
    /// Build a sort specification.
    pub fn new(field: SortField, order: SortOrder) -> Self {
        Self { field, order }
    }

    fn compare(&self, a: &Job, b: &Job) -> Ordering {
        let primary = match self.field {
            SortField::Created => a.created.cmp(&b.created),
            SortField::Finished => match (a.finished, b.finished) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
            SortField::Updated => a.updated.cmp(&b.updated),
            SortField::Status => a.status.cmp(&b.status),
            SortField::Process => a.process_id.cmp(&b.process_id),
            SortField::Service => a.service_id.cmp(&b.service_id),
            SortField::User => a.user_id.cmp(&b.user_id),
            SortField::Progress => a.progress.cmp(&b.progress),
            SortField::Duration => a.duration().cmp(&b.duration()),
        };
        let primary = match self.order {
            SortOrder::Asc => primary,
            SortOrder::Desc => primary.reverse(),
        };
        // stable across calls so that pages never overlap
        primary.then_with(|| a.id.cmp(&b.id))
    }

    /// Sort jobs in place.
    pub fn apply(&self, jobs: &mut [Job]) {
        jobs.sort_by(|a, b| self.compare(a, b));
    }
}

/// One page of jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPage {
    /// Jobs on this page.
    pub items: Vec<Job>,
    /// Number of jobs matching the filter across all pages.
    pub total: usize,
    /// 0-based page index.
    pub page: usize,
    /// Page size.
    pub limit: usize,
}

/// Attribute jobs can be grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupField {
    /// Process ID.
    Process,
    /// Service ID.
    Service,
    /// Status.
    Status,
    /// Submitting user.
    User,
    /// Visibility.
    Visibility,
    /// Workflow flag.
    Workflow,
}

impl GroupField {
    /// Key in the category map.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Process => "process",
            Self::Service => "service",
            Self::Status => "status",
            Self::User => "user",
            Self::Visibility => "visibility",
            Self::Workflow => "workflow",
        }
    }

    fn value_of(&self, job: &Job) -> Value {
        let opt = |v: &Option<String>| v.clone().map(Value::String).unwrap_or(Value::Null);
        match self {
            Self::Process => Value::String(job.process_id.clone()),
            Self::Service => opt(&job.service_id),
            Self::Status => Value::String(job.status.as_str().to_string()),
            Self::User => opt(&job.user_id),
            Self::Visibility => Value::String(job.visibility.as_str().to_string()),
            Self::Workflow => Value::Bool(job.is_workflow),
        }
    }
}

/// Jobs sharing one combination of grouped attribute values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobGroup {
    /// Grouped attribute to value.
    pub category: BTreeMap<String, Value>,
    /// Jobs in the group, in requested order.
    pub jobs: Vec<Job>,
    /// Number of jobs in the group.
    pub count: usize,
}

/// Grouped query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobGroups {
    /// Groups, ordered by category.
    pub groups: Vec<JobGroup>,
    /// Number of jobs across all groups.
    pub total: usize,
}

fn check_limit(limit: usize) -> Result<()> {
    if limit == 0 || limit > MAX_PAGE_LIMIT {
        return Err(CoreError::Validation {
            field: "limit".to_string(),
            message: format!("limit must be between 1 and {}", MAX_PAGE_LIMIT),
        });
    }
    Ok(())
}

/// Filter, sort and cut one page out of `jobs`.
pub fn paginate(
    jobs: impl IntoIterator<Item = Job>,
    filter: &JobFilter,
    sort: &JobSort,
    page: usize,
    limit: usize,
) -> Result<JobPage> {
    check_limit(limit)?;
    let mut matched: Vec<Job> = jobs.into_iter().filter(|job| filter.matches(job)).collect();
    sort.apply(&mut matched);
    let total = matched.len();
    let items = matched
        .into_iter()
        .skip(page.saturating_mul(limit))
        .take(limit)
        .collect();
    Ok(JobPage {
        items,
        total,
        page,
        limit,
    })
}

/// Filter, sort and partition `jobs` by the given attributes.
pub fn group(
    jobs: impl IntoIterator<Item = Job>,
    filter: &JobFilter,
    sort: &JobSort,
    fields: &[GroupField],
) -> Result<JobGroups> {
    if fields.is_empty() {
        return Err(CoreError::Validation {
            field: "group_by".to_string(),
            message: "at least one grouping attribute is required".to_string(),
        });
    }

    let mut matched: Vec<Job> = jobs.into_iter().filter(|job| filter.matches(job)).collect();
    sort.apply(&mut matched);
    let total = matched.len();

    // keyed by serialized category for a stable order
    let mut buckets: BTreeMap<String, JobGroup> = BTreeMap::new();
    for job in matched {
        let category: BTreeMap<String, Value> = fields
            .iter()
            .map(|field| (field.key().to_string(), field.value_of(&job)))
            .collect();
        let key = serde_json::to_string(&category)?;
        let entry = buckets.entry(key).or_insert_with(|| JobGroup {
            category,
            jobs: Vec::new(),
            count: 0,
        });
        entry.jobs.push(job);
        entry.count += 1;
    }

    Ok(JobGroups {
        groups: buckets.into_values().collect(),
        total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::Visibility;
    use serde_json::Map;

    fn job(process: &str, status: JobStatus, minutes_ago: i64) -> Job {
        let mut job = Job::new(process, Map::new());
        job.status = status;
        job.created = Utc::now() - chrono::Duration::minutes(minutes_ago);
        job
    }

    fn fixture() -> Vec<Job> {
        vec![
            job("echo", JobStatus::Succeeded, 5),
            job("echo", JobStatus::Failed, 4),
            job("sum", JobStatus::Running, 3),
            job("sum", JobStatus::Succeeded, 2),
            job("echo", JobStatus::Accepted, 1),
        ]
    }

    #[test]
    fn test_pages_partition_the_result() {
        let jobs = fixture();
        let sort = JobSort::default();
        let filter = JobFilter::default();
        let mut seen = Vec::new();
        for page in 0..3 {
            let result = paginate(jobs.clone(), &filter, &sort, page, 2).unwrap();
            assert_eq!(result.total, 5);
            seen.extend(result.items.into_iter().map(|j| j.id));
        }
        let mut expected: Vec<_> = jobs.iter().map(|j| j.id).collect();
        expected.reverse();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_page_past_end_is_empty() {
        let result = paginate(fixture(), &JobFilter::default(), &JobSort::default(), 10, 2).unwrap();
        assert!(result.items.is_empty());
        assert_eq!(result.total, 5);
    }

    #[test]
    fn test_zero_limit_rejected() {
        assert!(paginate(fixture(), &JobFilter::default(), &JobSort::default(), 0, 0).is_err());
    }

    #[test]
    fn test_filters() {
        let filter = JobFilter::default()
            .process("echo")
            .statuses([JobStatus::Succeeded, JobStatus::Failed]);
        let result = paginate(fixture(), &filter, &JobSort::default(), 0, 10).unwrap();
        assert_eq!(result.total, 2);
        assert!(result.items.iter().all(|j| j.process_id == "echo"));
    }

    #[test]
    fn test_private_jobs_hidden_from_public_scope() {
        let mut jobs = fixture();
        jobs[0].visibility = Visibility::Private;
        jobs[0].user_id = Some("alice".to_string());

        let public = paginate(jobs.clone(), &JobFilter::default(), &JobSort::default(), 0, 10).unwrap();
        assert_eq!(public.total, 4);

        let owner = JobFilter {
            access: AccessScope::Owner("alice".to_string()),
            ..JobFilter::default()
        };
        assert_eq!(paginate(jobs, &owner, &JobSort::default(), 0, 10).unwrap().total, 5);
    }

    #[test]
    fn test_sort_ascending_by_process() {
        let sort = JobSort::new(SortField::Process, SortOrder::Asc);
        let result = paginate(fixture(), &JobFilter::default(), &sort, 0, 10).unwrap();
        let processes: Vec<_> = result.items.iter().map(|j| j.process_id.as_str()).collect();
        assert_eq!(processes, vec!["echo", "echo", "echo", "sum", "sum"]);
    }

    #[test]
    fn test_group_by_process_and_status() {
        let groups = group(
            fixture(),
            &JobFilter::default(),
            &JobSort::default(),
            &[GroupField::Process, GroupField::Status],
        )
        .unwrap();
        assert_eq!(groups.total, 5);
        assert_eq!(groups.groups.len(), 5);

        let by_process = group(
            fixture(),
            &JobFilter::default(),
            &JobSort::default(),
            &[GroupField::Process],
        )
        .unwrap();
        assert_eq!(by_process.groups.len(), 2);
        let counts: usize = by_process.groups.iter().map(|g| g.count).sum();
        assert_eq!(counts, by_process.total);
        assert_eq!(by_process.groups[0].category["process"], "echo");
        assert_eq!(by_process.groups[0].jobs.len(), 3);
    }

    #[test]
    fn test_group_requires_fields() {
        assert!(group(fixture(), &JobFilter::default(), &JobSort::default(), &[]).is_err());
    }
}
