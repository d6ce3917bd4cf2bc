// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job status and the lifecycle state machine.
//!
//! ```text
//!   accepted ──► running ──► succeeded
//!      │          │  ▲  ├──► failed
//!      │          ▼  │  └──► dismissed
//!      │         paused
//!      └──────────────────► dismissed
//! ```
//!
//! Terminal states have no outgoing edges. `paused` may only return to
//! `running`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Canonical job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Job record created, execution unit not yet started.
    Accepted,
    /// Adapter is executing the job.
    Running,
    /// Execution temporarily suspended (remote services only).
    Paused,
    /// Execution completed and results are staged.
    Succeeded,
    /// Execution failed; exceptions describe why.
    Failed,
    /// Execution was cancelled on request.
    Dismissed,
}

impl JobStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Accepted,
        JobStatus::Running,
        JobStatus::Paused,
        JobStatus::Succeeded,
        JobStatus::Failed,
        JobStatus::Dismissed,
    ];

    /// Statuses a job can still leave.
    pub const ACTIVE: [JobStatus; 3] = [JobStatus::Accepted, JobStatus::Running, JobStatus::Paused];

    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Dismissed => "dismissed",
        }
    }

    /// Whether no further transition can leave this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Dismissed)
    }

    /// Whether the lifecycle graph has an edge from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Accepted, Running)
                | (Accepted, Dismissed)
                | (Running, Paused)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Dismissed)
                | (Paused, Running)
        )
    }

    /// Intermediate statuses needed to reach `target` from `self`, ending with `target`.
    ///
    /// Used when finalizing a job whose adapter left it paused or never
    /// started it. Returns `None` when `target` is unreachable.
    pub fn path_to(&self, target: JobStatus) -> Option<Vec<JobStatus>> {
        if self.can_transition_to(target) {
            return Some(vec![target]);
        }
        match self {
            JobStatus::Accepted if JobStatus::Running.can_transition_to(target) => {
                Some(vec![JobStatus::Running, target])
            }
            JobStatus::Paused if JobStatus::Running.can_transition_to(target) => {
                Some(vec![JobStatus::Running, target])
            }
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown job status '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_have_no_exit() {
        for from in JobStatus::ALL.into_iter().filter(JobStatus::is_terminal) {
            for to in JobStatus::ALL {
                assert!(!from.can_transition_to(to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_paused_only_returns_to_running() {
        let exits: Vec<_> = JobStatus::ALL
            .into_iter()
            .filter(|s| JobStatus::Paused.can_transition_to(*s))
            .collect();
        assert_eq!(exits, vec![JobStatus::Running]);
    }

    #[test]
    fn test_dismissed_reachable_from_accepted_and_running_only() {
        let sources: Vec<_> = JobStatus::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(JobStatus::Dismissed))
            .collect();
        assert_eq!(sources, vec![JobStatus::Accepted, JobStatus::Running]);
    }

    #[test]
    fn test_path_to() {
        assert_eq!(
            JobStatus::Accepted.path_to(JobStatus::Failed),
            Some(vec![JobStatus::Running, JobStatus::Failed])
        );
        assert_eq!(
            JobStatus::Paused.path_to(JobStatus::Dismissed),
            Some(vec![JobStatus::Running, JobStatus::Dismissed])
        );
        assert_eq!(
            JobStatus::Accepted.path_to(JobStatus::Dismissed),
            Some(vec![JobStatus::Dismissed])
        );
        assert_eq!(JobStatus::Failed.path_to(JobStatus::Dismissed), None);
    }

    #[test]
    fn test_round_trip_names() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
            assert_eq!(
                serde_json::to_value(status).unwrap(),
                serde_json::json!(status.as_str())
            );
        }
        assert!("ProcessSucceeded".parse::<JobStatus>().is_err());
    }
}
