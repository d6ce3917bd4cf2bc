// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Status compliance mapping between incompatible status vocabularies.
//!
//! Remote services and client libraries each speak their own status words.
//! [`map_status`] resolves any known word to the canonical [`JobStatus`] and
//! then emits the closest word of the requested vocabulary. The mapping is
//! total: anything unrecognised becomes [`UNKNOWN_STATUS`].

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::status::JobStatus;

/// Designated value for statuses that no vocabulary recognises.
pub const UNKNOWN_STATUS: &str = "unknown";

/// A status vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusVocabulary {
    /// Internal lowercase names (`accepted`, `running`, `paused`, `succeeded`, ...).
    Canonical,
    /// OGC API - Processes words (`accepted`, `running`, `successful`, `failed`, `dismissed`).
    Ogc,
    /// WPS 1.0 status elements (`ProcessAccepted`, `ProcessStarted`, ...).
    Wps1,
    /// Numeric status codes (`0` accepted to `4` failed).
    NumericCode,
    /// Client library enum (`Accepted`, `Running`, `Paused`, `Succeeded`, `Failed`).
    Library,
}

impl StatusVocabulary {
    /// Every vocabulary.
    pub const ALL: [StatusVocabulary; 5] = [
        StatusVocabulary::Canonical,
        StatusVocabulary::Ogc,
        StatusVocabulary::Wps1,
        StatusVocabulary::NumericCode,
        StatusVocabulary::Library,
    ];

    /// Words that belong to this vocabulary.
    pub fn words(&self) -> &'static [&'static str] {
        match self {
            Self::Canonical => &[
                "accepted",
                "running",
                "paused",
                "succeeded",
                "failed",
                "dismissed",
            ],
            Self::Ogc => &["accepted", "running", "successful", "failed", "dismissed"],
            Self::Wps1 => &[
                "ProcessAccepted",
                "ProcessStarted",
                "ProcessPaused",
                "ProcessSucceeded",
                "ProcessFailed",
            ],
            Self::NumericCode => &["0", "1", "2", "3", "4"],
            Self::Library => &["Accepted", "Running", "Paused", "Succeeded", "Failed"],
        }
    }

    /// Emit the closest word of this vocabulary for a canonical status.
    pub fn word_for(&self, status: JobStatus) -> &'static str {
        use JobStatus::*;
        match (self, status) {
            (Self::Canonical, status) => status.as_str(),

            (Self::Ogc, Accepted) => "accepted",
            (Self::Ogc, Running) => "running",
            (Self::Ogc, Paused) => {
                warn!(vocabulary = %self, "no paused status, reporting running");
                "running"
            }
            (Self::Ogc, Succeeded) => "successful",
            (Self::Ogc, Failed) => "failed",
            (Self::Ogc, Dismissed) => "dismissed",

            (Self::Wps1, Accepted) => "ProcessAccepted",
            (Self::Wps1, Running) => "ProcessStarted",
            (Self::Wps1, Paused) => "ProcessPaused",
            (Self::Wps1, Succeeded) => "ProcessSucceeded",
            (Self::Wps1, Failed) => "ProcessFailed",
            (Self::Wps1, Dismissed) => {
                warn!(vocabulary = %self, "no dismissed status, reporting failed");
                "ProcessFailed"
            }

            (Self::NumericCode, Accepted) => "0",
            (Self::NumericCode, Running) => "1",
            (Self::NumericCode, Paused) => "2",
            (Self::NumericCode, Succeeded) => "3",
            (Self::NumericCode, Failed) => "4",
            (Self::NumericCode, Dismissed) => {
                warn!(vocabulary = %self, "no dismissed status, reporting failed");
                "4"
            }

            (Self::Library, Accepted) => "Accepted",
            (Self::Library, Running) => "Running",
            (Self::Library, Paused) => "Paused",
            (Self::Library, Succeeded) => "Succeeded",
            (Self::Library, Failed) => "Failed",
            (Self::Library, Dismissed) => {
                warn!(vocabulary = %self, "no dismissed status, reporting failed");
                "Failed"
            }
        }
    }
}

impl fmt::Display for StatusVocabulary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Canonical => "canonical",
            Self::Ogc => "ogc",
            Self::Wps1 => "wps1",
            Self::NumericCode => "numeric-code",
            Self::Library => "library",
        };
        f.write_str(name)
    }
}

/// Source lookup table: every known word with its canonical status.
const SOURCE_TABLE: &[(&str, JobStatus)] = &[
    // canonical / ogc
    ("accepted", JobStatus::Accepted),
    ("running", JobStatus::Running),
    ("paused", JobStatus::Paused),
    ("succeeded", JobStatus::Succeeded),
    ("successful", JobStatus::Succeeded),
    ("failed", JobStatus::Failed),
    ("dismissed", JobStatus::Dismissed),
    // wps1
    ("ProcessAccepted", JobStatus::Accepted),
    ("ProcessStarted", JobStatus::Running),
    ("ProcessPaused", JobStatus::Paused),
    ("ProcessSucceeded", JobStatus::Succeeded),
    ("ProcessFailed", JobStatus::Failed),
    // numeric codes
    ("0", JobStatus::Accepted),
    ("1", JobStatus::Running),
    ("2", JobStatus::Paused),
    ("3", JobStatus::Succeeded),
    ("4", JobStatus::Failed),
    // library enum
    ("Accepted", JobStatus::Accepted),
    ("Running", JobStatus::Running),
    ("Paused", JobStatus::Paused),
    ("Succeeded", JobStatus::Succeeded),
    ("Failed", JobStatus::Failed),
    // common aliases seen on remote services
    ("started", JobStatus::Running),
    ("queued", JobStatus::Accepted),
    ("pending", JobStatus::Accepted),
    ("created", JobStatus::Accepted),
    ("success", JobStatus::Succeeded),
    ("finished", JobStatus::Succeeded),
    ("completed", JobStatus::Succeeded),
    ("error", JobStatus::Failed),
    ("exception", JobStatus::Failed),
    ("cancelled", JobStatus::Dismissed),
    ("canceled", JobStatus::Dismissed),
];

/// Resolve any known status word to the canonical status.
///
/// Exact matches win; otherwise the lookup is case-insensitive.
pub fn canonical_status(value: &str) -> Option<JobStatus> {
    let value = value.trim();
    SOURCE_TABLE
        .iter()
        .find(|(word, _)| *word == value)
        .or_else(|| {
            SOURCE_TABLE
                .iter()
                .find(|(word, _)| word.eq_ignore_ascii_case(value))
        })
        .map(|(_, status)| *status)
}

/// Map a status word from any vocabulary into `target`.
///
/// Returns [`UNKNOWN_STATUS`] when `value` is not recognised.
pub fn map_status(value: &str, target: StatusVocabulary) -> String {
    match canonical_status(value) {
        Some(status) => target.word_for(status).to_string(),
        None => UNKNOWN_STATUS.to_string(),
    }
}
