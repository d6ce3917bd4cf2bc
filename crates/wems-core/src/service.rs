// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Registered remote services (providers).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::package::ExecutionKind;
use crate::process::{AccessScope, Visibility};

/// A remote execution service a process can reference by ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Service identifier.
    pub id: String,
    /// Base URL.
    pub url: String,
    /// Protocol family spoken by the service.
    pub kind: ExecutionKind,
    /// Listing visibility.
    #[serde(default)]
    pub visibility: Visibility,
    /// API key or token sent with requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<String>,
    /// Registration time.
    pub registered: DateTime<Utc>,
}

impl Service {
    /// Validate and build a service entry.
    pub fn new(id: impl Into<String>, url: impl Into<String>, kind: ExecutionKind) -> Result<Self> {
        let id = id.into();
        let url = url.into();
        if id.trim().is_empty() {
            return Err(CoreError::Validation {
                field: "id".to_string(),
                message: "service ID is required".to_string(),
            });
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(CoreError::Validation {
                field: "url".to_string(),
                message: format!("'{}' is not an http(s) URL", url),
            });
        }
        if !kind.is_remote() {
            return Err(CoreError::Validation {
                field: "kind".to_string(),
                message: format!("'{}' is not a remote service kind", kind),
            });
        }
        Ok(Self {
            id,
            url: url.trim_end_matches('/').to_string(),
            kind,
            visibility: Visibility::Public,
            credentials: None,
            registered: Utc::now(),
        })
    }

    /// Attach credentials.
    pub fn with_credentials(mut self, credentials: impl Into<String>) -> Self {
        self.credentials = Some(credentials.into());
        self
    }

    /// Set the visibility.
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Whether the service is visible in `scope`.
    pub fn is_visible_to(&self, scope: &AccessScope) -> bool {
        scope.permits(self.visibility, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates() {
        let service = Service::new("hummingbird", "http://remote/wps/", ExecutionKind::RemoteV1).unwrap();
        assert_eq!(service.url, "http://remote/wps");

        assert!(Service::new("", "http://remote", ExecutionKind::RemoteV1).is_err());
        assert!(Service::new("x", "ftp://remote", ExecutionKind::RemoteV1).is_err());
        assert!(Service::new("x", "http://remote", ExecutionKind::Builtin).is_err());
    }

    #[test]
    fn test_private_service_needs_level() {
        let service = Service::new("x", "https://remote", ExecutionKind::RemoteOgc)
            .unwrap()
            .with_visibility(Visibility::Private);
        assert!(!service.is_visible_to(&AccessScope::Public));
        assert!(service.is_visible_to(&AccessScope::Any));
    }
}
