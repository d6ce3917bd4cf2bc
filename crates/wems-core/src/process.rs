// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployed processes and visibility.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, Result};
use crate::package::{
    ExecutionKind, ExecutionRequirement, Package, ParameterSpec, validate_inputs,
};

/// Who may see a process, a job or a service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Listed for everyone.
    #[default]
    Public,
    /// Listed only for its owner and for administrative scopes.
    Private,
}

impl Visibility {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Access scope of a caller for listing and lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessScope {
    /// Anonymous caller: public items only.
    #[default]
    Public,
    /// Authenticated user: public items plus items they own.
    Owner(String),
    /// Public items plus items of the given visibility.
    Level(Visibility),
    /// Administrative caller: everything.
    Any,
}

impl AccessScope {
    /// Whether an item with this visibility and owner is visible in scope.
    pub fn permits(&self, visibility: Visibility, owner: Option<&str>) -> bool {
        if visibility == Visibility::Public {
            return true;
        }
        match self {
            Self::Public => false,
            Self::Owner(user) => owner == Some(user.as_str()),
            Self::Level(level) => *level == visibility,
            Self::Any => true,
        }
    }
}

/// A deployed process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    /// Process identifier.
    pub id: String,
    /// Free-form version label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Human readable title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Execution kind resolved at deploy time.
    pub kind: ExecutionKind,
    /// Listing visibility.
    #[serde(default)]
    pub visibility: Visibility,
    /// Execution marker, if the package had one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirement: Option<ExecutionRequirement>,
    /// Declared inputs.
    pub inputs: Vec<ParameterSpec>,
    /// Declared outputs.
    pub outputs: Vec<ParameterSpec>,
    /// The package document as deployed.
    pub package: Value,
    /// Deploying user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Deploy time.
    pub created: DateTime<Utc>,
}

impl Process {
    /// Build a process from a package document.
    ///
    /// The ID comes from `id`, or from the package's own `id` field when
    /// `id` is `None`.
    pub fn from_package(id: Option<&str>, document: Value) -> Result<Process> {
        let package = Package::parse(document)?;
        let id = id
            .map(str::to_string)
            .or_else(|| package.id.clone())
            .ok_or_else(|| CoreError::Validation {
                field: "id".to_string(),
                message: "process ID is required".to_string(),
            })?;
        validate_process_id(&id)?;

        let title = package
            .document
            .get("label")
            .or_else(|| package.document.get("title"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let version = package
            .document
            .get("version")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Process {
            id,
            version,
            title,
            kind: package.execution_kind(),
            visibility: Visibility::Public,
            requirement: package.requirement.clone(),
            inputs: package.inputs.clone(),
            outputs: package.outputs.clone(),
            package: package.document,
            owner: None,
            created: Utc::now(),
        })
    }

    /// Set the owner.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Set the visibility.
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Re-parse the stored package.
    pub fn definition(&self) -> Result<Package> {
        Package::parse(self.package.clone())
    }

    /// Validate submitted inputs against the declared inputs.
    pub fn validate_inputs(&self, inputs: &Map<String, Value>) -> Result<Map<String, Value>> {
        validate_inputs(&self.inputs, inputs)
    }

    /// Whether the process is visible in `scope`.
    pub fn is_visible_to(&self, scope: &AccessScope) -> bool {
        scope.permits(self.visibility, self.owner.as_deref())
    }
}

fn validate_process_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(CoreError::Validation {
            field: "id".to_string(),
            message: format!("invalid process ID '{}'", id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_package() -> Value {
        json!({
            "class": "CommandLineTool",
            "id": "#echo",
            "label": "Echo",
            "hints": {"BuiltinRequirement": {"process": "echo"}},
            "inputs": {"message": "string"},
            "outputs": {"output": "Any"}
        })
    }

    #[test]
    fn test_from_package_uses_document_id() {
        let process = Process::from_package(None, echo_package()).unwrap();
        assert_eq!(process.id, "echo");
        assert_eq!(process.title.as_deref(), Some("Echo"));
        assert_eq!(process.kind, ExecutionKind::Builtin);
        assert_eq!(process.visibility, Visibility::Public);
    }

    #[test]
    fn test_explicit_id_wins_and_is_validated() {
        let process = Process::from_package(Some("echo-v2"), echo_package()).unwrap();
        assert_eq!(process.id, "echo-v2");
        assert!(Process::from_package(Some("bad id!"), echo_package()).is_err());
    }

    #[test]
    fn test_access_scope() {
        let private = Process::from_package(None, echo_package())
            .unwrap()
            .with_visibility(Visibility::Private)
            .with_owner("alice");

        assert!(!private.is_visible_to(&AccessScope::Public));
        assert!(private.is_visible_to(&AccessScope::Owner("alice".to_string())));
        assert!(!private.is_visible_to(&AccessScope::Owner("bob".to_string())));
        assert!(private.is_visible_to(&AccessScope::Level(Visibility::Private)));
        assert!(private.is_visible_to(&AccessScope::Any));

        let public = private.with_visibility(Visibility::Public);
        assert!(public.is_visible_to(&AccessScope::Public));
    }
}
