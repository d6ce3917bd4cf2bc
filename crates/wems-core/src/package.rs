// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Application package parsing.
//!
//! A package is a CWL-style document (`class: CommandLineTool` or
//! `class: Workflow`). Its `requirements` and `hints` may carry at most one
//! execution-requirement marker, which decides the execution kind:
//!
//! | Marker class | Execution kind | Fields |
//! |---|---|---|
//! | `BuiltinRequirement` | builtin | `process` (function name) |
//! | `DockerRequirement` | containerized | `dockerPull` |
//! | `WPS1Requirement` | remote-v1 | `provider`, `process` |
//! | `OGCAPIRequirement` | remote-ogc | `provider`, `process` |
//! | `ESGF-CWTRequirement` | remote-esgf | `provider`, `process`, `api_key` |
//!
//! Marker classes may be namespaced (`wems:BuiltinRequirement`). A command
//! line tool with no marker runs its command line locally.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, Result};

/// Execution strategy a process resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionKind {
    /// In-process pure function.
    Builtin,
    /// Local command line, optionally inside a container image.
    Containerized,
    /// Remote WPS 1.0 style service.
    RemoteV1,
    /// Remote OGC API - Processes service.
    RemoteOgc,
    /// Remote ESGF compute service.
    RemoteEsgf,
    /// Composite workflow of deployed processes.
    Workflow,
}

impl ExecutionKind {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Builtin => "builtin",
            Self::Containerized => "containerized",
            Self::RemoteV1 => "remote-v1",
            Self::RemoteOgc => "remote-ogc",
            Self::RemoteEsgf => "remote-esgf",
            Self::Workflow => "workflow",
        }
    }

    /// Whether the kind delegates to a remote service.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::RemoteV1 | Self::RemoteOgc | Self::RemoteEsgf)
    }
}

impl fmt::Display for ExecutionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote endpoint and process reference carried by a remote marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTarget {
    /// Endpoint URL, or the ID of a registered service.
    pub provider: String,
    /// Process identifier on the remote service.
    pub process: String,
}

impl RemoteTarget {
    /// The provider as a URL, when it is one.
    pub fn provider_url(&self) -> Option<&str> {
        let p = self.provider.as_str();
        (p.starts_with("http://") || p.starts_with("https://")).then_some(p)
    }

    /// The provider as a registered service ID, when it is not a URL.
    pub fn service_id(&self) -> Option<&str> {
        match self.provider_url() {
            Some(_) => None,
            None => Some(self.provider.as_str()),
        }
    }
}

/// An execution-requirement marker found on a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ExecutionRequirement {
    /// Builtin function reference.
    Builtin {
        /// Registered function name.
        function: String,
    },
    /// Container image reference.
    Container {
        /// Image to run the command line in.
        image: String,
    },
    /// WPS 1.0 style remote process.
    RemoteV1(RemoteTarget),
    /// OGC API - Processes remote process.
    RemoteOgc(RemoteTarget),
    /// ESGF compute remote process.
    RemoteEsgf {
        /// Endpoint and process.
        target: RemoteTarget,
        /// API key sent with every request.
        api_key: Option<String>,
    },
}

impl ExecutionRequirement {
    /// The execution kind this marker selects.
    pub fn kind(&self) -> ExecutionKind {
        match self {
            Self::Builtin { .. } => ExecutionKind::Builtin,
            Self::Container { .. } => ExecutionKind::Containerized,
            Self::RemoteV1(_) => ExecutionKind::RemoteV1,
            Self::RemoteOgc(_) => ExecutionKind::RemoteOgc,
            Self::RemoteEsgf { .. } => ExecutionKind::RemoteEsgf,
        }
    }

    /// Remote target, for remote markers.
    pub fn remote_target(&self) -> Option<&RemoteTarget> {
        match self {
            Self::RemoteV1(target) | Self::RemoteOgc(target) => Some(target),
            Self::RemoteEsgf { target, .. } => Some(target),
            _ => None,
        }
    }
}

/// Marker class names, without namespace prefix.
const BUILTIN_MARKER: &str = "BuiltinRequirement";
const DOCKER_MARKER: &str = "DockerRequirement";
const WPS1_MARKER: &str = "WPS1Requirement";
const OGC_MARKER: &str = "OGCAPIRequirement";
const ESGF_MARKER: &str = "ESGF-CWTRequirement";

/// Top-level class of a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackageClass {
    /// Single tool.
    CommandLineTool,
    /// Composite workflow.
    Workflow,
}

/// Declared parameter type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    /// Text.
    String,
    /// Integer.
    Int,
    /// Floating point number.
    Float,
    /// Boolean flag.
    Boolean,
    /// File reference.
    File,
    /// Standard output of the command line (outputs only).
    Stdout,
    /// Any JSON value.
    Any,
    /// Array of the inner type.
    Array(Box<ParameterType>),
}

impl ParameterType {
    fn parse(raw: &Value, locator: &str) -> Result<(ParameterType, bool)> {
        match raw {
            Value::String(s) => {
                let (name, optional) = match s.strip_suffix('?') {
                    Some(name) => (name, true),
                    None => (s.as_str(), false),
                };
                if let Some(inner) = name.strip_suffix("[]") {
                    let (inner, _) = Self::parse(&Value::String(inner.to_string()), locator)?;
                    return Ok((ParameterType::Array(Box::new(inner)), optional));
                }
                let parsed = match name {
                    "string" => ParameterType::String,
                    "int" | "long" => ParameterType::Int,
                    "float" | "double" => ParameterType::Float,
                    "boolean" => ParameterType::Boolean,
                    "File" => ParameterType::File,
                    "stdout" => ParameterType::Stdout,
                    "Any" => ParameterType::Any,
                    other => {
                        return Err(CoreError::package(
                            format!("unsupported parameter type '{}'", other),
                            Some(locator),
                        ));
                    }
                };
                Ok((parsed, optional))
            }
            Value::Array(variants) => {
                let optional = variants.iter().any(|v| v == "null");
                let concrete: Vec<_> = variants.iter().filter(|v| *v != "null").collect();
                match concrete.as_slice() {
                    [single] => {
                        let (parsed, inner_optional) = Self::parse(single, locator)?;
                        Ok((parsed, optional || inner_optional))
                    }
                    _ => Ok((ParameterType::Any, optional)),
                }
            }
            Value::Object(obj) if obj.get("type").and_then(Value::as_str) == Some("array") => {
                let items = obj.get("items").ok_or_else(|| {
                    CoreError::package("array type without 'items'", Some(locator))
                })?;
                let (inner, _) = Self::parse(items, locator)?;
                Ok((ParameterType::Array(Box::new(inner)), false))
            }
            _ => Err(CoreError::package("invalid parameter type", Some(locator))),
        }
    }

    /// Whether `value` conforms to this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Int => value.is_i64() || value.is_u64(),
            Self::Float => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::File => file_reference(value).is_some(),
            Self::Stdout => false,
            Self::Any => true,
            Self::Array(inner) => value
                .as_array()
                .is_some_and(|items| items.iter().all(|item| inner.accepts(item))),
        }
    }
}

/// Extract the location of a file value.
///
/// Accepts a bare string or an object carrying `href`, `location` or `path`.
pub fn file_reference(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Object(obj) => ["href", "location", "path"]
            .into_iter()
            .find_map(|key| obj.get(key).and_then(Value::as_str)),
        _ => None,
    }
}

/// How an input is placed on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputBinding {
    /// Sort key among bound inputs.
    pub position: i32,
    /// Flag emitted before the value.
    pub prefix: Option<String>,
}

/// Declared input or output parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Parameter identifier.
    pub id: String,
    /// Declared type.
    pub param_type: ParameterType,
    /// Whether the parameter may be omitted.
    pub optional: bool,
    /// Default value for omitted inputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Command line binding (inputs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding: Option<InputBinding>,
    /// Output glob (outputs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glob: Option<String>,
    /// `step/output` source (workflow outputs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_source: Option<String>,
}

/// Command line of a locally executed tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLine {
    /// Program and leading fixed arguments.
    pub base_command: Vec<String>,
    /// Fixed arguments after the base command.
    pub arguments: Vec<String>,
    /// File name capturing standard output.
    pub stdout: Option<String>,
}

impl CommandLine {
    /// Whether there is anything to run.
    pub fn is_empty(&self) -> bool {
        self.base_command.is_empty() && self.arguments.is_empty()
    }
}

/// One step of a workflow package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Step identifier.
    pub id: String,
    /// Deployed process the step runs.
    pub run: String,
    /// Step input ID to source (`workflowInput` or `step/output`).
    pub inputs: BTreeMap<String, String>,
    /// Output IDs produced by the step.
    pub outputs: Vec<String>,
}

/// Parsed package document.
#[derive(Debug, Clone)]
pub struct Package {
    /// Top-level class.
    pub class: PackageClass,
    /// Identifier declared in the document, if any.
    pub id: Option<String>,
    /// The execution marker, if any.
    pub requirement: Option<ExecutionRequirement>,
    /// Declared inputs.
    pub inputs: Vec<ParameterSpec>,
    /// Declared outputs.
    pub outputs: Vec<ParameterSpec>,
    /// Command line for local tools.
    pub command: CommandLine,
    /// Steps for workflows.
    pub steps: Vec<WorkflowStep>,
    /// The original document.
    pub document: Value,
}

impl Package {
    /// Parse and validate a package document.
    ///
    /// Fails with [`CoreError::PackageRegistration`] when more than one
    /// execution marker is present, when a marker is malformed, or when a
    /// tool has neither a marker nor a command line.
    pub fn parse(document: Value) -> Result<Package> {
        let obj = document
            .as_object()
            .ok_or_else(|| CoreError::package("package must be an object", None))?;

        let class = match obj.get("class").and_then(Value::as_str) {
            Some("CommandLineTool") | Some("ExpressionTool") => PackageClass::CommandLineTool,
            Some("Workflow") => PackageClass::Workflow,
            Some(other) => {
                return Err(CoreError::package(
                    format!("unsupported package class '{}'", other),
                    Some("class"),
                ));
            }
            None => return Err(CoreError::package("missing package class", Some("class"))),
        };

        let id = obj
            .get("id")
            .and_then(Value::as_str)
            .map(|s| s.trim_start_matches('#').to_string())
            .filter(|s| !s.is_empty());

        let mut markers = Vec::new();
        for section in ["requirements", "hints"] {
            if let Some(entries) = obj.get(section) {
                collect_markers(entries, section, &mut markers)?;
            }
        }
        if markers.len() > 1 {
            let names: Vec<_> = markers.iter().map(|(name, _)| name.as_str()).collect();
            return Err(CoreError::package(
                format!(
                    "execution requirements are mutually exclusive, found: {}",
                    names.join(", ")
                ),
                Some("requirements"),
            ));
        }
        let requirement = markers.pop().map(|(_, requirement)| requirement);

        let inputs = parse_parameters(obj.get("inputs"), "inputs")?;
        let outputs = parse_parameters(obj.get("outputs"), "outputs")?;

        let command = CommandLine {
            base_command: string_list(obj.get("baseCommand"), "baseCommand")?,
            arguments: string_list(obj.get("arguments"), "arguments")?,
            stdout: obj.get("stdout").and_then(Value::as_str).map(str::to_string),
        };

        let steps = match class {
            PackageClass::Workflow => parse_steps(obj.get("steps"))?,
            PackageClass::CommandLineTool => Vec::new(),
        };

        match class {
            PackageClass::Workflow if requirement.is_some() => {
                return Err(CoreError::package(
                    "workflow packages cannot carry an execution requirement",
                    Some("requirements"),
                ));
            }
            PackageClass::Workflow if steps.is_empty() => {
                return Err(CoreError::package("workflow has no steps", Some("steps")));
            }
            PackageClass::CommandLineTool if requirement.is_none() && command.is_empty() => {
                return Err(CoreError::package(
                    "package has no execution requirement and no command line",
                    Some("baseCommand"),
                ));
            }
            _ => {}
        }

        if matches!(requirement, Some(ExecutionRequirement::Container { .. })) && command.is_empty()
        {
            return Err(CoreError::package(
                "container requirement without a command line",
                Some("baseCommand"),
            ));
        }

        Ok(Package {
            class,
            id,
            requirement,
            inputs,
            outputs,
            command,
            steps,
            document,
        })
    }

    /// Execution kind selected by this package. Pure function of the marker.
    pub fn execution_kind(&self) -> ExecutionKind {
        match (self.class, &self.requirement) {
            (PackageClass::Workflow, _) => ExecutionKind::Workflow,
            (PackageClass::CommandLineTool, Some(requirement)) => requirement.kind(),
            (PackageClass::CommandLineTool, None) => ExecutionKind::Containerized,
        }
    }

    /// Container image, for containerized packages that declare one.
    pub fn container_image(&self) -> Option<&str> {
        match &self.requirement {
            Some(ExecutionRequirement::Container { image }) => Some(image),
            _ => None,
        }
    }

    /// Copy of the document without any execution marker, for deploying
    /// the package on a remote service.
    pub fn without_markers(&self) -> Value {
        let mut document = self.document.clone();
        if let Some(obj) = document.as_object_mut() {
            for section in ["requirements", "hints"] {
                match obj.get_mut(section) {
                    Some(Value::Object(map)) => {
                        map.retain(|name, _| marker_name(name).is_none());
                    }
                    Some(Value::Array(list)) => {
                        list.retain(|entry| {
                            entry
                                .get("class")
                                .and_then(Value::as_str)
                                .is_none_or(|name| marker_name(name).is_none())
                        });
                    }
                    _ => {}
                }
            }
        }
        document
    }
}

fn marker_name(class: &str) -> Option<&'static str> {
    let bare = class.rsplit(':').next().unwrap_or(class);
    [
        BUILTIN_MARKER,
        DOCKER_MARKER,
        WPS1_MARKER,
        OGC_MARKER,
        ESGF_MARKER,
    ]
    .into_iter()
    .find(|name| *name == bare)
}

fn collect_markers(
    entries: &Value,
    section: &str,
    markers: &mut Vec<(String, ExecutionRequirement)>,
) -> Result<()> {
    let pairs: Vec<(String, &Value)> = match entries {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        Value::Array(list) => list
            .iter()
            .filter_map(|entry| {
                entry
                    .get("class")
                    .and_then(Value::as_str)
                    .map(|class| (class.to_string(), entry))
            })
            .collect(),
        _ => {
            return Err(CoreError::package(
                format!("'{}' must be a map or a list", section),
                Some(section),
            ));
        }
    };

    for (class, body) in pairs {
        let Some(name) = marker_name(&class) else {
            continue;
        };
        let locator = format!("{}.{}", section, name);
        let requirement = parse_marker(name, body, &locator)?;
        markers.push((name.to_string(), requirement));
    }
    Ok(())
}

fn required_field(body: &Value, field: &str, locator: &str) -> Result<String> {
    body.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            CoreError::package(
                format!("missing '{}'", field),
                Some(&format!("{}.{}", locator, field)),
            )
        })
}

fn parse_marker(name: &str, body: &Value, locator: &str) -> Result<ExecutionRequirement> {
    let remote = |body: &Value| -> Result<RemoteTarget> {
        Ok(RemoteTarget {
            provider: required_field(body, "provider", locator)?,
            process: required_field(body, "process", locator)?,
        })
    };

    match name {
        BUILTIN_MARKER => {
            let function = required_field(body, "process", locator)
                .or_else(|_| required_field(body, "function", locator))?;
            Ok(ExecutionRequirement::Builtin { function })
        }
        DOCKER_MARKER => Ok(ExecutionRequirement::Container {
            image: required_field(body, "dockerPull", locator)?,
        }),
        WPS1_MARKER => Ok(ExecutionRequirement::RemoteV1(remote(body)?)),
        OGC_MARKER => Ok(ExecutionRequirement::RemoteOgc(remote(body)?)),
        ESGF_MARKER => Ok(ExecutionRequirement::RemoteEsgf {
            target: remote(body)?,
            api_key: body
                .get("api_key")
                .and_then(Value::as_str)
                .map(str::to_string),
        }),
        other => Err(CoreError::package(
            format!("unknown marker '{}'", other),
            Some(locator),
        )),
    }
}

fn string_list(raw: Option<&Value>, locator: &str) -> Result<Vec<String>> {
    match raw {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(vec![s.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                Value::Number(n) => Ok(n.to_string()),
                _ => Err(CoreError::package(
                    "expected a list of strings",
                    Some(locator),
                )),
            })
            .collect(),
        Some(_) => Err(CoreError::package("expected a string or a list", Some(locator))),
    }
}

/// Normalise the map and list forms of a CWL field into `(id, body)` pairs.
fn id_entries<'a>(raw: &'a Value, locator: &str) -> Result<Vec<(String, &'a Value)>> {
    match raw {
        Value::Object(map) => Ok(map.iter().map(|(k, v)| (k.clone(), v)).collect()),
        Value::Array(list) => list
            .iter()
            .map(|entry| {
                entry
                    .get("id")
                    .and_then(Value::as_str)
                    .map(|id| (id.trim_start_matches('#').to_string(), entry))
                    .ok_or_else(|| CoreError::package("entry without 'id'", Some(locator)))
            })
            .collect(),
        _ => Err(CoreError::package("expected a map or a list", Some(locator))),
    }
}

fn parse_parameters(raw: Option<&Value>, section: &str) -> Result<Vec<ParameterSpec>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };

    let mut specs = Vec::new();
    for (id, body) in id_entries(raw, section)? {
        let locator = format!("{}.{}", section, id);
        let (type_value, body_obj) = match body {
            Value::Object(obj) => (
                obj.get("type")
                    .cloned()
                    .ok_or_else(|| CoreError::package("missing 'type'", Some(&locator)))?,
                Some(obj),
            ),
            // shorthand `id: type`
            other => (other.clone(), None),
        };
        let (param_type, optional) = ParameterType::parse(&type_value, &locator)?;

        let field = |name: &str| body_obj.and_then(|obj| obj.get(name));
        let binding = field("inputBinding").map(|b| InputBinding {
            position: b.get("position").and_then(Value::as_i64).unwrap_or(0) as i32,
            prefix: b.get("prefix").and_then(Value::as_str).map(str::to_string),
        });
        let glob = field("outputBinding")
            .and_then(|b| b.get("glob"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let output_source = field("outputSource")
            .and_then(Value::as_str)
            .map(|s| s.trim_start_matches('#').to_string());

        specs.push(ParameterSpec {
            id,
            param_type,
            optional,
            default: field("default").cloned(),
            binding,
            glob,
            output_source,
        });
    }
    Ok(specs)
}

fn parse_steps(raw: Option<&Value>) -> Result<Vec<WorkflowStep>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };

    let mut steps = Vec::new();
    for (id, body) in id_entries(raw, "steps")? {
        let locator = format!("steps.{}", id);
        let run = required_field(body, "run", &locator)?;
        let run = run
            .trim_start_matches('#')
            .trim_end_matches(".cwl")
            .to_string();

        let mut inputs = BTreeMap::new();
        if let Some(raw_in) = body.get("in") {
            for (input_id, source) in id_entries(raw_in, &format!("{}.in", locator))? {
                let source = match source {
                    Value::String(s) => s.clone(),
                    Value::Object(obj) => obj
                        .get("source")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .ok_or_else(|| {
                            CoreError::package(
                                "step input without 'source'",
                                Some(&format!("{}.in.{}", locator, input_id)),
                            )
                        })?,
                    _ => {
                        return Err(CoreError::package(
                            "invalid step input",
                            Some(&format!("{}.in.{}", locator, input_id)),
                        ));
                    }
                };
                inputs.insert(input_id, source.trim_start_matches('#').to_string());
            }
        }

        let outputs = match body.get("out") {
            None => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    Value::Object(obj) => obj
                        .get("id")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .ok_or_else(|| CoreError::package("output without 'id'", Some(&locator))),
                    _ => Err(CoreError::package("invalid step output", Some(&locator))),
                })
                .collect::<Result<Vec<_>>>()?,
            Some(_) => return Err(CoreError::package("'out' must be a list", Some(&locator))),
        };

        steps.push(WorkflowStep {
            id,
            run,
            inputs,
            outputs,
        });
    }
    Ok(steps)
}

/// Validate submitted inputs against declared parameters.
///
/// Applies defaults, rejects unknown and missing inputs, and checks types.
pub fn validate_inputs(
    specs: &[ParameterSpec],
    inputs: &Map<String, Value>,
) -> Result<Map<String, Value>> {
    for key in inputs.keys() {
        if !specs.iter().any(|spec| &spec.id == key) {
            return Err(CoreError::input(key, "unknown input"));
        }
    }

    let mut resolved = Map::new();
    for spec in specs {
        let value = inputs
            .get(&spec.id)
            .filter(|v| !v.is_null())
            .or(spec.default.as_ref());
        match value {
            Some(value) => {
                if !spec.param_type.accepts(value) {
                    return Err(CoreError::input(
                        &spec.id,
                        format!("expected a value of type {:?}", spec.param_type),
                    ));
                }
                resolved.insert(spec.id.clone(), value.clone());
            }
            None if spec.optional => {}
            None => return Err(CoreError::input(&spec.id, "missing required input")),
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(hints: Value) -> Value {
        json!({
            "cwlVersion": "v1.2",
            "class": "CommandLineTool",
            "hints": hints,
            "inputs": {"message": "string"},
            "outputs": {"output": {"type": "File", "outputBinding": {"glob": "out.txt"}}}
        })
    }

    #[test]
    fn test_builtin_marker() {
        let package = Package::parse(tool(json!({
            "BuiltinRequirement": {"process": "echo"}
        })))
        .unwrap();
        assert_eq!(package.execution_kind(), ExecutionKind::Builtin);
        assert_eq!(
            package.requirement,
            Some(ExecutionRequirement::Builtin {
                function: "echo".to_string()
            })
        );
    }

    #[test]
    fn test_namespaced_remote_marker_in_list_form() {
        let package = Package::parse(tool(json!([
            {"class": "wems:WPS1Requirement", "provider": "http://remote/wps", "process": "sum"}
        ])))
        .unwrap();
        assert_eq!(package.execution_kind(), ExecutionKind::RemoteV1);
        let target = package.requirement.as_ref().unwrap().remote_target().unwrap();
        assert_eq!(target.provider_url(), Some("http://remote/wps"));
        assert_eq!(target.process, "sum");
    }

    #[test]
    fn test_two_markers_rejected() {
        let err = Package::parse(tool(json!({
            "BuiltinRequirement": {"process": "echo"},
            "WPS1Requirement": {"provider": "http://remote/wps", "process": "sum"}
        })))
        .unwrap_err();
        assert_eq!(err.error_code(), "PACKAGE_REGISTRATION_ERROR");
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn test_markers_across_requirements_and_hints_counted_together() {
        let mut doc = tool(json!({"DockerRequirement": {"dockerPull": "alpine"}}));
        doc["baseCommand"] = json!("cat");
        doc["requirements"] = json!({"OGCAPIRequirement": {"provider": "http://x", "process": "p"}});
        assert!(Package::parse(doc).is_err());
    }

    #[test]
    fn test_no_marker_defaults_to_containerized() {
        let mut doc = tool(json!({}));
        doc["baseCommand"] = json!(["printf"]);
        let package = Package::parse(doc).unwrap();
        assert_eq!(package.execution_kind(), ExecutionKind::Containerized);
        assert_eq!(package.container_image(), None);
    }

    #[test]
    fn test_no_marker_no_command_rejected() {
        assert!(Package::parse(tool(json!({}))).is_err());
    }

    #[test]
    fn test_malformed_marker_rejected() {
        let err = Package::parse(tool(json!({"WPS1Requirement": {"process": "sum"}}))).unwrap_err();
        match err {
            CoreError::PackageRegistration { locator, .. } => {
                assert_eq!(locator.as_deref(), Some("hints.WPS1Requirement.provider"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_selection_is_deterministic() {
        let doc = tool(json!({"ESGF-CWTRequirement": {"provider": "https://esgf", "process": "subset"}}));
        let kinds: Vec<_> = (0..5)
            .map(|_| Package::parse(doc.clone()).unwrap().execution_kind())
            .collect();
        assert!(kinds.iter().all(|k| *k == ExecutionKind::RemoteEsgf));
    }

    #[test]
    fn test_parameter_types() {
        let doc = json!({
            "class": "CommandLineTool",
            "baseCommand": "true",
            "inputs": [
                {"id": "a", "type": "string?"},
                {"id": "b", "type": ["null", "int"]},
                {"id": "c", "type": {"type": "array", "items": "File"}},
                {"id": "d", "type": "float[]", "inputBinding": {"position": 2, "prefix": "-d"}}
            ],
            "outputs": {"o": {"type": "stdout"}}
        });
        let package = Package::parse(doc).unwrap();
        assert_eq!(package.inputs[0].param_type, ParameterType::String);
        assert!(package.inputs[0].optional);
        assert_eq!(package.inputs[1].param_type, ParameterType::Int);
        assert!(package.inputs[1].optional);
        assert_eq!(
            package.inputs[2].param_type,
            ParameterType::Array(Box::new(ParameterType::File))
        );
        assert_eq!(
            package.inputs[3].binding,
            Some(InputBinding {
                position: 2,
                prefix: Some("-d".to_string())
            })
        );
        assert_eq!(package.outputs[0].param_type, ParameterType::Stdout);
    }

    #[test]
    fn test_workflow_steps() {
        let doc = json!({
            "class": "Workflow",
            "inputs": {"message": "string"},
            "outputs": {"result": {"type": "File", "outputSource": "second/output"}},
            "steps": {
                "first": {"run": "echo.cwl", "in": {"message": "message"}, "out": ["output"]},
                "second": {"run": "#file2string_array", "in": {"input": {"source": "first/output"}}, "out": [{"id": "output"}]}
            }
        });
        let package = Package::parse(doc).unwrap();
        assert_eq!(package.execution_kind(), ExecutionKind::Workflow);
        assert_eq!(package.steps.len(), 2);
        assert_eq!(package.steps[0].run, "echo");
        assert_eq!(package.steps[1].run, "file2string_array");
        assert_eq!(package.steps[1].inputs["input"], "first/output");
        assert_eq!(package.outputs[0].output_source.as_deref(), Some("second/output"));
    }

    #[test]
    fn test_without_markers() {
        let package = Package::parse(tool(json!({
            "OGCAPIRequirement": {"provider": "http://x", "process": "p"},
            "InlineJavascriptRequirement": {}
        })))
        .unwrap();
        let stripped = package.without_markers();
        assert!(stripped["hints"].get("OGCAPIRequirement").is_none());
        assert!(stripped["hints"].get("InlineJavascriptRequirement").is_some());
    }

    #[test]
    fn test_validate_inputs() {
        let specs = Package::parse(json!({
            "class": "CommandLineTool",
            "baseCommand": "true",
            "inputs": {
                "message": "string",
                "count": {"type": "int", "default": 3},
                "extra": "File?"
            },
            "outputs": {}
        }))
        .unwrap()
        .inputs;

        let resolved = validate_inputs(
            &specs,
            json!({"message": "hello"}).as_object().unwrap(),
        )
        .unwrap();
        assert_eq!(resolved["message"], "hello");
        assert_eq!(resolved["count"], 3);
        assert!(!resolved.contains_key("extra"));

        let missing = validate_inputs(&specs, &Map::new()).unwrap_err();
        assert!(matches!(missing, CoreError::InvalidInput { ref input_id, .. } if input_id == "message"));

        let wrong = validate_inputs(
            &specs,
            json!({"message": "x", "count": "three"}).as_object().unwrap(),
        )
        .unwrap_err();
        assert!(matches!(wrong, CoreError::InvalidInput { ref input_id, .. } if input_id == "count"));

        let unknown = validate_inputs(
            &specs,
            json!({"message": "x", "nope": 1}).as_object().unwrap(),
        )
        .unwrap_err();
        assert!(matches!(unknown, CoreError::InvalidInput { ref input_id, .. } if input_id == "nope"));

        let file = validate_inputs(
            &specs,
            json!({"message": "x", "extra": {"href": "/tmp/a.txt"}}).as_object().unwrap(),
        )
        .unwrap();
        assert_eq!(file_reference(&file["extra"]), Some("/tmp/a.txt"));
    }
}
