//! Parameter schemas and submission-time validation.
//!
//! Each registry entry declares the parameters its handler accepts. Raw
//! submissions arrive as loose JSON objects; [`validate_params`] checks them
//! against the declared schema and reports every violation at once rather
//! than stopping at the first.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SchedulerError, SchedulerResult};

/// The shape a single parameter must take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    StringList,
}

impl ParamKind {
    fn describe(&self) -> &'static str {
        match self {
            Self::String => "a string",
            Self::StringList => "a list of strings",
        }
    }
}

/// Declaration of one parameter a job type accepts. All declared parameters
/// are required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub display_name: String,
    pub kind: ParamKind,
}

impl ParamSpec {
    pub fn string(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            kind: ParamKind::String,
        }
    }

    pub fn string_list(name: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            kind: ParamKind::StringList,
        }
    }
}

/// A validated parameter value, typed per its [`ParamKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    String(String),
    StringList(Vec<String>),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            Self::StringList(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::StringList(values) => Some(values),
            Self::String(_) => None,
        }
    }
}

/// Validated parameter bag handed to handlers and persisted with the job.
pub type JobParams = HashMap<String, ParamValue>;

/// Validate a raw JSON object against the declared parameter specs.
///
/// Collects every violation: missing required parameters, wrong-typed values
/// (including per-element checks inside lists), and unexpected keys.
pub fn validate_params(
    specs: &[ParamSpec],
    raw: &serde_json::Map<String, Value>,
) -> SchedulerResult<JobParams> {
    let mut violations = Vec::new();
    let mut validated = JobParams::new();

    for spec in specs {
        let Some(value) = raw.get(&spec.name) else {
            violations.push(format!("missing required parameter `{}`", spec.name));
            continue;
        };
        match (spec.kind, value) {
            (ParamKind::String, Value::String(s)) => {
                validated.insert(spec.name.clone(), ParamValue::String(s.clone()));
            }
            (ParamKind::StringList, Value::Array(items)) => {
                let mut list = Vec::with_capacity(items.len());
                let mut ok = true;
                for (index, item) in items.iter().enumerate() {
                    match item {
                        Value::String(s) => list.push(s.clone()),
                        other => {
                            ok = false;
                            violations.push(format!(
                                "parameter `{}` element {index} must be a string, got {}",
                                spec.name,
                                json_type_name(other)
                            ));
                        }
                    }
                }
                if ok {
                    validated.insert(spec.name.clone(), ParamValue::StringList(list));
                }
            }
            (kind, other) => {
                violations.push(format!(
                    "parameter `{}` must be {}, got {}",
                    spec.name,
                    kind.describe(),
                    json_type_name(other)
                ));
            }
        }
    }

    let mut unexpected: Vec<&String> = raw
        .keys()
        .filter(|key| specs.iter().all(|spec| spec.name != **key))
        .collect();
    unexpected.sort();
    for key in unexpected {
        violations.push(format!("unexpected parameter `{key}`"));
    }

    if violations.is_empty() {
        Ok(validated)
    } else {
        Err(SchedulerError::InvalidParameters { violations })
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
