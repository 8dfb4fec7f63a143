//! Config resolution: file path → ordered, named build configurations.
//!
//! A config file is JSON and may hold:
//!
//! - a single build object, resolved to one entry named `C0`;
//! - an array of build objects, named `C0`, `C1`, ... unless an object
//!   carries its own `"name"`;
//! - `{"builds": {"alpha": {..}, "beta": {..}}}`, named by key, in file
//!   order.
//!
//! The body of each build is opaque here; only the worker's compiler reads
//! it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// One unit of work, handed read-only to a single worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Display name.
    pub name: String,
    /// Compiler-specific settings.
    pub body: Map<String, Value>,
}

impl BuildConfig {
    pub fn new(name: impl Into<String>, body: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            body,
        }
    }
}

/// Build configurations in config order. The position of an entry is the
/// index of the worker that runs it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfigs {
    path: PathBuf,
    entries: Vec<BuildConfig>,
}

impl ResolvedConfigs {
    /// Path the configs were resolved from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get the config a given worker index runs.
    pub fn get(&self, index: usize) -> Result<&BuildConfig, CoreError> {
        self.entries.get(index).ok_or(CoreError::ConfigIndex {
            index,
            available: self.entries.len(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &BuildConfig> {
        self.entries.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Read and resolve a config file.
pub fn resolve_config(path: &Path) -> Result<ResolvedConfigs, CoreError> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| CoreError::resolution(path, format!("cannot read file: {e}")))?;
    parse_config(path, &source)
}

/// Resolve config source text. `path` is only used for error reporting.
pub fn parse_config(path: &Path, source: &str) -> Result<ResolvedConfigs, CoreError> {
    let document: Value = serde_json::from_str(source)
        .map_err(|e| CoreError::resolution(path, format!("invalid JSON: {e}")))?;

    let entries = match document {
        Value::Object(map) => match take_named_builds(map) {
            Ok(builds) => builds
                .into_iter()
                .map(|(name, body)| build_body(path, &name, body).map(|b| BuildConfig::new(name, b)))
                .collect::<Result<Vec<_>, _>>()?,
            Err(single) => vec![unnamed_build(path, 0, Value::Object(single))?],
        },
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| unnamed_build(path, index, item))
            .collect::<Result<Vec<_>, _>>()?,
        other => {
            return Err(CoreError::resolution(
                path,
                format!(
                    "expected a build object or an array of build objects, found {}",
                    json_kind(&other)
                ),
            ))
        }
    };

    if entries.is_empty() {
        return Err(CoreError::resolution(path, "no build configurations defined"));
    }

    Ok(ResolvedConfigs {
        path: path.to_path_buf(),
        entries,
    })
}

/// Split off the `{"builds": {..}}` form; anything else is a single build.
fn take_named_builds(mut map: Map<String, Value>) -> Result<Map<String, Value>, Map<String, Value>> {
    if map.len() != 1 {
        return Err(map);
    }
    match map.remove("builds") {
        Some(Value::Object(builds)) => Ok(builds),
        Some(other) => {
            map.insert("builds".to_string(), other);
            Err(map)
        }
        None => Err(map),
    }
}

fn unnamed_build(path: &Path, index: usize, value: Value) -> Result<BuildConfig, CoreError> {
    let mut body = build_body(path, &format!("C{index}"), value)?;
    let name = match body.remove("name") {
        Some(Value::String(name)) => name,
        Some(other) => {
            return Err(CoreError::resolution(
                path,
                format!("build {index}: \"name\" must be a string, found {}", json_kind(&other)),
            ))
        }
        None => format!("C{index}"),
    };
    Ok(BuildConfig::new(name, body))
}

fn build_body(path: &Path, label: &str, value: Value) -> Result<Map<String, Value>, CoreError> {
    match value {
        Value::Object(body) => Ok(body),
        other => Err(CoreError::resolution(
            path,
            format!("build {label} must be an object, found {}", json_kind(&other)),
        )),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
