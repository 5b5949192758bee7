//! Configuration fragments
//!
//! A fragment is a tree of values addressed by key paths. Path segments are
//! taken literally, so keys that contain dots (`grafana.ini`,
//! `auth.anonymous`) need no escaping.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Result, RolloutError};

static UNRESOLVED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"__[A-Z][A-Z0-9_]*?__").expect("placeholder regex is valid"));

/// Key/value settings for one component
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ConfigFragment {
    root: Map<String, Value>,
}

impl ConfigFragment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `value` at `path`, creating intermediate tables and merging into
    /// existing ones. An empty path merges an object value into the root.
    pub fn set(&mut self, path: &[&str], value: impl Into<Value>) -> &mut Self {
        let mut value = value.into();
        for segment in path.iter().rev() {
            let mut table = Map::new();
            table.insert((*segment).to_string(), value);
            value = Value::Object(table);
        }
        match value {
            Value::Object(table) => deep_merge(&mut self.root, table),
            other => tracing::debug!(value = %other, "ignoring non-table value at fragment root"),
        }
        self
    }

    /// Builder form of [`ConfigFragment::set`]
    pub fn with(mut self, path: &[&str], value: impl Into<Value>) -> Self {
        self.set(path, value);
        self
    }

    pub fn get(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        rest.iter()
            .try_fold(self.root.get(*first)?, |value, segment| value.get(*segment))
    }

    /// Deep merge; values from `other` win on conflict
    pub fn merge(&mut self, other: ConfigFragment) -> &mut Self {
        deep_merge(&mut self.root, other.root);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Render as a Helm values document
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(&self.root)
            .map_err(|e| RolloutError::Configuration(format!("failed to render values: {e}")))
    }
}

impl From<ConfigFragment> for Value {
    fn from(fragment: ConfigFragment) -> Self {
        Value::Object(fragment.root)
    }
}

fn deep_merge(base: &mut Map<String, Value>, other: Map<String, Value>) {
    for (key, value) in other {
        match (base.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming)
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Replace `__NAME__` placeholders in a manifest template.
///
/// Placeholders are given by bare name (`NAMESPACE` for `__NAMESPACE__`).
/// Any placeholder left in the output is an error.
pub fn render_template(template: &str, placeholders: &[(&str, &str)]) -> Result<String> {
    let rendered = placeholders
        .iter()
        .fold(template.to_string(), |acc, (name, value)| {
            acc.replace(&format!("__{name}__"), value)
        });

    let unresolved: Vec<&str> = UNRESOLVED
        .find_iter(&rendered)
        .map(|m| m.as_str())
        .collect();
    if !unresolved.is_empty() {
        return Err(RolloutError::Configuration(format!(
            "unresolved template placeholders: {}",
            unresolved.join(", ")
        )));
    }
    Ok(rendered)
}
