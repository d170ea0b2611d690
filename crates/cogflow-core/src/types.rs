use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Caller-supplied external inputs for one run.
///
/// Built once from the triggering input and immutable for the lifetime of
/// the run. Keys are strings; values are JSON for maximum flexibility.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunContext {
    data: HashMap<String, Value>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a RunContext from initial data.
    pub fn from_map(data: HashMap<String, Value>) -> Self {
        Self { data }
    }

    /// Create a RunContext from an arbitrary external input.
    ///
    /// Object inputs become the context map directly; any other value is
    /// stored under the `input` key.
    pub fn from_value(input: Value) -> Self {
        match input {
            Value::Object(map) => Self {
                data: map.into_iter().collect(),
            },
            other => {
                let mut data = HashMap::new();
                data.insert("input".to_string(), other);
                Self { data }
            }
        }
    }

    /// Get a value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Get a value as a string, if it's a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    /// Get the underlying data map.
    pub fn data(&self) -> &HashMap<String, Value> {
        &self.data
    }
}

/// Per-run mapping from node id to that node's recorded output.
///
/// Owned exclusively by the run coordinator for the duration of one run.
/// Revisits to a looped node overwrite the entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunState {
    outputs: HashMap<String, Value>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a node's output, overwriting any previous visit's entry.
    pub fn record(&mut self, node_id: impl Into<String>, output: Value) {
        self.outputs.insert(node_id.into(), output);
    }

    /// Get a node's recorded output.
    pub fn output(&self, node_id: &str) -> Option<&Value> {
        self.outputs.get(node_id)
    }

    /// Walk a dot-separated path through the run state.
    ///
    /// The first segment names a node; remaining segments descend into that
    /// node's output object. A missing segment yields `None` rather than an
    /// error.
    pub fn resolve_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.outputs.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Get the underlying output map.
    pub fn data(&self) -> &HashMap<String, Value> {
        &self.outputs
    }
}

/// Read-only memory view assembled for one node execution.
///
/// Keys are memory node ids; values are the corresponding query results.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MemorySnapshot {
    entries: HashMap<String, Value>,
}

impl MemorySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one memory node's query result.
    pub fn insert(&mut self, memory_id: impl Into<String>, result: Value) {
        self.entries.insert(memory_id.into(), result);
    }

    /// Get a memory node's query result.
    pub fn get(&self, memory_id: &str) -> Option<&Value> {
        self.entries.get(memory_id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get the underlying entry map.
    pub fn entries(&self) -> &HashMap<String, Value> {
        &self.entries
    }
}

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Normalize a decision value for branch lookup.
///
/// Strings compare lower-cased and trimmed; booleans and numbers normalize
/// via their canonical JSON string form, so `true` matches a branch labeled
/// `"true"` (or `"True"`). Other JSON shapes do not normalize.
pub fn normalize_decision(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_lowercase()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Extract payload values for the given keys from context and state.
///
/// Each key is looked up in the run context first, then as a dot-path into
/// the run state. Missing keys are skipped.
pub fn extract_keys(
    keys: &[String],
    context: &RunContext,
    state: &RunState,
) -> Vec<(String, Value)> {
    keys.iter()
        .filter_map(|key| {
            context
                .get(key)
                .or_else(|| state.resolve_path(key))
                .map(|v| (key.clone(), v.clone()))
        })
        .collect()
}
