//! SF-004: Run environment and reference resolution.
//!
//! `variables` is one flat namespace shared by every step and handler.
//! `outputs` holds the last real handler result per `#step.action` key and
//! is written only by the executor during real runs.

use super::types::{Value, Variables};
use indexmap::IndexMap;

/// Mutable state shared across a run.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub variables: Variables,
    pub outputs: IndexMap<String, Value>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only reference facade over the recorded outputs.
    pub fn references(&self) -> References<'_> {
        References::new(&self.outputs)
    }

    /// Record an action output. Later writes to the same key replace earlier ones.
    pub fn record_output(&mut self, key: String, output: Value) {
        self.outputs.insert(key, output);
    }

    /// Shallow-merge handler bindings; returned keys overwrite existing ones.
    pub fn merge_variables(&mut self, vars: Variables) {
        for (name, value) in vars {
            self.variables.insert(name, value);
        }
    }
}

/// Resolves `#step.action[.field...]` paths against recorded outputs.
#[derive(Debug, Clone, Copy)]
pub struct References<'a> {
    outputs: &'a IndexMap<String, Value>,
}

impl<'a> References<'a> {
    pub fn new(outputs: &'a IndexMap<String, Value>) -> Self {
        Self { outputs }
    }

    /// Resolve a reference. Returns `None` for anything that is not a
    /// recorded output (or a present, non-null field of one).
    ///
    /// A single-segment `#step` has no action id and therefore never matches
    /// a recorded key.
    pub fn get(&self, reference: &str) -> Option<&'a Value> {
        let path = reference.strip_prefix('#')?;
        let parts: Vec<&str> = path.split('.').collect();
        if parts.len() < 2 {
            return self.outputs.get(&format!("#{}", parts[0]));
        }

        let base_key = format!("#{}.{}", parts[0], parts[1]);
        let mut value = self.outputs.get(&base_key)?;
        for field in &parts[2..] {
            value = descend(value, field)?;
        }
        Some(value)
    }

    pub fn outputs(&self) -> &'a IndexMap<String, Value> {
        self.outputs
    }
}

/// Step into an object field or array index; a missing or null target ends
/// the walk.
fn descend<'v>(value: &'v Value, field: &str) -> Option<&'v Value> {
    let next = match value {
        Value::Object(map) => map.get(field),
        Value::Array(items) => field.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }?;
    if next.is_null() {
        None
    } else {
        Some(next)
    }
}
