//! SF-005: Parameter cascade and reference interpolation.
//!
//! Effective parameters for `(step, assignment)` deep-merge four overlays,
//! lowest precedence first: defaults, assignments[id], steps[step],
//! actions["#step.id"]. Objects merge key by key; arrays and scalars from the
//! higher tier replace wholesale. The merged tree is then interpolated:
//! a string that is exactly `${ref}` becomes the referenced value itself,
//! and `${ref}` inside longer text is replaced by its string form.

use super::environment::References;
use super::types::{output_key, value_to_string, Object, ParameterConfig, Value};

/// Compute the effective parameter object for an assignment action.
/// Returns `None` when no parameter configuration was supplied.
pub fn resolve_params(
    config: Option<&ParameterConfig>,
    step_id: &str,
    assignment_id: &str,
    refs: &References<'_>,
) -> Option<Value> {
    let config = config?;
    let merged = cascade(config, step_id, assignment_id);
    Some(interpolate(&Value::Object(merged), refs))
}

/// Merge the four tiers without interpolating.
pub fn cascade(config: &ParameterConfig, step_id: &str, assignment_id: &str) -> Object {
    let empty = Object::new();
    let tiers = [
        &config.defaults,
        config.assignments.get(assignment_id).unwrap_or(&empty),
        config.steps.get(step_id).unwrap_or(&empty),
        config
            .actions
            .get(&output_key(step_id, assignment_id))
            .unwrap_or(&empty),
    ];
    tiers
        .into_iter()
        .fold(Object::new(), |acc, tier| deep_merge(&acc, tier))
}

/// Deep-merge `overlay` onto `base`.
pub fn deep_merge(base: &Object, overlay: &Object) -> Object {
    let mut out = base.clone();
    for (key, value) in overlay {
        let merged = match (out.get(key), value) {
            (Some(Value::Object(lower)), Value::Object(upper)) => {
                Value::Object(deep_merge(lower, upper))
            }
            _ => value.clone(),
        };
        out.insert(key.clone(), merged);
    }
    out
}

/// Interpolate every string in a value tree.
pub fn interpolate(value: &Value, refs: &References<'_>) -> Value {
    match value {
        Value::String(s) => interpolate_string(s, refs),
        Value::Array(items) => Value::Array(items.iter().map(|v| interpolate(v, refs)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate(v, refs)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn interpolate_string(s: &str, refs: &References<'_>) -> Value {
    if let Some(expr) = whole_expression(s) {
        return match refs.get(expr) {
            Some(v) => v.clone(),
            None => Value::String(s.to_string()),
        };
    }
    Value::String(resolve_template(s, refs))
}

/// `Some(expr)` when the whole string is a single `${expr}`.
fn whole_expression(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("${")?.strip_suffix('}')?;
    if inner.is_empty() || inner.contains('}') {
        return None;
    }
    Some(inner)
}

/// Replace each embedded `${expr}` with the stringified reference, leaving
/// unresolved tokens in place.
pub fn resolve_template(template: &str, refs: &References<'_>) -> String {
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(open) = result[start..].find("${") {
        let open = start + open;
        let close = match result[open..].find('}') {
            Some(c) => open + c + 1,
            None => break,
        };
        let expr = &result[open + 2..close - 1];

        let value = if expr.is_empty() {
            None
        } else {
            refs.get(expr).map(value_to_string)
        };

        match value {
            Some(value) => {
                result.replace_range(open..close, &value);
                start = open + value.len();
            }
            None => start = close,
        }
    }

    result
}
