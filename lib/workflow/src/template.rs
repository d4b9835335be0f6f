//! Template Resolver (C4).
//!
//! Scans a JSON-like input template for `{{<path>}}` placeholders and
//! substitutes values from an environment of named JSON values — the
//! run's `context` plus the outputs of completed prerequisite nodes.
//!
//! A string leaf that is *only* a placeholder is replaced by the
//! referenced value's native JSON type. A string leaf with other text
//! around the placeholder(s) is replaced by a string, with each
//! placeholder stringified. Non-string leaves are never scanned.

use crate::error::TemplateError;
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// The substitution environment: `"context"` plus completed prerequisite
/// node ids (by their string form), mapped to their produced JSON value.
pub type Environment = HashMap<String, JsonValue>;

/// Resolves every `{{path}}` placeholder in `template` against `env`.
///
/// # Errors
///
/// Returns the first [`TemplateError`] encountered during a depth-first
/// walk of the template.
pub fn resolve(template: &JsonValue, env: &Environment) -> Result<JsonValue, TemplateError> {
    match template {
        JsonValue::String(s) => resolve_string(s, env),
        JsonValue::Array(items) => {
            let resolved: Result<Vec<_>, _> = items.iter().map(|item| resolve(item, env)).collect();
            Ok(JsonValue::Array(resolved?))
        }
        JsonValue::Object(map) => {
            let mut resolved = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                resolved.insert(key.clone(), resolve(value, env)?);
            }
            Ok(JsonValue::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_string(s: &str, env: &Environment) -> Result<JsonValue, TemplateError> {
    let Some(whole) = as_sole_placeholder(s) else {
        return Ok(JsonValue::String(interpolate(s, env)?));
    };
    resolve_path(whole, env)
}

/// Returns the inner path if `s` is exactly one `{{path}}` placeholder
/// with nothing else around it.
fn as_sole_placeholder(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || trimmed.len() != s.len() {
        return None;
    }
    Some(inner)
}

/// Replaces every `{{path}}` occurrence in `s` with the stringified
/// resolved value, leaving surrounding text intact.
fn interpolate(s: &str, env: &Environment) -> Result<String, TemplateError> {
    let mut output = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(start) = rest.find("{{") {
        let Some(end) = rest[start..].find("}}") else {
            output.push_str(rest);
            rest = "";
            break;
        };
        output.push_str(&rest[..start]);
        let path = &rest[start + 2..start + end];
        let value = resolve_path(path.trim(), env)?;
        output.push_str(&stringify(&value));
        rest = &rest[start + end + 2..];
    }
    output.push_str(rest);
    Ok(output)
}

fn stringify(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Resolves a single dotted path (e.g. `scan.output.items[0].name`)
/// against the environment.
fn resolve_path(path: &str, env: &Environment) -> Result<JsonValue, TemplateError> {
    let mut segments = path.split('.');
    let root = segments.next().unwrap_or("").trim();

    let mut current = env.get(root).cloned().ok_or_else(|| TemplateError::UnknownReference {
        reference: root.to_string(),
    })?;

    let mut traversed = root.to_string();
    for segment in segments {
        for step in split_index_steps(segment) {
            current = step_into(&current, &step, root, &traversed)?;
            traversed.push('.');
            traversed.push_str(&step);
        }
    }

    Ok(current)
}

/// A single navigation step: either a field name or an array index.
enum Step {
    Field(String),
    Index(usize),
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Field(name) => write!(f, "{name}"),
            Self::Index(i) => write!(f, "[{i}]"),
        }
    }
}

/// Splits a path segment like `items[0][1]` into a field step followed by
/// index steps.
fn split_index_steps(segment: &str) -> Vec<Step> {
    let mut steps = Vec::new();
    let mut rest = segment;

    if let Some(bracket) = rest.find('[') {
        let field = &rest[..bracket];
        if !field.is_empty() {
            steps.push(Step::Field(field.to_string()));
        }
        rest = &rest[bracket..];
        while let Some(stripped) = rest.strip_prefix('[') {
            if let Some(close) = stripped.find(']') {
                if let Ok(index) = stripped[..close].parse::<usize>() {
                    steps.push(Step::Index(index));
                }
                rest = &stripped[close + 1..];
            } else {
                break;
            }
        }
    } else if !rest.is_empty() {
        steps.push(Step::Field(rest.to_string()));
    }

    steps
}

fn step_into(
    value: &JsonValue,
    step: &Step,
    reference: &str,
    traversed: &str,
) -> Result<JsonValue, TemplateError> {
    match step {
        Step::Field(name) => match value {
            JsonValue::Object(map) => map.get(name).cloned().ok_or_else(|| TemplateError::MissingField {
                reference: reference.to_string(),
                path: format!("{traversed}.{name}"),
            }),
            _ => Err(TemplateError::TypeMismatch {
                reference: reference.to_string(),
                expected: "object".to_string(),
            }),
        },
        Step::Index(index) => match value {
            JsonValue::Array(items) => items.get(*index).cloned().ok_or_else(|| TemplateError::OutOfRange {
                reference: reference.to_string(),
                path: format!("{traversed}[{index}]"),
            }),
            _ => Err(TemplateError::TypeMismatch {
                reference: reference.to_string(),
                expected: "array".to_string(),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_with_context(context: JsonValue) -> Environment {
        let mut env = HashMap::new();
        env.insert("context".to_string(), context);
        env
    }

    #[test]
    fn sole_placeholder_yields_native_type() {
        let env = env_with_context(serde_json::json!({ "severity": "critical" }));
        let template = serde_json::json!("{{context.severity}}");
        let resolved = resolve(&template, &env).unwrap();
        assert_eq!(resolved, serde_json::json!("critical"));
    }

    #[test]
    fn sole_placeholder_preserves_non_string_type() {
        let env = env_with_context(serde_json::json!({ "count": 3 }));
        let template = serde_json::json!("{{context.count}}");
        let resolved = resolve(&template, &env).unwrap();
        assert_eq!(resolved, serde_json::json!(3));
    }

    #[test]
    fn mixed_text_interpolates_to_string() {
        let env = env_with_context(serde_json::json!({ "severity": "critical" }));
        let template = serde_json::json!("alert level: {{context.severity}}!");
        let resolved = resolve(&template, &env).unwrap();
        assert_eq!(resolved, serde_json::json!("alert level: critical!"));
    }

    #[test]
    fn array_index_resolves() {
        let env = env_with_context(serde_json::json!({ "items": ["a", "b"] }));
        let template = serde_json::json!("{{context.items[1]}}");
        let resolved = resolve(&template, &env).unwrap();
        assert_eq!(resolved, serde_json::json!("b"));
    }

    #[test]
    fn unknown_reference_fails() {
        let env = env_with_context(serde_json::json!({}));
        let template = serde_json::json!("{{missing_node.output}}");
        let err = resolve(&template, &env).unwrap_err();
        assert_eq!(err, TemplateError::UnknownReference { reference: "missing_node".to_string() });
    }

    #[test]
    fn missing_field_fails() {
        let env = env_with_context(serde_json::json!({ "a": 1 }));
        let template = serde_json::json!("{{context.b}}");
        let err = resolve(&template, &env).unwrap_err();
        assert_eq!(
            err,
            TemplateError::MissingField { reference: "context".to_string(), path: "context.b".to_string() }
        );
    }

    #[test]
    fn out_of_range_index_fails() {
        let env = env_with_context(serde_json::json!({ "items": ["a"] }));
        let template = serde_json::json!("{{context.items[5]}}");
        let err = resolve(&template, &env).unwrap_err();
        assert!(matches!(err, TemplateError::OutOfRange { .. }));
    }

    #[test]
    fn indexing_into_scalar_fails() {
        let env = env_with_context(serde_json::json!({ "count": 3 }));
        let template = serde_json::json!("{{context.count.nested}}");
        let err = resolve(&template, &env).unwrap_err();
        assert!(matches!(err, TemplateError::TypeMismatch { .. }));
    }

    #[test]
    fn nested_object_template_resolves_recursively() {
        let env = env_with_context(serde_json::json!({ "name": "widget" }));
        let template = serde_json::json!({ "label": "{{context.name}}", "count": 1 });
        let resolved = resolve(&template, &env).unwrap();
        assert_eq!(resolved, serde_json::json!({ "label": "widget", "count": 1 }));
    }
}
