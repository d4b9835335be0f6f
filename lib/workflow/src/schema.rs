//! Declared input/output schemas for agent capabilities.
//!
//! Each capability an [`Agent`](crate::agent::Agent) declares carries a
//! schema for its input and its output. The scheduler uses the output
//! schema to decide whether a container's stdout is a valid
//! [`Success`](crate::executor::ExecutionResult::Success) result or an
//! `OutputSchemaViolation` failure.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A simplified JSON Schema used to describe a capability's input or
/// output shape.
///
/// This is not a full JSON Schema validator: it performs the shallow
/// type-tag comparison that's sufficient for the scheduler's conformance
/// check, not structural validation of nested properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySchema {
    /// The JSON Schema definition.
    #[serde(flatten)]
    pub schema: JsonValue,
}

impl CapabilitySchema {
    /// A schema that accepts any value.
    #[must_use]
    pub fn any() -> Self {
        Self {
            schema: serde_json::json!({}),
        }
    }

    /// Creates a schema from a raw JSON Schema value.
    #[must_use]
    pub fn from_json(schema: JsonValue) -> Self {
        Self { schema }
    }

    /// Returns the declared `type` tag, if any.
    #[must_use]
    pub fn type_tag(&self) -> Option<&str> {
        self.schema.get("type").and_then(|v| v.as_str())
    }

    /// Checks whether a produced value conforms to this schema.
    ///
    /// Empty schema (`any`) accepts everything. Otherwise the value's
    /// runtime JSON type must match the declared `type` tag, when present.
    #[must_use]
    pub fn conforms(&self, value: &JsonValue) -> bool {
        let Some(expected) = self.type_tag() else {
            return true;
        };
        let actual = json_type_name(value);
        expected == actual
    }

    /// Checks whether this schema is compatible with another — used when
    /// validating that a node's resolved template matches a prerequisite's
    /// declared output schema.
    #[must_use]
    pub fn is_compatible_with(&self, other: &Self) -> bool {
        if self.schema == serde_json::json!({}) || other.schema == serde_json::json!({}) {
            return true;
        }

        if let (Some(a), Some(b)) = (self.type_tag(), other.type_tag()) {
            return a == b;
        }

        true
    }
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

impl Default for CapabilitySchema {
    fn default() -> Self {
        Self::any()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_schema_conforms_to_everything() {
        let any = CapabilitySchema::any();
        assert!(any.conforms(&serde_json::json!("hello")));
        assert!(any.conforms(&serde_json::json!(42)));
    }

    #[test]
    fn typed_schema_rejects_mismatched_value() {
        let schema = CapabilitySchema::from_json(serde_json::json!({ "type": "object" }));
        assert!(schema.conforms(&serde_json::json!({ "ok": true })));
        assert!(!schema.conforms(&serde_json::json!("not an object")));
    }

    #[test]
    fn compatibility_is_shallow_type_equality() {
        let a = CapabilitySchema::from_json(serde_json::json!({ "type": "string" }));
        let b = CapabilitySchema::from_json(serde_json::json!({ "type": "string" }));
        let c = CapabilitySchema::from_json(serde_json::json!({ "type": "number" }));

        assert!(a.is_compatible_with(&b));
        assert!(!a.is_compatible_with(&c));
    }

    #[test]
    fn schema_serde_roundtrip() {
        let schema = CapabilitySchema::from_json(serde_json::json!({ "type": "number" }));
        let json = serde_json::to_string(&schema).expect("serialize");
        let parsed: CapabilitySchema = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(schema, parsed);
    }
}
