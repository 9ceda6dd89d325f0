//! Minimal JSON-Schema builder for tool input schemas.

use std::collections::BTreeMap;

use serde_json::Value;
use serde_json::json;

#[derive(Debug, Clone)]
pub(crate) enum JsonSchema {
    String,
    Integer,
    Boolean,
    Array {
        items: Box<JsonSchema>,
    },
    Object {
        properties: BTreeMap<String, JsonSchema>,
        required: Vec<&'static str>,
    },
    /// Free-form object, e.g. nested operation params.
    Any,
}

impl JsonSchema {
    pub(crate) fn to_value(&self) -> Value {
        match self {
            JsonSchema::String => json!({ "type": "string" }),
            JsonSchema::Integer => json!({ "type": "integer" }),
            JsonSchema::Boolean => json!({ "type": "boolean" }),
            JsonSchema::Array { items } => json!({
                "type": "array",
                "items": items.to_value(),
            }),
            JsonSchema::Object {
                properties,
                required,
            } => {
                let props: serde_json::Map<String, Value> = properties
                    .iter()
                    .map(|(key, schema)| (key.clone(), schema.to_value()))
                    .collect();
                json!({
                    "type": "object",
                    "properties": props,
                    "required": required,
                    "additionalProperties": true,
                })
            }
            JsonSchema::Any => json!({ "type": "object" }),
        }
    }
}

/// Shorthand for the ubiquitous `{ taskId, ... }` object schema.
pub(crate) fn object(
    fields: &[(&'static str, JsonSchema)],
    required: &[&'static str],
) -> Value {
    let properties: BTreeMap<String, JsonSchema> = fields
        .iter()
        .map(|(name, schema)| (name.to_string(), schema.clone()))
        .collect();
    JsonSchema::Object {
        properties,
        required: required.to_vec(),
    }
    .to_value()
}
