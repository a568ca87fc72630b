//! JSON Schema subset used for structured output and tool arguments.
//!
//! Supported keywords: `type` (single or list), `properties`, `required`,
//! `additionalProperties: false`, `items`, `enum` and `anyOf`. Everything else
//! is accepted and ignored.

use crate::models::responses::ResponsesError;
use serde_json::Value;
use thiserror::Error;

const KNOWN_TYPES: &[&str] = &[
    "object", "array", "string", "number", "integer", "boolean", "null",
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    /// The text is not JSON at all.
    #[error("{0}")]
    Parse(String),
    /// The JSON is well-formed but does not satisfy the schema.
    #[error("{path}: {message}")]
    Mismatch { path: String, message: String },
    /// The schema itself is malformed.
    #[error("{path}: {message}")]
    InvalidSchema { path: String, message: String },
}

impl From<SchemaError> for ResponsesError {
    fn from(e: SchemaError) -> Self {
        match e {
            SchemaError::Parse(msg) => ResponsesError::StructuredOutputParse(msg),
            SchemaError::Mismatch { .. } => ResponsesError::StructuredOutputSchema(e.to_string()),
            SchemaError::InvalidSchema { .. } => ResponsesError::validation(
                "text.format.schema",
                format!("invalid JSON schema: {}", e),
            ),
        }
    }
}

fn mismatch(path: &str, message: impl Into<String>) -> SchemaError {
    SchemaError::Mismatch {
        path: path.to_string(),
        message: message.into(),
    }
}

fn invalid(path: &str, message: impl Into<String>) -> SchemaError {
    SchemaError::InvalidSchema {
        path: path.to_string(),
        message: message.into(),
    }
}

/// Admission-time check of an output schema: the root must be an object
/// schema and every property must declare a type.
pub fn check_output_schema(schema: &Value) -> Result<(), SchemaError> {
    if !schema.is_object() {
        return Err(invalid("$", "schema must be a JSON object"));
    }
    if schema.get("type").and_then(Value::as_str) != Some("object") {
        return Err(invalid("$", "root schema must have type \"object\""));
    }
    check_schema_node(schema, "$")
}

/// Check a tool's parameter schema (same rules, root may be omitted).
pub fn check_parameters_schema(schema: &Value) -> Result<(), SchemaError> {
    if !schema.is_object() {
        return Err(invalid("$", "parameters must be a JSON object"));
    }
    check_schema_node(schema, "$")
}

fn check_schema_node(schema: &Value, path: &str) -> Result<(), SchemaError> {
    let Some(node) = schema.as_object() else {
        return Err(invalid(path, "schema must be a JSON object"));
    };

    if let Some(any_of) = node.get("anyOf") {
        let branches = any_of
            .as_array()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| invalid(path, "anyOf must be a non-empty array"))?;
        for (i, branch) in branches.iter().enumerate() {
            check_schema_node(branch, &format!("{}.anyOf[{}]", path, i))?;
        }
    }

    if let Some(declared) = node.get("type") {
        let names: Vec<&str> = match declared {
            Value::String(name) => vec![name.as_str()],
            Value::Array(list) => list.iter().filter_map(Value::as_str).collect(),
            _ => return Err(invalid(path, "type must be a string or array of strings")),
        };
        if names.is_empty() {
            return Err(invalid(path, "type must not be empty"));
        }
        if let Some(unknown) = names.iter().find(|n| !KNOWN_TYPES.contains(n)) {
            return Err(invalid(path, format!("unknown type '{}'", unknown)));
        }
    }

    if let Some(properties) = node.get("properties") {
        let properties = properties
            .as_object()
            .ok_or_else(|| invalid(path, "properties must be an object"))?;
        for (name, property) in properties {
            let property_path = format!("{}.{}", path, name);
            let typed = property.get("type").is_some()
                || property.get("enum").is_some()
                || property.get("anyOf").is_some();
            if !typed {
                return Err(invalid(&property_path, "property must declare a type"));
            }
            check_schema_node(property, &property_path)?;
        }
    }

    if let Some(required) = node.get("required") {
        let required = required
            .as_array()
            .ok_or_else(|| invalid(path, "required must be an array"))?;
        if required.iter().any(|r| !r.is_string()) {
            return Err(invalid(path, "required entries must be strings"));
        }
    }

    if let Some(items) = node.get("items") {
        check_schema_node(items, &format!("{}[]", path))?;
    }

    Ok(())
}

/// Parse `text` as JSON and check it against `schema`.
pub fn validate(text: &str, schema: &Value) -> Result<Value, SchemaError> {
    let value: Value =
        serde_json::from_str(text.trim()).map_err(|e| SchemaError::Parse(e.to_string()))?;
    validate_value(&value, schema, "$")?;
    Ok(value)
}

/// Check an already parsed value.
pub fn validate_value(value: &Value, schema: &Value, path: &str) -> Result<(), SchemaError> {
    if let Some(options) = schema.get("enum").and_then(Value::as_array) {
        if !options.contains(value) {
            return Err(mismatch(path, "value is not one of the allowed enum values"));
        }
    }

    if let Some(branches) = schema.get("anyOf").and_then(Value::as_array) {
        if !branches
            .iter()
            .any(|branch| validate_value(value, branch, path).is_ok())
        {
            return Err(mismatch(path, "value matches none of the anyOf schemas"));
        }
    }

    match schema.get("type") {
        Some(Value::String(name)) => check_type(value, name, path)?,
        Some(Value::Array(names)) => {
            if !names
                .iter()
                .filter_map(Value::as_str)
                .any(|name| type_matches(value, name))
            {
                return Err(mismatch(
                    path,
                    format!("expected one of {}, got {}", Value::Array(names.clone()), kind(value)),
                ));
            }
        }
        _ => {}
    }

    if let Value::Object(object) = value {
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(name) {
                    return Err(mismatch(
                        path,
                        format!("missing required property '{}'", name),
                    ));
                }
            }
        }

        let properties = schema.get("properties").and_then(Value::as_object);
        for (name, field) in object {
            match properties.and_then(|p| p.get(name)) {
                Some(property) => validate_value(field, property, &format!("{}.{}", path, name))?,
                None => {
                    if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
                        return Err(mismatch(
                            path,
                            format!("unexpected property '{}'", name),
                        ));
                    }
                }
            }
        }
    }

    if let Value::Array(items) = value {
        if let Some(item_schema) = schema.get("items") {
            for (i, item) in items.iter().enumerate() {
                validate_value(item, item_schema, &format!("{}[{}]", path, i))?;
            }
        }
    }

    Ok(())
}

fn check_type(value: &Value, name: &str, path: &str) -> Result<(), SchemaError> {
    if type_matches(value, name) {
        Ok(())
    } else {
        Err(mismatch(
            path,
            format!("expected {}, got {}", name, kind(value)),
        ))
    }
}

fn type_matches(value: &Value, name: &str) -> bool {
    match name {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "integer" => {
            value.is_i64()
                || value.is_u64()
                || value.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false)
        }
        _ => true,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
