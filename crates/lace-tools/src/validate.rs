// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Argument validation against a tool's JSON Schema.
//!
//! Covers the subset of JSON Schema that tool schemas in practice use:
//! `type`, `properties`, `required`, `enum`, and array `items`. Validation
//! runs before execution; a failing call never reaches the tool body.

use serde_json::Value;

/// Validate `arguments` against `schema`. Returns the first violation found.
pub fn validate_arguments(schema: &Value, arguments: &Value) -> Result<(), String> {
    validate_value(schema, arguments, "$")
}

fn validate_value(schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    if let Some(allowed) = schema.get("enum").and_then(|e| e.as_array()) {
        if !allowed.contains(value) {
            return Err(format!("validation failed: {path} must be one of {allowed:?}"));
        }
    }

    let Some(expected) = schema.get("type").and_then(|t| t.as_str()) else {
        return Ok(());
    };

    match expected {
        "object" => {
            let Some(obj) = value.as_object() else {
                return Err(type_error(path, "object", value));
            };
            if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
                for field in required.iter().filter_map(|f| f.as_str()) {
                    if !obj.contains_key(field) {
                        return Err(format!(
                            "validation failed: missing required field '{field}' at {path}"
                        ));
                    }
                }
            }
            if let Some(props) = schema.get("properties").and_then(|p| p.as_object()) {
                for (key, sub_schema) in props {
                    if let Some(sub_value) = obj.get(key) {
                        validate_value(sub_schema, sub_value, &format!("{path}.{key}"))?;
                    }
                }
            }
            Ok(())
        }
        "array" => {
            let Some(items) = value.as_array() else {
                return Err(type_error(path, "array", value));
            };
            if let Some(item_schema) = schema.get("items") {
                for (i, item) in items.iter().enumerate() {
                    validate_value(item_schema, item, &format!("{path}[{i}]"))?;
                }
            }
            Ok(())
        }
        "string" => value
            .is_string()
            .then_some(())
            .ok_or_else(|| type_error(path, "string", value)),
        "number" => value
            .is_number()
            .then_some(())
            .ok_or_else(|| type_error(path, "number", value)),
        "integer" => value
            .is_i64()
            .then_some(())
            .or_else(|| value.is_u64().then_some(()))
            .ok_or_else(|| type_error(path, "integer", value)),
        "boolean" => value
            .is_boolean()
            .then_some(())
            .ok_or_else(|| type_error(path, "boolean", value)),
        "null" => value
            .is_null()
            .then_some(())
            .ok_or_else(|| type_error(path, "null", value)),
        _ => Ok(()),
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> String {
    let got = match got {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    format!("validation failed: {path} must be {expected}, got {got}")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn file_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "depth": { "type": "integer" },
                "mode": { "type": "string", "enum": ["read", "write"] },
            },
            "required": ["path"],
        })
    }

    #[test]
    fn valid_arguments_pass() {
        assert!(validate_arguments(&file_schema(), &json!({"path": ".", "depth": 2})).is_ok());
    }

    #[test]
    fn missing_required_field_fails() {
        let err = validate_arguments(&file_schema(), &json!({"depth": 2})).unwrap_err();
        assert!(err.contains("missing required field 'path'"));
    }

    #[test]
    fn wrong_type_fails_with_path() {
        let err = validate_arguments(&file_schema(), &json!({"path": 42})).unwrap_err();
        assert!(err.contains("$.path"));
        assert!(err.contains("must be string"));
    }

    #[test]
    fn enum_violation_fails() {
        let err =
            validate_arguments(&file_schema(), &json!({"path": ".", "mode": "append"})).unwrap_err();
        assert!(err.contains("must be one of"));
    }

    #[test]
    fn non_object_arguments_fail_object_schema() {
        let err = validate_arguments(&file_schema(), &json!("just a string")).unwrap_err();
        assert!(err.contains("must be object"));
    }

    #[test]
    fn array_items_are_checked() {
        let schema = json!({
            "type": "object",
            "properties": { "names": { "type": "array", "items": { "type": "string" } } },
        });
        assert!(validate_arguments(&schema, &json!({"names": ["a", "b"]})).is_ok());
        let err = validate_arguments(&schema, &json!({"names": ["a", 1]})).unwrap_err();
        assert!(err.contains("$.names[1]"));
    }

    #[test]
    fn extra_fields_are_tolerated() {
        assert!(validate_arguments(&file_schema(), &json!({"path": ".", "extra": true})).is_ok());
    }

    #[test]
    fn schema_without_type_accepts_anything() {
        assert!(validate_arguments(&json!({}), &json!({"whatever": 1})).is_ok());
    }
}
