//! Structural validation of JSON values against a JSON-Schema subset.
//!
//! Tool input schemas and structured-output schemas in this codebase use
//! `type`, `properties`, `required`, `enum`, and `items`. The checker
//! produces messages descriptive enough that a model reading them in a
//! failure tool_result can self-correct on its next turn.

use serde_json::Value;

/// Validate `value` against `schema`. Returns a human-readable error
/// describing the first mismatch found.
pub fn validate(schema: &Value, value: &Value) -> Result<(), String> {
    validate_at(schema, value, "$")
}

fn validate_at(schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    let obj = match schema.as_object() {
        Some(o) => o,
        // An empty or non-object schema accepts anything.
        None => return Ok(()),
    };

    if let Some(allowed) = obj.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(format!(
                "{path}: value {value} is not one of the allowed values {}",
                Value::Array(allowed.clone())
            ));
        }
    }

    if let Some(ty) = obj.get("type").and_then(Value::as_str) {
        check_type(ty, value, path)?;
    }

    if value.is_object() {
        let map = value.as_object().expect("checked is_object");

        if let Some(required) = obj.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                if !map.contains_key(name) {
                    return Err(format!("{path}: missing required field '{name}'"));
                }
            }
        }

        if let Some(props) = obj.get("properties").and_then(Value::as_object) {
            for (name, sub) in props {
                if let Some(field) = map.get(name) {
                    validate_at(sub, field, &format!("{path}.{name}"))?;
                }
            }
        }
    }

    if let (Some(items), Some(arr)) = (obj.get("items"), value.as_array()) {
        for (i, item) in arr.iter().enumerate() {
            validate_at(items, item, &format!("{path}[{i}]"))?;
        }
    }

    Ok(())
}

fn check_type(expected: &str, value: &Value, path: &str) -> Result<(), String> {
    let ok = match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        other => {
            return Err(format!("{path}: unsupported schema type '{other}'"));
        }
    };

    if ok {
        Ok(())
    } else {
        Err(format!(
            "{path}: expected {expected}, got {}",
            type_name(value)
        ))
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "limit": {"type": "integer"},
                "topic": {"type": "string", "enum": ["general", "news"]}
            },
            "required": ["query"]
        })
    }

    #[test]
    fn accepts_valid_arguments() {
        let args = json!({"query": "running shorts", "limit": 3});
        assert!(validate(&tool_schema(), &args).is_ok());
    }

    #[test]
    fn missing_required_field() {
        let err = validate(&tool_schema(), &json!({"limit": 3})).unwrap_err();
        assert!(err.contains("missing required field 'query'"), "{err}");
    }

    #[test]
    fn wrong_type_names_the_path() {
        let err = validate(&tool_schema(), &json!({"query": 42})).unwrap_err();
        assert!(err.contains("$.query"), "{err}");
        assert!(err.contains("expected string"), "{err}");
    }

    #[test]
    fn enum_mismatch() {
        let args = json!({"query": "x", "topic": "sports"});
        let err = validate(&tool_schema(), &args).unwrap_err();
        assert!(err.contains("not one of the allowed values"), "{err}");
    }

    #[test]
    fn array_items_checked() {
        let schema = json!({"type": "array", "items": {"type": "integer"}});
        assert!(validate(&schema, &json!([1, 2, 3])).is_ok());
        let err = validate(&schema, &json!([1, "two"])).unwrap_err();
        assert!(err.contains("$[1]"), "{err}");
    }

    #[test]
    fn empty_schema_accepts_anything() {
        assert!(validate(&json!({}), &json!({"whatever": true})).is_ok());
        assert!(validate(&Value::Null, &json!(17)).is_ok());
    }

    #[test]
    fn integer_rejects_float() {
        let schema = json!({"type": "integer"});
        assert!(validate(&schema, &json!(3)).is_ok());
        assert!(validate(&schema, &json!(3.5)).is_err());
    }
}
