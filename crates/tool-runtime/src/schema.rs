//! Argument validation against tool input schemas, and provider-specific
//! schema fix-ups.
//!
//! Validation covers the subset of JSON Schema that tool declarations use in
//! practice: `type`, `required`, `properties`, `items` and `enum`.

use serde_json::{Map, Value};
use tracing::debug;

/// Check `args` against `schema`. The error names the first offending path.
pub fn validate_arguments(schema: &Value, args: &Value) -> Result<(), String> {
    validate_at(schema, args, "arguments")
}

fn validate_at(schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    let Some(schema) = schema.as_object() else {
        return Ok(());
    };

    if let Some(expected) = schema.get("type") {
        let allowed: Vec<&str> = match expected {
            Value::String(t) => vec![t.as_str()],
            Value::Array(ts) => ts.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        if !allowed.is_empty() && !allowed.iter().any(|t| type_matches(t, value)) {
            return Err(format!(
                "{path}: expected {}, got {}",
                allowed.join(" or "),
                type_name(value)
            ));
        }
    }

    if let Some(Value::Array(options)) = schema.get("enum") {
        if !options.contains(value) {
            return Err(format!("{path}: value {value} is not one of {}", Value::Array(options.clone())));
        }
    }

    if let Value::Object(object) = value {
        if let Some(Value::Array(required)) = schema.get("required") {
            for key in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(key) {
                    return Err(format!("{path}: missing required property '{key}'"));
                }
            }
        }
        if let Some(Value::Object(properties)) = schema.get("properties") {
            for (key, property_schema) in properties {
                if let Some(property) = object.get(key) {
                    // Optional properties sent as null are treated as absent.
                    if property.is_null() && !is_required(schema, key) {
                        continue;
                    }
                    validate_at(property_schema, property, &format!("{path}.{key}"))?;
                }
            }
        }
    }

    if let (Value::Array(items), Some(item_schema)) = (value, schema.get("items")) {
        for (i, item) in items.iter().enumerate() {
            validate_at(item_schema, item, &format!("{path}[{i}]"))?;
        }
    }

    Ok(())
}

fn is_required(schema: &Map<String, Value>, key: &str) -> bool {
    schema
        .get("required")
        .and_then(Value::as_array)
        .is_some_and(|r| r.iter().any(|k| k.as_str() == Some(key)))
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
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

/// Rewrite an input schema into the dialect Gemini accepts.
pub fn fix_input_schema(provider: &str, schema: &Value) -> Value {
    if provider != "gemini" && provider != "vertex-ai" {
        return schema.clone();
    }

    let mut fixed = schema.clone();
    let Some(properties) = fixed.get_mut("properties").and_then(Value::as_object_mut) else {
        return fixed;
    };

    for (key, property) in properties.iter_mut() {
        let Some(property) = property.as_object_mut() else {
            continue;
        };
        for (from, to) in [("anyOf", "any_of"), ("oneOf", "one_of"), ("allOf", "all_of")] {
            if let Some(v) = property.remove(from) {
                property.insert(to.to_string(), v);
            }
        }
        property.remove("default");

        let is_string = property.get("type").and_then(Value::as_str) == Some("string");
        let unsupported_format = property
            .get("format")
            .and_then(Value::as_str)
            .is_some_and(|f| f != "enum" && f != "date-time");
        if is_string && unsupported_format {
            debug!(property = %key, "Removing unsupported format from Gemini schema");
            property.remove("format");
        }

        let missing_type = matches!(property.get("type"), None | Some(Value::Null))
            || property.get("type").and_then(Value::as_str) == Some("null");
        if missing_type {
            property.insert("type".to_string(), Value::String("string".to_string()));
        }
    }

    if properties.is_empty() {
        properties.insert(
            "placeholder".to_string(),
            serde_json::json!({
                "type": "string",
                "description": "Placeholder property to satisfy Gemini schema requirements"
            }),
        );
    }

    fixed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "filePath": {"type": "string"},
                "mode": {"type": "string", "enum": ["overwrite", "append", "create_only"]},
                "contextLines": {"type": "integer"},
                "items": {"type": "array", "items": {"type": "object", "required": ["name"]}}
            },
            "required": ["filePath"]
        })
    }

    #[test]
    fn test_valid_arguments() {
        let args = json!({"filePath": "a.txt", "mode": "append", "contextLines": 2});
        assert!(validate_arguments(&schema(), &args).is_ok());
    }

    #[test]
    fn test_missing_required() {
        let err = validate_arguments(&schema(), &json!({"mode": "append"})).unwrap_err();
        assert!(err.contains("missing required property 'filePath'"));
    }

    #[test]
    fn test_wrong_type() {
        let err = validate_arguments(&schema(), &json!({"filePath": 3})).unwrap_err();
        assert_eq!(err, "arguments.filePath: expected string, got number");
    }

    #[test]
    fn test_enum_violation() {
        let err = validate_arguments(&schema(), &json!({"filePath": "a", "mode": "truncate"})).unwrap_err();
        assert!(err.starts_with("arguments.mode"));
    }

    #[test]
    fn test_nested_items() {
        let err = validate_arguments(&schema(), &json!({"filePath": "a", "items": [{"name": "x"}, {}]})).unwrap_err();
        assert!(err.starts_with("arguments.items[1]"));
    }

    #[test]
    fn test_null_optional_is_absent() {
        assert!(validate_arguments(&schema(), &json!({"filePath": "a", "contextLines": null})).is_ok());
    }

    #[test]
    fn test_gemini_fixups() {
        let input = json!({
            "type": "object",
            "properties": {
                "choice": {"anyOf": [{"type": "string"}], "default": "x"},
                "url": {"type": "string", "format": "uri"},
                "when": {"type": "string", "format": "date-time"},
                "nothing": {"type": "null"}
            }
        });
        let fixed = fix_input_schema("gemini", &input);
        let props = &fixed["properties"];
        assert!(props["choice"].get("anyOf").is_none());
        assert!(props["choice"].get("any_of").is_some());
        assert!(props["choice"].get("default").is_none());
        assert_eq!(props["choice"]["type"], "string");
        assert!(props["url"].get("format").is_none());
        assert_eq!(props["when"]["format"], "date-time");
        assert_eq!(props["nothing"]["type"], "string");
    }

    #[test]
    fn test_gemini_placeholder_for_empty_properties() {
        let fixed = fix_input_schema("vertex-ai", &json!({"type": "object", "properties": {}}));
        assert!(fixed["properties"].get("placeholder").is_some());
    }

    #[test]
    fn test_other_providers_untouched() {
        let input = json!({"type": "object", "properties": {"a": {"type": "string", "default": "x"}}});
        assert_eq!(fix_input_schema("anthropic", &input), input);
    }
}
