use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum SchemaViolation {
    #[error("tool input must be a json object")]
    NotAnObject,
    #[error("missing required field `{field}`")]
    MissingField { field: String },
    #[error("invalid type for field `{field}`; expected {expected}")]
    InvalidFieldType { field: String, expected: String },
    #[error("unknown field `{field}`")]
    UnknownField { field: String },
}

fn matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

/// Validates a model-proposed input against a tool's declared json schema
/// before dispatch. Covers the object shape the registry's tools declare:
/// required fields, per-property types, and `additionalProperties: false`.
pub fn validate_tool_input(schema: &Value, input: &Value) -> Result<(), SchemaViolation> {
    let declares_object = schema.get("type").and_then(Value::as_str) == Some("object")
        || schema.get("properties").is_some();
    if !declares_object {
        return Ok(());
    }

    let Some(fields) = input.as_object() else {
        return Err(SchemaViolation::NotAnObject);
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for entry in required {
            let Some(field) = entry.as_str() else {
                continue;
            };
            if !fields.contains_key(field) {
                return Err(SchemaViolation::MissingField {
                    field: field.to_string(),
                });
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    if let Some(properties) = properties {
        for (field, declared) in properties {
            let Some(value) = fields.get(field) else {
                continue;
            };
            if let Some(expected) = declared.get("type").and_then(Value::as_str) {
                if !matches_type(value, expected) {
                    return Err(SchemaViolation::InvalidFieldType {
                        field: field.clone(),
                        expected: expected.to_string(),
                    });
                }
            }
        }

        if schema.get("additionalProperties").and_then(Value::as_bool) == Some(false) {
            for field in fields.keys() {
                if !properties.contains_key(field) {
                    return Err(SchemaViolation::UnknownField {
                        field: field.clone(),
                    });
                }
            }
        }
    }

    Ok(())
}
