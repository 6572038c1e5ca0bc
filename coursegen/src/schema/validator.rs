//! Structural validation of generated outputs.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

use super::SchemaDescriptor;
use crate::errors::SchemaMismatch;

/// Checks `raw` against `schema`, returning the first offending path.
///
/// Only structure is checked: JSON types, required fields, enum membership
/// and minimum array length.
pub fn validate(raw: &Value, schema: &SchemaDescriptor) -> Result<(), SchemaMismatch> {
    check(raw, schema, "$")
}

/// Validates `raw` and deserializes it into `T`.
pub fn validate_as<T: DeserializeOwned>(
    raw: &Value,
    schema: &SchemaDescriptor,
) -> Result<T, SchemaMismatch> {
    validate(raw, schema)?;
    deserialize(raw)
}

/// Deserializes an already validated value into `T`.
pub fn deserialize<T: DeserializeOwned>(raw: &Value) -> Result<T, SchemaMismatch> {
    T::deserialize(raw).map_err(|e| SchemaMismatch::new("$", e.to_string()))
}

fn check(value: &Value, schema: &SchemaDescriptor, path: &str) -> Result<(), SchemaMismatch> {
    match schema {
        SchemaDescriptor::Any => Ok(()),
        SchemaDescriptor::String => expect(value.is_string(), value, schema, path),
        SchemaDescriptor::Integer => {
            expect(value.is_i64() || value.is_u64(), value, schema, path)
        }
        SchemaDescriptor::Unsigned => expect(
            value.as_u64().is_some_and(|n| u32::try_from(n).is_ok()),
            value,
            schema,
            path,
        ),
        SchemaDescriptor::Number => expect(value.is_number(), value, schema, path),
        SchemaDescriptor::Boolean => expect(value.is_boolean(), value, schema, path),
        SchemaDescriptor::Enum { values } => {
            let Some(text) = value.as_str() else {
                return expect(false, value, schema, path);
            };
            if values.iter().any(|allowed| allowed == text) {
                Ok(())
            } else {
                Err(SchemaMismatch::new(
                    path,
                    format!("'{text}' is not one of [{}]", values.join(", ")),
                ))
            }
        }
        SchemaDescriptor::Array { items, min_items } => {
            let Some(elements) = value.as_array() else {
                return expect(false, value, schema, path);
            };
            if let Some(min) = min_items {
                if elements.len() < *min {
                    return Err(SchemaMismatch::new(
                        path,
                        format!("expected at least {min} items, found {}", elements.len()),
                    ));
                }
            }
            for (index, element) in elements.iter().enumerate() {
                check(element, items, &format!("{path}[{index}]"))?;
            }
            Ok(())
        }
        SchemaDescriptor::Object { fields } => {
            let Some(object) = value.as_object() else {
                return expect(false, value, schema, path);
            };
            for field in fields {
                let field_path = format!("{path}.{}", field.name);
                match object.get(&field.name) {
                    None | Some(Value::Null) if field.required => {
                        return Err(SchemaMismatch::new(field_path, "missing required field"));
                    }
                    None | Some(Value::Null) => {}
                    Some(inner) => check(inner, &field.schema, &field_path)?,
                }
            }
            Ok(())
        }
    }
}

fn expect(
    ok: bool,
    value: &Value,
    schema: &SchemaDescriptor,
    path: &str,
) -> Result<(), SchemaMismatch> {
    if ok {
        Ok(())
    } else {
        Err(SchemaMismatch::new(
            path,
            format!("expected {}, found {}", schema.type_name(), json_type(value)),
        ))
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Validator shared across concurrent runs.
///
/// Holds nothing but counters, so runs never contend on it.
#[derive(Debug, Default)]
pub struct SchemaValidator {
    checked: AtomicU64,
    rejected: AtomicU64,
}

impl SchemaValidator {
    /// Creates a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates `raw`, returning it unchanged on success.
    pub fn validate(&self, raw: Value, schema: &SchemaDescriptor) -> Result<Value, SchemaMismatch> {
        self.checked.fetch_add(1, Ordering::Relaxed);
        match validate(&raw, schema) {
            Ok(()) => Ok(raw),
            Err(mismatch) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                Err(mismatch)
            }
        }
    }

    /// Number of outputs checked.
    #[must_use]
    pub fn checked(&self) -> u64 {
        self.checked.load(Ordering::Relaxed)
    }

    /// Number of outputs rejected.
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldSchema;
    use serde::Deserialize;
    use serde_json::json;

    fn chapters_schema() -> SchemaDescriptor {
        SchemaDescriptor::object([
            FieldSchema::required("title", SchemaDescriptor::String),
            FieldSchema::required(
                "chapters",
                SchemaDescriptor::array_min(
                    SchemaDescriptor::object([
                        FieldSchema::required("order", SchemaDescriptor::Integer),
                        FieldSchema::required("title", SchemaDescriptor::String),
                        FieldSchema::optional(
                            "level",
                            SchemaDescriptor::enumeration(["intro", "advanced"]),
                        ),
                    ]),
                    1,
                ),
            ),
        ])
    }

    #[test]
    fn test_valid_output() {
        let raw = json!({
            "title": "Rust",
            "chapters": [
                {"order": 0, "title": "Ownership", "level": "intro"},
                {"order": 1, "title": "Traits", "extra": "ignored"}
            ]
        });
        assert!(validate(&raw, &chapters_schema()).is_ok());
    }

    #[test]
    fn test_missing_required_field_path() {
        let raw = json!({
            "title": "Rust",
            "chapters": [
                {"order": 0, "title": "Ownership"},
                {"order": 1}
            ]
        });
        let err = validate(&raw, &chapters_schema()).unwrap_err();
        assert_eq!(err.path, "$.chapters[1].title");
        assert_eq!(err.message, "missing required field");
    }

    #[test]
    fn test_null_required_field_is_missing() {
        let raw = json!({"title": null, "chapters": []});
        let err = validate(&raw, &chapters_schema()).unwrap_err();
        assert_eq!(err.path, "$.title");
    }

    #[test]
    fn test_wrong_type() {
        let raw = json!({"title": "Rust", "chapters": [{"order": 1.5, "title": "x"}]});
        let err = validate(&raw, &chapters_schema()).unwrap_err();
        assert_eq!(err.path, "$.chapters[0].order");
        assert_eq!(err.message, "expected integer, found number");

        let count = SchemaDescriptor::object([FieldSchema::required("count", SchemaDescriptor::Integer)]);
        assert!(validate(&json!({"count": -2}), &count).is_ok());
        let err = validate(&json!({"count": 2.0}), &count).unwrap_err();
        assert_eq!(err.path, "$.count");
    }

    #[test]
    fn test_unsigned_rejects_values_outside_u32() {
        let schema = SchemaDescriptor::object([FieldSchema::required("order", SchemaDescriptor::Unsigned)]);
        assert!(validate(&json!({"order": 0}), &schema).is_ok());
        assert!(validate(&json!({"order": u32::MAX}), &schema).is_ok());

        for bad in [json!(-1), json!(1_u64 << 40), json!(2.0)] {
            let err = validate(&json!({ "order": bad }), &schema).unwrap_err();
            assert_eq!(err.path, "$.order");
            assert!(err.message.starts_with("expected unsigned integer"));
        }
    }

    #[test]
    fn test_enum_membership() {
        let raw = json!({"title": "Rust", "chapters": [{"order": 0, "title": "x", "level": "expert"}]});
        let err = validate(&raw, &chapters_schema()).unwrap_err();
        assert_eq!(err.path, "$.chapters[0].level");
        assert!(err.message.contains("'expert'"));
    }

    #[test]
    fn test_min_items() {
        let raw = json!({"title": "Rust", "chapters": []});
        let err = validate(&raw, &chapters_schema()).unwrap_err();
        assert_eq!(err.path, "$.chapters");
        assert!(err.message.contains("at least 1"));
    }

    #[test]
    fn test_root_type_mismatch() {
        let err = validate(&json!("just text"), &chapters_schema()).unwrap_err();
        assert_eq!(err.path, "$");
        assert_eq!(err.message, "expected object, found string");
    }

    #[test]
    fn test_validate_as_typed() {
        #[derive(Debug, Deserialize)]
        struct Outline {
            title: String,
            chapters: Vec<serde_json::Value>,
        }

        let raw = json!({"title": "Rust", "chapters": [{"order": 0, "title": "x"}]});
        let outline: Outline = validate_as(&raw, &chapters_schema()).unwrap();
        assert_eq!(outline.title, "Rust");
        assert_eq!(outline.chapters.len(), 1);
    }

    #[test]
    fn test_validator_counters() {
        let validator = SchemaValidator::new();
        assert!(validator.validate(json!(1), &SchemaDescriptor::Integer).is_ok());
        assert!(validator.validate(json!("1"), &SchemaDescriptor::Integer).is_err());

        assert_eq!(validator.checked(), 2);
        assert_eq!(validator.rejected(), 1);
    }
}
