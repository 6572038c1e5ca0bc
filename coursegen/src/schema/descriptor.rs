//! Declared output shapes.

use serde::{Deserialize, Serialize};

/// The structural shape a stage output must have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchemaDescriptor {
    /// A JSON object. Fields not listed are allowed and ignored.
    Object {
        /// Declared fields.
        fields: Vec<FieldSchema>,
    },
    /// A JSON array whose items all match `items`.
    Array {
        /// Item schema.
        items: Box<SchemaDescriptor>,
        /// Minimum number of items.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_items: Option<usize>,
    },
    /// A JSON string.
    String,
    /// An integer-typed JSON number. `2.0` does not qualify.
    Integer,
    /// A non-negative integer that fits in 32 bits, such as an order value.
    Unsigned,
    /// Any JSON number.
    Number,
    /// A JSON boolean.
    Boolean,
    /// A JSON string drawn from a fixed set.
    Enum {
        /// Allowed values.
        values: Vec<String>,
    },
    /// Anything, including null.
    Any,
}

/// One field of an object schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Field name.
    pub name: String,
    /// Field shape.
    pub schema: SchemaDescriptor,
    /// Whether the field must be present and non-null.
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl FieldSchema {
    /// A field that must be present.
    #[must_use]
    pub fn required(name: impl Into<String>, schema: SchemaDescriptor) -> Self {
        Self {
            name: name.into(),
            schema,
            required: true,
        }
    }

    /// A field that may be absent or null.
    #[must_use]
    pub fn optional(name: impl Into<String>, schema: SchemaDescriptor) -> Self {
        Self {
            name: name.into(),
            schema,
            required: false,
        }
    }
}

impl SchemaDescriptor {
    /// An object with the given fields.
    #[must_use]
    pub fn object(fields: impl IntoIterator<Item = FieldSchema>) -> Self {
        Self::Object {
            fields: fields.into_iter().collect(),
        }
    }

    /// An array of `items`.
    #[must_use]
    pub fn array(items: Self) -> Self {
        Self::Array {
            items: Box::new(items),
            min_items: None,
        }
    }

    /// An array of at least `min` `items`.
    #[must_use]
    pub fn array_min(items: Self, min: usize) -> Self {
        Self::Array {
            items: Box::new(items),
            min_items: Some(min),
        }
    }

    /// A string enum.
    #[must_use]
    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Enum {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Name of the expected JSON type, used in mismatch messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Object { .. } => "object",
            Self::Array { .. } => "array",
            Self::String | Self::Enum { .. } => "string",
            Self::Integer => "integer",
            Self::Unsigned => "unsigned integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Any => "any",
        }
    }

    /// Renders the descriptor as a JSON Schema document for model providers
    /// that accept structured-output constraints.
    #[must_use]
    pub fn to_json_schema(&self) -> serde_json::Value {
        use serde_json::{json, Map, Value};

        match self {
            Self::Object { fields } => {
                let mut properties = Map::new();
                let mut required = Vec::new();
                for field in fields {
                    properties.insert(field.name.clone(), field.schema.to_json_schema());
                    if field.required {
                        required.push(Value::String(field.name.clone()));
                    }
                }
                json!({ "type": "object", "properties": properties, "required": required })
            }
            Self::Array { items, min_items } => {
                let mut schema = json!({ "type": "array", "items": items.to_json_schema() });
                if let Some(min) = min_items {
                    schema["minItems"] = json!(min);
                }
                schema
            }
            Self::Enum { values } => json!({ "type": "string", "enum": values }),
            Self::Unsigned => json!({ "type": "integer", "minimum": 0, "maximum": u32::MAX }),
            Self::Any => json!({}),
            other => json!({ "type": other.type_name() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_descriptor_serde() {
        let schema = SchemaDescriptor::object([
            FieldSchema::required("title", SchemaDescriptor::String),
            FieldSchema::optional("tags", SchemaDescriptor::array(SchemaDescriptor::String)),
        ]);

        let json = serde_json::to_value(&schema).unwrap();
        assert_eq!(json["type"], "object");
        assert_eq!(json["fields"][0]["name"], "title");

        let back: SchemaDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(back, schema);
    }

    #[test]
    fn test_required_defaults_to_true() {
        let field: FieldSchema =
            serde_json::from_value(json!({"name": "order", "schema": {"type": "integer"}})).unwrap();
        assert!(field.required);
    }

    #[test]
    fn test_to_json_schema() {
        let schema = SchemaDescriptor::object([
            FieldSchema::required("kind", SchemaDescriptor::enumeration(["quiz", "essay"])),
            FieldSchema::optional("items", SchemaDescriptor::array_min(SchemaDescriptor::Integer, 1)),
        ]);

        let rendered = schema.to_json_schema();
        assert_eq!(rendered["required"], json!(["kind"]));
        assert_eq!(rendered["properties"]["kind"]["enum"], json!(["quiz", "essay"]));
        assert_eq!(rendered["properties"]["items"]["minItems"], json!(1));
        assert_eq!(rendered["properties"]["items"]["items"]["type"], "integer");

        let order = SchemaDescriptor::Unsigned.to_json_schema();
        assert_eq!(order, json!({ "type": "integer", "minimum": 0, "maximum": 4_294_967_295_u32 }));
    }
}
