//! Declared argument schemas for tools

use serde_json::{Map, Value, json};

/// JSON type a field must have
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
}

impl FieldType {
    const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
        }
    }
}

/// One declared argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub description: String,
    pub required: bool,
}

/// Why a set of arguments was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaViolation {
    #[error("arguments must be a JSON object")]
    NotAnObject,

    #[error("missing required field `{0}`")]
    MissingField(String),

    #[error("field `{field}` must be a {expected}")]
    WrongType { field: String, expected: &'static str },
}

/// Object schema for a tool's arguments
///
/// Undeclared fields are ignored; a `null` counts as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgumentSchema {
    fields: Vec<FieldSpec>,
}

impl ArgumentSchema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn required(mut self, name: &str, field_type: FieldType, description: &str) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            field_type,
            description: description.to_string(),
            required: true,
        });
        self
    }

    #[must_use]
    pub fn optional(mut self, name: &str, field_type: FieldType, description: &str) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            field_type,
            description: description.to_string(),
            required: false,
        });
        self
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Check `arguments` against the declared fields
    ///
    /// # Errors
    ///
    /// Returns the first violation found
    pub fn validate(&self, arguments: &Value) -> Result<(), SchemaViolation> {
        let object = arguments.as_object().ok_or(SchemaViolation::NotAnObject)?;

        for field in &self.fields {
            match object.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        return Err(SchemaViolation::MissingField(field.name.clone()));
                    }
                }
                Some(value) if !field.field_type.matches(value) => {
                    return Err(SchemaViolation::WrongType {
                        field: field.name.clone(),
                        expected: field.field_type.as_str(),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Render as a JSON Schema object for the engine's tool declarations
    #[must_use]
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|f| {
                (
                    f.name.clone(),
                    json!({ "type": f.field_type.as_str(), "description": f.description }),
                )
            })
            .collect();
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> ArgumentSchema {
        ArgumentSchema::new()
            .required("location", FieldType::String, "Where")
            .optional("days", FieldType::Integer, "How many days")
    }

    #[test]
    fn accepts_valid_arguments() {
        assert_eq!(schema().validate(&json!({ "location": "Paris" })), Ok(()));
        assert_eq!(schema().validate(&json!({ "location": "Paris", "days": 3 })), Ok(()));
        assert_eq!(
            schema().validate(&json!({ "location": "Paris", "days": null, "extra": true })),
            Ok(())
        );
    }

    #[test]
    fn rejects_missing_required_field() {
        assert_eq!(
            schema().validate(&json!({})),
            Err(SchemaViolation::MissingField("location".into()))
        );
        assert_eq!(
            schema().validate(&json!({ "location": null })),
            Err(SchemaViolation::MissingField("location".into()))
        );
    }

    #[test]
    fn rejects_wrong_types() {
        assert_eq!(
            schema().validate(&json!({ "location": 42 })),
            Err(SchemaViolation::WrongType {
                field: "location".into(),
                expected: "string"
            })
        );
        assert!(matches!(
            schema().validate(&json!({ "location": "Paris", "days": 1.5 })),
            Err(SchemaViolation::WrongType { .. })
        ));
        assert_eq!(schema().validate(&json!(["Paris"])), Err(SchemaViolation::NotAnObject));
    }

    #[test]
    fn renders_json_schema() {
        let rendered = schema().to_json_schema();
        assert_eq!(rendered["type"], "object");
        assert_eq!(rendered["properties"]["location"]["type"], "string");
        assert_eq!(rendered["required"], json!(["location"]));
    }
}
