//! Typed payload schemas with lenient scalar coercion.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use super::error::{FieldViolation, SchemaError};

pub type JsonMap = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
            FieldType::Any => "any",
        }
    }

    /// Accept `value` as this type, coercing string scalars where unambiguous.
    fn coerce(self, value: &Value) -> Result<Value, String> {
        let mismatch = || format!("expected {}, got {}", self.as_str(), kind_of(value));
        match (self, value) {
            (FieldType::Any, v) => Ok(v.clone()),
            (FieldType::String, Value::String(_)) => Ok(value.clone()),
            (FieldType::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => {
                Ok(value.clone())
            }
            (FieldType::Integer, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| mismatch()),
            (FieldType::Number, Value::Number(_)) => Ok(value.clone()),
            (FieldType::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(mismatch),
            (FieldType::Boolean, Value::Bool(_)) => Ok(value.clone()),
            (FieldType::Boolean, Value::String(s)) => match s.trim() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(mismatch()),
            },
            (FieldType::Array, Value::Array(_)) => Ok(value.clone()),
            (FieldType::Object, Value::Object(_)) => Ok(value.clone()),
            _ => Err(mismatch()),
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn default_required() -> bool {
    true
}

fn default_allow_extra() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default = "default_required")]
    pub required: bool,
    /// Filled in when an optional field is absent or null.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// Shape of a topic's `data` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadSchema {
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default = "default_allow_extra")]
    pub allow_extra: bool,
}

impl Default for PayloadSchema {
    fn default() -> Self {
        Self::any()
    }
}

impl PayloadSchema {
    /// No declared fields; any object is accepted.
    pub fn any() -> Self {
        Self {
            fields: Vec::new(),
            allow_extra: true,
        }
    }

    pub fn required(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            field_type,
            required: true,
            default: None,
        });
        self
    }

    pub fn optional(
        mut self,
        name: impl Into<String>,
        field_type: FieldType,
        default: Option<Value>,
    ) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            field_type,
            required: false,
            default,
        });
        self
    }

    /// Reject fields not declared in the schema.
    pub fn strict(mut self) -> Self {
        self.allow_extra = false;
        self
    }

    /// Validate `data`, returning the coerced payload.
    pub fn validate(&self, topic: &str, data: &Value) -> Result<JsonMap, SchemaError> {
        let Value::Object(input) = data else {
            return Err(SchemaError {
                topic: topic.to_string(),
                violations: vec![FieldViolation {
                    field: "$".to_string(),
                    reason: format!("payload must be an object, got {}", kind_of(data)),
                }],
            });
        };

        let mut out = JsonMap::new();
        let mut violations = Vec::new();

        for field in &self.fields {
            match input.get(&field.name).filter(|v| !v.is_null()) {
                Some(value) => match field.field_type.coerce(value) {
                    Ok(coerced) => {
                        out.insert(field.name.clone(), coerced);
                    }
                    Err(reason) => violations.push(FieldViolation {
                        field: field.name.clone(),
                        reason,
                    }),
                },
                None => {
                    if let Some(default) = &field.default {
                        out.insert(field.name.clone(), default.clone());
                    } else if field.required {
                        violations.push(FieldViolation {
                            field: field.name.clone(),
                            reason: "required field missing".to_string(),
                        });
                    }
                }
            }
        }

        for (key, value) in input {
            if self.fields.iter().any(|f| &f.name == key) {
                continue;
            }
            if self.allow_extra {
                out.insert(key.clone(), value.clone());
            } else {
                violations.push(FieldViolation {
                    field: key.clone(),
                    reason: "unknown field".to_string(),
                });
            }
        }

        if violations.is_empty() {
            Ok(out)
        } else {
            Err(SchemaError {
                topic: topic.to_string(),
                violations,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request_schema() -> PayloadSchema {
        PayloadSchema::any()
            .required("files_changed", FieldType::Integer)
            .optional("intent", FieldType::String, Some(json!("feature")))
            .optional("labels", FieldType::Array, Some(json!([])))
            .optional("urgent", FieldType::Boolean, None)
    }

    #[test]
    fn valid_payload_gets_defaults() {
        let out = request_schema()
            .validate("review.request", &json!({"files_changed": 3}))
            .unwrap();
        assert_eq!(out["files_changed"], json!(3));
        assert_eq!(out["intent"], json!("feature"));
        assert_eq!(out["labels"], json!([]));
        assert!(!out.contains_key("urgent"));
    }

    #[test]
    fn string_scalars_are_coerced() {
        let schema = request_schema().optional("ratio", FieldType::Number, None);
        let out = schema
            .validate(
                "t",
                &json!({"files_changed": "120", "urgent": "true", "ratio": "0.5"}),
            )
            .unwrap();
        assert_eq!(out["files_changed"], json!(120));
        assert_eq!(out["urgent"], json!(true));
        assert_eq!(out["ratio"], json!(0.5));
    }

    #[test]
    fn all_violations_are_reported() {
        let err = request_schema()
            .validate("t", &json!({"labels": "security", "urgent": "maybe"}))
            .unwrap_err();
        let fields: Vec<_> = err.violations.iter().map(|v| v.field.as_str()).collect();
        assert_eq!(fields, vec!["files_changed", "labels", "urgent"]);
    }

    #[test]
    fn strict_schema_rejects_unknown_fields() {
        let schema = PayloadSchema::any()
            .required("id", FieldType::String)
            .strict();
        let err = schema
            .validate("t", &json!({"id": "a", "extra": 1}))
            .unwrap_err();
        assert_eq!(err.violations[0].field, "extra");

        let lenient = PayloadSchema::any().required("id", FieldType::String);
        let out = lenient.validate("t", &json!({"id": "a", "extra": 1})).unwrap();
        assert_eq!(out["extra"], json!(1));
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let err = PayloadSchema::any().validate("t", &json!([1, 2])).unwrap_err();
        assert_eq!(err.violations[0].field, "$");
    }

    #[test]
    fn schema_deserializes_from_toml() {
        let schema: PayloadSchema = toml::from_str(
            r#"
            allow_extra = false
            [[fields]]
            name = "files_changed"
            type = "integer"
            [[fields]]
            name = "intent"
            type = "string"
            required = false
            "#,
        )
        .unwrap();
        assert_eq!(schema.fields.len(), 2);
        assert!(!schema.fields[1].required);
        assert!(!schema.allow_extra);
    }
}
