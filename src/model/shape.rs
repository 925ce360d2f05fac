//! Derived request/response shapes and their structural validation.

use serde_json::{json, Map, Value};

use crate::error::{ApiError, ApiResult, FieldError};
use crate::model::DataType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Variant {
    /// Write-time shape accepted by create and update.
    Create,
    /// Response shape produced by list and get.
    Read,
}

impl Variant {
    pub fn suffix(&self) -> &'static str {
        match self {
            Variant::Create => "Create",
            Variant::Read => "Read",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Scalar(DataType),
    /// Store identity of an existing row.
    Identifier,
    /// Identity of an existing resource, or a nested payload standing in for a
    /// resource of another platform that is linked before the write.
    Reference,
    /// Non-empty vocabulary name.
    Name,
    Object(Box<Shape>),
    List(Box<FieldType>),
    Any,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub field_type: FieldType,
    pub required: bool,
    pub max_length: Option<usize>,
    pub description: &'static str,
    pub example: Option<Value>,
}

impl FieldSpec {
    pub fn new(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            field_type,
            required: false,
            max_length: None,
            description: "",
            example: None,
        }
    }
}

/// A resource kind's external shape for one [`Variant`].
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    pub kind: &'static str,
    pub variant: Variant,
    pub fields: Vec<FieldSpec>,
    /// `platform` and `platform_identifier` are null together or set together.
    pub platform_pair: bool,
}

impl Shape {
    pub fn name(&self) -> String {
        let mut chars = self.kind.chars();
        let capitalised: String = chars
            .next()
            .map(|c| c.to_uppercase().chain(chars).collect())
            .unwrap_or_default();
        format!("{}{}", capitalised.replace('_', ""), self.variant.suffix())
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check `value` against this shape, reporting every problem at once.
    pub fn validate(&self, value: &Value) -> ApiResult<()> {
        self.validate_nested(value, "")
    }

    /// Like [`Shape::validate`] for a payload embedded at `path` of another one.
    pub fn validate_nested(&self, value: &Value, path: &str) -> ApiResult<()> {
        let mut errors = Vec::new();
        self.validate_at(value, path, &mut errors);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Validation(errors))
        }
    }

    fn validate_at(&self, value: &Value, path: &str, errors: &mut Vec<FieldError>) {
        let Some(object) = value.as_object() else {
            errors.push(FieldError::new(display_path(path), "expected an object"));
            return;
        };

        for key in object.keys() {
            if self.field(key).is_none() {
                errors.push(FieldError::new(join(path, key), "unknown field"));
            }
        }

        for spec in &self.fields {
            let field_path = join(path, spec.name);
            match object.get(spec.name) {
                None | Some(Value::Null) => {
                    if spec.required {
                        errors.push(FieldError::new(field_path, "field required"));
                    }
                }
                Some(v) => validate_value(&spec.field_type, spec.max_length, v, &field_path, errors),
            }
        }

        if self.platform_pair {
            let set = |name: &str| object.get(name).is_some_and(|v| !v.is_null());
            if set("platform") != set("platform_identifier") {
                errors.push(FieldError::new(
                    join(path, "platform_identifier"),
                    "platform and platform_identifier must be set together",
                ));
            }
        }
    }

    /// JSON schema of this shape, used by the OpenAPI document.
    pub fn json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|spec| {
                let mut schema = type_schema(&spec.field_type);
                if let Some(object) = schema.as_object_mut() {
                    if !spec.description.is_empty() {
                        object.insert("description".into(), json!(spec.description));
                    }
                    if let Some(max) = spec.max_length {
                        object.insert("maxLength".into(), json!(max));
                    }
                    if let Some(example) = &spec.example {
                        object.insert("example".into(), example.clone());
                    }
                }
                (spec.name.to_string(), schema)
            })
            .collect();
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name)
            .collect();
        json!({
            "title": self.name(),
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

fn validate_value(
    field_type: &FieldType,
    max_length: Option<usize>,
    value: &Value,
    path: &str,
    errors: &mut Vec<FieldError>,
) {
    match field_type {
        FieldType::Scalar(data_type) => {
            if !data_type.accepts(value) {
                errors.push(FieldError::new(
                    path,
                    format!("expected {}", data_type.json_schema_type()),
                ));
                return;
            }
            check_length(value, max_length, path, errors);
        }
        FieldType::Identifier => {
            if !value.is_i64() {
                errors.push(FieldError::new(path, "expected an integer identifier"));
            }
        }
        FieldType::Reference => {
            if !value.is_i64() && !value.is_object() {
                errors.push(FieldError::new(
                    path,
                    "expected an integer identifier or a nested resource",
                ));
            }
        }
        FieldType::Name => match value.as_str() {
            Some(name) if !name.trim().is_empty() => check_length(value, max_length, path, errors),
            _ => errors.push(FieldError::new(path, "expected a non-empty name")),
        },
        FieldType::Object(shape) => shape.validate_at(value, path, errors),
        FieldType::List(inner) => match value.as_array() {
            Some(items) => {
                for (index, item) in items.iter().enumerate() {
                    let item_path = format!("{path}[{index}]");
                    validate_value(inner, max_length, item, &item_path, errors);
                }
            }
            None => errors.push(FieldError::new(path, "expected a list")),
        },
        FieldType::Any => {}
    }
}

fn check_length(value: &Value, max_length: Option<usize>, path: &str, errors: &mut Vec<FieldError>) {
    if let (Some(max), Some(text)) = (max_length, value.as_str()) {
        if text.chars().count() > max {
            errors.push(FieldError::new(
                path,
                format!("ensure this value has at most {max} characters"),
            ));
        }
    }
}

fn type_schema(field_type: &FieldType) -> Value {
    match field_type {
        FieldType::Scalar(DataType::Date) => json!({ "type": "string", "format": "date" }),
        FieldType::Scalar(data_type) => json!({ "type": data_type.json_schema_type() }),
        FieldType::Identifier => json!({ "type": "integer" }),
        FieldType::Reference => json!({ "oneOf": [{ "type": "integer" }, { "type": "object" }] }),
        FieldType::Name => json!({ "type": "string", "minLength": 1 }),
        FieldType::Object(shape) => shape.json_schema(),
        FieldType::List(inner) => json!({ "type": "array", "items": type_schema(inner) }),
        FieldType::Any => json!({}),
    }
}

fn join(path: &str, field: &str) -> String {
    if path.is_empty() {
        field.to_string()
    } else {
        format!("{path}.{field}")
    }
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "body".to_string()
    } else {
        path.to_string()
    }
}
