use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Scalar column types a resource kind can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Integer,
    Number,
    Boolean,
    /// ISO 8601 date (`2024-01-31`) or RFC 3339 timestamp.
    Date,
    /// Arbitrary JSON stored as-is.
    Object,
}

impl DataType {
    pub fn json_schema_type(&self) -> &'static str {
        match self {
            DataType::String | DataType::Date => "string",
            DataType::Integer => "integer",
            DataType::Number => "number",
            DataType::Boolean => "boolean",
            DataType::Object => "object",
        }
    }

    /// Whether `value` is an acceptable representation of this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            DataType::String => value.is_string(),
            DataType::Integer => value.is_i64() || value.is_u64(),
            DataType::Number => value.is_number(),
            DataType::Boolean => value.is_boolean(),
            DataType::Date => value.as_str().is_some_and(is_date),
            DataType::Object => true,
        }
    }
}

fn is_date(raw: &str) -> bool {
    chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok()
        || chrono::DateTime::parse_from_rfc3339(raw).is_ok()
}

/// Declaration of one scalar field of a resource kind.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDef {
    pub name: &'static str,
    pub data_type: DataType,
    pub required: bool,
    pub max_length: Option<usize>,
    pub description: &'static str,
    pub example: Option<Value>,
}

impl PropertyDef {
    pub fn new(name: &'static str, data_type: DataType) -> Self {
        Self {
            name,
            data_type,
            required: false,
            max_length: None,
            description: "",
            example: None,
        }
    }

    pub fn string(name: &'static str, max_length: usize) -> Self {
        Self::new(name, DataType::String).max_length(max_length)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn describe(mut self, description: &'static str, example: Value) -> Self {
        self.description = description;
        self.example = Some(example);
        self
    }
}
