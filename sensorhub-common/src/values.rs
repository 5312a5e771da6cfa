//! Measurement data types and coerced field values
//!
//! Raw reading payloads are free-form JSON. Declared fields are coerced into the
//! closed [`FieldValue`] set, so every `match` over a data type is exhaustive.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Declared data type of a measurement field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Float,
    String,
    Boolean,
    Array,
    Object,
}

impl DataType {
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Float => "float",
            DataType::String => "string",
            DataType::Boolean => "boolean",
            DataType::Array => "array",
            DataType::Object => "object",
        }
    }

    /// Only float fields carry numeric bounds, range checks and value indexes
    pub fn is_numeric(self) -> bool {
        matches!(self, DataType::Float)
    }

    /// Native SQLite column type used for this data type
    pub fn sql_type(self) -> &'static str {
        match self {
            DataType::Float => "REAL",
            DataType::String => "TEXT",
            DataType::Boolean => "INTEGER",
            // JSON text
            DataType::Array | DataType::Object => "TEXT",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "float" | "number" => Ok(DataType::Float),
            "string" | "text" => Ok(DataType::String),
            "boolean" | "bool" => Ok(DataType::Boolean),
            "array" => Ok(DataType::Array),
            "object" => Ok(DataType::Object),
            other => Err(Error::InvalidInput(format!("Unknown data type: {}", other))),
        }
    }
}

/// A reading value after coercion to its declared data type
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Float(f64),
    Text(String),
    Bool(bool),
    Array(Vec<Value>),
    Object(Map<String, Value>),
}

impl FieldValue {
    pub fn data_type(&self) -> DataType {
        match self {
            FieldValue::Float(_) => DataType::Float,
            FieldValue::Text(_) => DataType::String,
            FieldValue::Bool(_) => DataType::Boolean,
            FieldValue::Array(_) => DataType::Array,
            FieldValue::Object(_) => DataType::Object,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Float(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Array(items) => Value::Array(items.clone()),
            FieldValue::Object(map) => Value::Object(map.clone()),
        }
    }
}

/// Coerce a raw JSON value to `data_type`
///
/// Returns `None` when the value cannot represent the type. `null` is handled
/// by the caller as "absent" and never reaches this function.
pub fn coerce(data_type: DataType, raw: &Value) -> Option<FieldValue> {
    match data_type {
        DataType::Float => coerce_float(raw).map(FieldValue::Float),
        DataType::String => match raw {
            Value::String(s) => Some(FieldValue::Text(s.clone())),
            Value::Number(n) => Some(FieldValue::Text(n.to_string())),
            Value::Bool(b) => Some(FieldValue::Text(b.to_string())),
            _ => None,
        },
        DataType::Boolean => coerce_bool(raw).map(FieldValue::Bool),
        DataType::Array => match structured(raw)? {
            Value::Array(items) => Some(FieldValue::Array(items)),
            _ => None,
        },
        DataType::Object => match structured(raw)? {
            Value::Object(map) => Some(FieldValue::Object(map)),
            _ => None,
        },
    }
}

fn coerce_float(raw: &Value) -> Option<f64> {
    let parsed = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

fn coerce_bool(raw: &Value) -> Option<bool> {
    match raw {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_f64() {
            Some(v) if v == 0.0 => Some(false),
            Some(v) if v == 1.0 => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Structured values arrive either as JSON or as a string holding JSON
fn structured(raw: &Value) -> Option<Value> {
    match raw {
        Value::Array(_) | Value::Object(_) => Some(raw.clone()),
        Value::String(s) => serde_json::from_str::<Value>(s).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_float_coercion() {
        assert_eq!(coerce(DataType::Float, &json!(21.5)), Some(FieldValue::Float(21.5)));
        assert_eq!(coerce(DataType::Float, &json!(" 3.25 ")), Some(FieldValue::Float(3.25)));
        assert_eq!(coerce(DataType::Float, &json!(7)), Some(FieldValue::Float(7.0)));
        assert_eq!(coerce(DataType::Float, &json!("warm")), None);
        assert_eq!(coerce(DataType::Float, &json!("NaN")), None);
        assert_eq!(coerce(DataType::Float, &json!(true)), None);
    }

    #[test]
    fn test_string_coercion_passes_scalars_through() {
        assert_eq!(
            coerce(DataType::String, &json!("on")),
            Some(FieldValue::Text("on".into()))
        );
        assert_eq!(
            coerce(DataType::String, &json!(12)),
            Some(FieldValue::Text("12".into()))
        );
        assert_eq!(coerce(DataType::String, &json!([1])), None);
    }

    #[test]
    fn test_boolean_coercion() {
        assert_eq!(coerce(DataType::Boolean, &json!(true)), Some(FieldValue::Bool(true)));
        assert_eq!(coerce(DataType::Boolean, &json!("FALSE")), Some(FieldValue::Bool(false)));
        assert_eq!(coerce(DataType::Boolean, &json!(1)), Some(FieldValue::Bool(true)));
        assert_eq!(coerce(DataType::Boolean, &json!(2)), None);
        assert_eq!(coerce(DataType::Boolean, &json!("yes")), None);
    }

    #[test]
    fn test_structured_coercion() {
        assert_eq!(
            coerce(DataType::Array, &json!([1, 2])),
            Some(FieldValue::Array(vec![json!(1), json!(2)]))
        );
        assert_eq!(
            coerce(DataType::Array, &json!("[1, 2]")),
            Some(FieldValue::Array(vec![json!(1), json!(2)]))
        );
        assert_eq!(coerce(DataType::Array, &json!({"a": 1})), None);
        assert!(matches!(
            coerce(DataType::Object, &json!({"a": 1})),
            Some(FieldValue::Object(_))
        ));
        assert_eq!(coerce(DataType::Object, &json!("not json")), None);
    }

    #[test]
    fn test_data_type_parsing_and_sql_mapping() {
        assert_eq!("Float".parse::<DataType>().unwrap(), DataType::Float);
        assert_eq!("bool".parse::<DataType>().unwrap(), DataType::Boolean);
        assert!("decimal".parse::<DataType>().is_err());
        assert_eq!(DataType::Float.sql_type(), "REAL");
        assert_eq!(DataType::Object.sql_type(), "TEXT");
        assert!(DataType::Float.is_numeric());
        assert!(!DataType::Boolean.is_numeric());
    }

    #[test]
    fn test_field_value_json() {
        assert_eq!(FieldValue::Float(1.5).to_json(), json!(1.5));
        assert_eq!(FieldValue::Bool(false).to_json(), json!(false));
        assert_eq!(
            serde_json::to_value(FieldValue::Text("x".into())).unwrap(),
            json!("x")
        );
    }
}
