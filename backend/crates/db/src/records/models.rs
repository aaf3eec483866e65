use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// A scalar column value as seen by the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(Number),
    Text(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Text(_) => "string",
        }
    }

    pub fn from_f64(value: f64) -> Option<Self> {
        Number::from_f64(value).map(Self::Number)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Number(Number::from(value))
    }
}

impl From<FieldValue> for Value {
    fn from(value: FieldValue) -> Self {
        match value {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => Value::Bool(b),
            FieldValue::Number(n) => Value::Number(n),
            FieldValue::Text(s) => Value::String(s),
        }
    }
}

impl TryFrom<Value> for FieldValue {
    type Error = RecordDecodeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Null => Ok(Self::Null),
            Value::Bool(b) => Ok(Self::Bool(b)),
            Value::Number(n) => Ok(Self::Number(n)),
            Value::String(s) => Ok(Self::Text(s)),
            Value::Array(_) | Value::Object(_) => Err(RecordDecodeError::NonScalar {
                field: String::new(),
            }),
        }
    }
}

/// Field name → value, ordered by name so serialization is stable.
pub type RecordFields = BTreeMap<String, FieldValue>;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RecordDecodeError {
    #[error("row is not a JSON object")]
    NotAnObject,

    #[error("row has no usable `{0}` column")]
    MissingId(String),

    #[error("column `{field}` holds a nested value; only scalars can be synced")]
    NonScalar { field: String },
}

static NULL: FieldValue = FieldValue::Null;

/// One local row pulled for a sync batch. Lives only for the duration of the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRecord {
    pub id: String,
    pub fields: RecordFields,
}

impl LocalRecord {
    pub fn new(id: impl Into<String>, fields: RecordFields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Missing fields read as null.
    pub fn get(&self, field: &str) -> &FieldValue {
        self.fields.get(field).unwrap_or(&NULL)
    }

    /// Decode a row rendered with `row_to_json`. The id column is kept in
    /// `fields` too, so mappings may export it.
    pub fn from_json_row(row: Value, id_column: &str) -> Result<Self, RecordDecodeError> {
        let Value::Object(map) = row else {
            return Err(RecordDecodeError::NotAnObject);
        };

        let id = match map.get(id_column) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(RecordDecodeError::MissingId(id_column.to_string())),
        };

        let mut fields = RecordFields::new();
        for (name, value) in map {
            let decoded = FieldValue::try_from(value).map_err(|_| RecordDecodeError::NonScalar {
                field: name.clone(),
            })?;
            fields.insert(name, decoded);
        }

        Ok(Self { id, fields })
    }
}
