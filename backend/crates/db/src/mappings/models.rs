use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::records::models::FieldValue;

/// Value conversion applied to one mapped field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldTransform {
    Uppercase,
    Lowercase,
    Trim,
    ToString,
    ToNumber,
    ToBoolean,
    /// Replace null with a fixed value.
    Default { value: FieldValue },
    Prefix { value: String },
    /// Keep the `YYYY-MM-DD` part of a timestamp string.
    DateOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    pub local_field: String,
    pub external_field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<FieldTransform>,
}

impl FieldRule {
    pub fn new(local_field: &str, external_field: &str) -> Self {
        Self {
            local_field: local_field.to_string(),
            external_field: external_field.to_string(),
            transform: None,
        }
    }

    pub fn with_transform(mut self, transform: FieldTransform) -> Self {
        self.transform = Some(transform);
        self
    }
}

/// One predicate of a mapping's scope. The operator stays a string here so an
/// unknown operator is reported when the filter is compiled, not silently
/// dropped while decoding configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    pub field: String,
    pub operator: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl FilterCondition {
    pub fn new(field: &str, operator: &str, value: serde_json::Value) -> Self {
        Self {
            field: field.to_string(),
            operator: operator.to_string(),
            value,
        }
    }
}

/// Declared correspondence between one local table and one external entity type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMapping {
    pub id: Uuid,
    pub connection_id: Uuid,
    pub name: String,
    pub local_table: String,
    pub external_entity: String,
    pub field_mappings: Vec<FieldRule>,
    pub filters: Vec<FilterCondition>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
