use std::collections::{BTreeMap, HashSet};

use relay_db::mappings::models::FieldRule;
use relay_db::records::models::{FieldValue, LocalRecord, RecordFields};

use crate::transforms::{apply_transform, is_reversible, transform_name};

/// External field name → value. Ordered, so the same input always serializes
/// to the same bytes.
pub type ExternalPayload = BTreeMap<String, FieldValue>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MappingError {
    #[error("transform `{transform}` failed on field `{field}`: {reason}")]
    Transform {
        field: String,
        transform: &'static str,
        reason: String,
    },

    #[error("external field `{0}` is mapped more than once")]
    DuplicateTarget(String),

    #[error("mapping rule has an empty {0} field name")]
    EmptyField(&'static str),
}

/// Reject rule sets that could not produce a well-defined payload.
pub fn validate_rules(rules: &[FieldRule]) -> Result<(), MappingError> {
    let mut seen = HashSet::new();
    for rule in rules {
        if rule.local_field.trim().is_empty() {
            return Err(MappingError::EmptyField("local"));
        }
        if rule.external_field.trim().is_empty() {
            return Err(MappingError::EmptyField("external"));
        }
        if !seen.insert(rule.external_field.as_str()) {
            return Err(MappingError::DuplicateTarget(rule.external_field.clone()));
        }
    }
    Ok(())
}

/// Transform one local record into the external shape.
///
/// Each rule reads exactly one source field. Unmapped local fields are dropped
/// and a missing source field maps to null.
pub fn map_record(record: &LocalRecord, rules: &[FieldRule]) -> Result<ExternalPayload, MappingError> {
    let mut payload = ExternalPayload::new();

    for rule in rules {
        let source = record.get(&rule.local_field).clone();
        let value = match &rule.transform {
            Some(transform) => {
                apply_transform(transform, source).map_err(|e| MappingError::Transform {
                    field: rule.local_field.clone(),
                    transform: transform_name(transform),
                    reason: e.reason,
                })?
            }
            None => source,
        };
        payload.insert(rule.external_field.clone(), value);
    }

    Ok(payload)
}

/// Map an external record back onto local columns for inbound syncs.
///
/// Only rules whose transform can be undone by copying are used; fields the
/// external record does not carry are left out rather than nulled.
pub fn reverse_map(external: &RecordFields, rules: &[FieldRule]) -> RecordFields {
    rules
        .iter()
        .filter(|rule| is_reversible(rule.transform.as_ref()))
        .filter_map(|rule| {
            external
                .get(&rule.external_field)
                .map(|value| (rule.local_field.clone(), value.clone()))
        })
        .collect()
}

pub fn payload_to_json(payload: &ExternalPayload) -> serde_json::Value {
    serde_json::Value::Object(
        payload
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::from(v.clone())))
            .collect(),
    )
}
