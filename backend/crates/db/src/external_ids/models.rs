use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persistent link between a local row and its record in the external system.
/// At most one exists per (connection_id, local_table, local_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalIdMapping {
    pub id: Uuid,
    pub connection_id: Uuid,
    pub local_table: String,
    pub local_id: String,
    pub external_id: String,
    pub last_synced_payload: Option<serde_json::Value>,
    pub last_synced_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values written by an upsert; identity and timestamps are owned by the store.
#[derive(Debug, Clone)]
pub struct ExternalIdUpsert {
    pub connection_id: Uuid,
    pub local_table: String,
    pub local_id: String,
    pub external_id: String,
    pub payload: Option<serde_json::Value>,
    pub synced_at: DateTime<Utc>,
}
