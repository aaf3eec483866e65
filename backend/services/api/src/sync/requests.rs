use relay_db::sync::models::SyncType;
use serde::Deserialize;
use uuid::Uuid;

fn default_sync_type() -> SyncType {
    SyncType::FullSync
}

#[derive(Debug, Deserialize)]
pub struct TriggerSyncRequest {
    /// Sync only this mapping; all active mappings when absent.
    pub mapping_id: Option<Uuid>,
    #[serde(default = "default_sync_type")]
    pub sync_type: SyncType,
}
