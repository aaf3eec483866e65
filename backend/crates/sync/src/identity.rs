use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use relay_common::error::RelayResult;
use relay_db::external_ids::models::{ExternalIdMapping, ExternalIdUpsert};
use relay_db::external_ids::repositories::ExternalIdRepository;
use uuid::Uuid;

use crate::adapter::PushIntent;

/// Local id ↔ external id associations for one (connection, table), loaded
/// once per batch and kept current as the batch writes.
pub struct ExternalIdentityLookup {
    repo: Arc<dyn ExternalIdRepository>,
    connection_id: Uuid,
    local_table: String,
    by_local: HashMap<String, ExternalIdMapping>,
    local_by_external: HashMap<String, String>,
}

impl ExternalIdentityLookup {
    fn from_rows(
        repo: Arc<dyn ExternalIdRepository>,
        connection_id: Uuid,
        local_table: &str,
        rows: Vec<ExternalIdMapping>,
    ) -> Self {
        let mut lookup = Self {
            repo,
            connection_id,
            local_table: local_table.to_string(),
            by_local: HashMap::with_capacity(rows.len()),
            local_by_external: HashMap::with_capacity(rows.len()),
        };
        for row in rows {
            lookup.remember(row);
        }
        lookup
    }

    /// Snapshot the mappings of the given candidate ids in one query.
    pub async fn for_records(
        repo: Arc<dyn ExternalIdRepository>,
        connection_id: Uuid,
        local_table: &str,
        local_ids: &[String],
    ) -> RelayResult<Self> {
        let rows = if local_ids.is_empty() {
            Vec::new()
        } else {
            repo.find_by_local_ids(connection_id, local_table, local_ids)
                .await?
        };
        Ok(Self::from_rows(repo, connection_id, local_table, rows))
    }

    /// Snapshot every mapping of the table, for inbound batches that resolve by
    /// external id.
    pub async fn for_table(
        repo: Arc<dyn ExternalIdRepository>,
        connection_id: Uuid,
        local_table: &str,
    ) -> RelayResult<Self> {
        let rows = repo.list_for_table(connection_id, local_table).await?;
        Ok(Self::from_rows(repo, connection_id, local_table, rows))
    }

    fn remember(&mut self, row: ExternalIdMapping) {
        if let Some(previous) = self.by_local.get(&row.local_id) {
            if previous.external_id != row.external_id {
                self.local_by_external.remove(&previous.external_id);
            }
        }
        self.local_by_external
            .insert(row.external_id.clone(), row.local_id.clone());
        self.by_local.insert(row.local_id.clone(), row);
    }

    pub fn resolve(&self, local_id: &str) -> Option<&ExternalIdMapping> {
        self.by_local.get(local_id)
    }

    pub fn resolve_external(&self, external_id: &str) -> Option<&ExternalIdMapping> {
        let local_id = self.local_by_external.get(external_id)?;
        self.by_local.get(local_id)
    }

    /// Create when the record has never been pushed, otherwise update the
    /// stored external record.
    pub fn intent_for(&self, local_id: &str) -> PushIntent {
        match self.resolve(local_id) {
            Some(mapping) => PushIntent::Update {
                external_id: mapping.external_id.clone(),
            },
            None => PushIntent::Create,
        }
    }

    /// Persist the association after a successful external call.
    pub async fn record_success(
        &mut self,
        local_id: &str,
        external_id: &str,
        payload: serde_json::Value,
        synced_at: DateTime<Utc>,
    ) -> RelayResult<&ExternalIdMapping> {
        let row = self
            .repo
            .upsert(&ExternalIdUpsert {
                connection_id: self.connection_id,
                local_table: self.local_table.clone(),
                local_id: local_id.to_string(),
                external_id: external_id.to_string(),
                payload: Some(payload),
                synced_at,
            })
            .await?;

        let key = row.local_id.clone();
        self.remember(row);
        Ok(&self.by_local[&key])
    }

    pub fn len(&self) -> usize {
        self.by_local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_local.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryDb;
    use serde_json::json;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn unknown_records_resolve_to_create() {
        let db = Arc::new(MemoryDb::new());
        let lookup =
            ExternalIdentityLookup::for_records(db, Uuid::new_v4(), "bookings", &ids(&["b-1"]))
                .await
                .unwrap();
        assert!(lookup.is_empty());
        assert_eq!(lookup.intent_for("b-1"), PushIntent::Create);
    }

    #[tokio::test]
    async fn second_sync_updates_the_same_mapping() {
        let db = Arc::new(MemoryDb::new());
        let conn = Uuid::new_v4();

        let mut lookup =
            ExternalIdentityLookup::for_records(db.clone(), conn, "bookings", &ids(&["b-1"]))
                .await
                .unwrap();
        lookup
            .record_success("b-1", "EXT-1", json!({"v": 1}), Utc::now())
            .await
            .unwrap();
        assert_eq!(
            lookup.intent_for("b-1"),
            PushIntent::Update {
                external_id: "EXT-1".to_string()
            }
        );

        let mut fresh =
            ExternalIdentityLookup::for_records(db.clone(), conn, "bookings", &ids(&["b-1"]))
                .await
                .unwrap();
        let row = fresh
            .record_success("b-1", "EXT-1", json!({"v": 2}), Utc::now())
            .await
            .unwrap();
        assert_eq!(row.last_synced_payload, Some(json!({"v": 2})));
        assert_eq!(db.external_id_count(conn, "bookings"), 1);
    }

    #[tokio::test]
    async fn snapshot_is_scoped_to_connection_and_table() {
        let db = Arc::new(MemoryDb::new());
        let conn = Uuid::new_v4();
        let mut lookup =
            ExternalIdentityLookup::for_records(db.clone(), conn, "bookings", &ids(&["1"]))
                .await
                .unwrap();
        lookup
            .record_success("1", "EXT-1", json!({}), Utc::now())
            .await
            .unwrap();

        let other_table =
            ExternalIdentityLookup::for_records(db.clone(), conn, "invoices", &ids(&["1"]))
                .await
                .unwrap();
        assert!(other_table.resolve("1").is_none());

        let other_conn =
            ExternalIdentityLookup::for_records(db, Uuid::new_v4(), "bookings", &ids(&["1"]))
                .await
                .unwrap();
        assert!(other_conn.resolve("1").is_none());
    }

    #[tokio::test]
    async fn reverse_resolution_follows_rekeys() {
        let db = Arc::new(MemoryDb::new());
        let conn = Uuid::new_v4();
        let mut lookup = ExternalIdentityLookup::for_table(db, conn, "customers")
            .await
            .unwrap();

        lookup
            .record_success("7", "C-OLD", json!({}), Utc::now())
            .await
            .unwrap();
        lookup
            .record_success("7", "C-NEW", json!({}), Utc::now())
            .await
            .unwrap();

        assert!(lookup.resolve_external("C-OLD").is_none());
        assert_eq!(lookup.resolve_external("C-NEW").map(|m| m.local_id.as_str()), Some("7"));
        assert_eq!(lookup.len(), 1);
    }
}
