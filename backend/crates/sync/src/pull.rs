use chrono::Utc;
use relay_db::mappings::models::SyncMapping;
use relay_db::records::models::LocalRecord;
use relay_mapping::{compile_filters, matches_all, reverse_map, validate_rules};

use crate::batch::{BatchProcessor, BatchScope};
use crate::context::{
    MappingOutcome, IDENTITY_LOOKUP_FAILED, IDENTITY_PERSIST_FAILED, LOCAL_WRITE_FAILED,
    MAPPING_CONFIG_INVALID,
};
use crate::identity::ExternalIdentityLookup;

impl BatchProcessor<'_> {
    /// Inbound pass: external records → local rows. Records already linked
    /// update their local row; unlinked ones insert a row and link it.
    pub async fn pull(&self, mapping: &SyncMapping, scope: &BatchScope) -> MappingOutcome {
        let mut outcome = MappingOutcome::new(mapping.id, self.run.clone());

        let mut listed = match self
            .adapter
            .list(self.connection, &mapping.external_entity)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                outcome.mapping_failed(e.code(), e.to_string(), 1);
                return outcome;
            }
        };
        if let BatchScope::Only(ids) = scope {
            listed.retain(|r| ids.contains(&r.external_id));
        }

        if let Err(e) = validate_rules(&mapping.field_mappings) {
            outcome.mapping_failed(MAPPING_CONFIG_INVALID, e.to_string(), listed.len());
            return outcome;
        }
        let filters = match compile_filters(&mapping.filters) {
            Ok(filters) => filters,
            Err(e) => {
                outcome.mapping_failed(MAPPING_CONFIG_INVALID, e.to_string(), listed.len());
                return outcome;
            }
        };

        let mut lookup = match ExternalIdentityLookup::for_table(
            self.stores.external_ids.clone(),
            self.connection.id,
            &mapping.local_table,
        )
        .await
        {
            Ok(lookup) => lookup,
            Err(e) => {
                outcome.mapping_failed(IDENTITY_LOOKUP_FAILED, e.to_string(), listed.len());
                return outcome;
            }
        };

        tracing::info!(
            mapping_id = %mapping.id,
            table = %mapping.local_table,
            entity = %mapping.external_entity,
            listed = listed.len(),
            "pulling records"
        );

        for external in &listed {
            if outcome.should_stop() {
                tracing::info!(mapping_id = %mapping.id, "pull stopped by cancellation");
                break;
            }

            let fields = reverse_map(&external.fields, &mapping.field_mappings);
            let linked = lookup
                .resolve_external(&external.external_id)
                .map(|m| m.local_id.clone());

            let candidate = LocalRecord::new(linked.clone().unwrap_or_default(), fields);
            if !matches_all(&candidate, &filters) {
                continue;
            }

            let written = match &linked {
                Some(local_id) => self
                    .stores
                    .records
                    .update(&mapping.local_table, local_id, &candidate.fields)
                    .await
                    .map(|_| local_id.clone()),
                None => {
                    self.stores
                        .records
                        .insert(&mapping.local_table, &candidate.fields)
                        .await
                }
            };

            let local_id = match written {
                Ok(id) => id,
                Err(e) => {
                    outcome.record_failed(&external.external_id, LOCAL_WRITE_FAILED, e.to_string());
                    continue;
                }
            };

            let snapshot = serde_json::Value::Object(
                external
                    .fields
                    .iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::from(v.clone())))
                    .collect(),
            );
            if let Err(e) = lookup
                .record_success(&local_id, &external.external_id, snapshot, Utc::now())
                .await
            {
                outcome.record_failed(
                    &external.external_id,
                    IDENTITY_PERSIST_FAILED,
                    format!("stored as {local_id} but the mapping was not saved: {e}"),
                );
                continue;
            }

            if linked.is_some() {
                outcome.record_updated();
            } else {
                outcome.record_created();
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runs::RunHandle;
    use crate::testing::{connection, customer_mapping, external, MemoryDb, ScriptedAdapter};
    use relay_db::mappings::models::FilterCondition;
    use relay_db::records::models::FieldValue;
    use serde_json::json;
    use std::sync::Arc;
    use uuid::Uuid;

    #[tokio::test]
    async fn unlinked_records_are_inserted_and_linked() {
        let db = Arc::new(MemoryDb::new());
        let stores = db.stores();
        let adapter = ScriptedAdapter::new("ledger");
        adapter.set_listing(vec![external("C1", "Acme"), external("C2", "Globex")]);
        let conn = connection(Uuid::new_v4(), "ledger");
        let run = RunHandle::detached(Uuid::new_v4());
        let mapping = customer_mapping(conn.id);

        let out = BatchProcessor::new(&stores, &adapter, &conn, &run)
            .pull(&mapping, &BatchScope::All)
            .await;

        assert_eq!(out.counters.created, 2);
        assert_eq!(db.table_rows("customers").len(), 2);
        assert_eq!(db.external_id_count(conn.id, "customers"), 2);
    }

    #[tokio::test]
    async fn linked_records_update_their_row() {
        let db = Arc::new(MemoryDb::new());
        let stores = db.stores();
        let adapter = ScriptedAdapter::new("ledger");
        let conn = connection(Uuid::new_v4(), "ledger");
        let run = RunHandle::detached(Uuid::new_v4());
        let mapping = customer_mapping(conn.id);
        let processor = BatchProcessor::new(&stores, &adapter, &conn, &run);

        adapter.set_listing(vec![external("C1", "Acme")]);
        processor.pull(&mapping, &BatchScope::All).await;
        adapter.set_listing(vec![external("C1", "Acme Holdings")]);
        let out = processor.pull(&mapping, &BatchScope::All).await;

        assert_eq!(out.counters.updated, 1);
        let rows = db.table_rows("customers");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), &FieldValue::from("Acme Holdings"));
        assert_eq!(db.external_id_count(conn.id, "customers"), 1);
    }

    #[tokio::test]
    async fn filters_apply_to_the_local_shape() {
        let db = Arc::new(MemoryDb::new());
        let stores = db.stores();
        let adapter = ScriptedAdapter::new("ledger");
        adapter.set_listing(vec![external("C1", "Acme"), external("C2", "Globex")]);
        let conn = connection(Uuid::new_v4(), "ledger");
        let run = RunHandle::detached(Uuid::new_v4());
        let mut mapping = customer_mapping(conn.id);
        mapping.filters = vec![FilterCondition::new("name", "neq", json!("Globex"))];

        let out = BatchProcessor::new(&stores, &adapter, &conn, &run)
            .pull(&mapping, &BatchScope::All)
            .await;

        assert_eq!(out.counters.processed, 1);
        assert_eq!(db.table_rows("customers").len(), 1);
    }

    #[tokio::test]
    async fn scoped_pull_uses_external_ids() {
        let db = Arc::new(MemoryDb::new());
        let stores = db.stores();
        let adapter = ScriptedAdapter::new("ledger");
        adapter.set_listing(vec![external("C1", "Acme"), external("C2", "Globex")]);
        let conn = connection(Uuid::new_v4(), "ledger");
        let run = RunHandle::detached(Uuid::new_v4());
        let mapping = customer_mapping(conn.id);

        let out = BatchProcessor::new(&stores, &adapter, &conn, &run)
            .pull(&mapping, &BatchScope::Only(vec!["C2".to_string()]))
            .await;

        assert_eq!(out.counters.processed, 1);
        assert_eq!(db.table_rows("customers")[0].get("name"), &FieldValue::from("Globex"));
    }

    #[tokio::test]
    async fn listing_failure_is_a_mapping_error() {
        let db = Arc::new(MemoryDb::new());
        let stores = db.stores();
        let adapter = ScriptedAdapter::new("ledger");
        adapter.fail_listing();
        let conn = connection(Uuid::new_v4(), "ledger");
        let run = RunHandle::detached(Uuid::new_v4());

        let out = BatchProcessor::new(&stores, &adapter, &conn, &run)
            .pull(&customer_mapping(conn.id), &BatchScope::All)
            .await;

        assert_eq!(out.counters.failed, 1);
        assert_eq!(out.errors.len(), 1);
        assert!(out.errors[0].record_id.is_none());
    }
}
