use chrono::Utc;
use relay_db::connections::models::Connection;
use relay_db::mappings::models::SyncMapping;
use relay_db::records::models::LocalRecord;
use relay_mapping::{compile_filters, map_record, matches_all, payload_to_json, validate_rules};

use crate::adapter::{ExternalApiAdapter, PushIntent, PushRequest};
use crate::context::{
    MappingOutcome, IDENTITY_LOOKUP_FAILED, IDENTITY_PERSIST_FAILED, MAPPING_CONFIG_INVALID,
    SOURCE_UNAVAILABLE, TRANSFORM_FAILED,
};
use crate::controller::SyncStores;
use crate::identity::ExternalIdentityLookup;
use crate::runs::RunHandle;

/// Which records of a mapping a batch considers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchScope {
    All,
    /// Only these ids; used by retries. Local ids for push, external ids for pull.
    Only(Vec<String>),
}

/// Runs one mapping of one connection against the external system.
pub struct BatchProcessor<'a> {
    pub(crate) stores: &'a SyncStores,
    pub(crate) adapter: &'a dyn ExternalApiAdapter,
    pub(crate) connection: &'a Connection,
    pub(crate) run: &'a RunHandle,
}

impl<'a> BatchProcessor<'a> {
    pub fn new(
        stores: &'a SyncStores,
        adapter: &'a dyn ExternalApiAdapter,
        connection: &'a Connection,
        run: &'a RunHandle,
    ) -> Self {
        Self {
            stores,
            adapter,
            connection,
            run,
        }
    }

    async fn fetch_candidates(
        &self,
        mapping: &SyncMapping,
        scope: &BatchScope,
    ) -> relay_common::error::RelayResult<Vec<LocalRecord>> {
        match scope {
            BatchScope::All => self.stores.records.fetch_all(&mapping.local_table).await,
            BatchScope::Only(ids) => {
                self.stores
                    .records
                    .fetch_by_ids(&mapping.local_table, ids)
                    .await
            }
        }
    }

    /// Outbound pass: local rows → external records.
    pub async fn push(&self, mapping: &SyncMapping, scope: &BatchScope) -> MappingOutcome {
        let mut outcome = MappingOutcome::new(mapping.id, self.run.clone());

        let candidates = match self.fetch_candidates(mapping, scope).await {
            Ok(records) => records,
            Err(e) => {
                outcome.mapping_failed(SOURCE_UNAVAILABLE, e.to_string(), 1);
                return outcome;
            }
        };

        if let Err(e) = validate_rules(&mapping.field_mappings) {
            outcome.mapping_failed(MAPPING_CONFIG_INVALID, e.to_string(), candidates.len());
            return outcome;
        }
        let filters = match compile_filters(&mapping.filters) {
            Ok(filters) => filters,
            Err(e) => {
                outcome.mapping_failed(MAPPING_CONFIG_INVALID, e.to_string(), candidates.len());
                return outcome;
            }
        };

        let in_scope: Vec<LocalRecord> = candidates
            .into_iter()
            .filter(|record| matches_all(record, &filters))
            .collect();
        let ids: Vec<String> = in_scope.iter().map(|r| r.id.clone()).collect();

        let mut lookup = match ExternalIdentityLookup::for_records(
            self.stores.external_ids.clone(),
            self.connection.id,
            &mapping.local_table,
            &ids,
        )
        .await
        {
            Ok(lookup) => lookup,
            Err(e) => {
                outcome.mapping_failed(IDENTITY_LOOKUP_FAILED, e.to_string(), in_scope.len());
                return outcome;
            }
        };

        tracing::info!(
            mapping_id = %mapping.id,
            table = %mapping.local_table,
            entity = %mapping.external_entity,
            in_scope = in_scope.len(),
            known = lookup.len(),
            "pushing records"
        );

        for record in &in_scope {
            if outcome.should_stop() {
                tracing::info!(mapping_id = %mapping.id, "push stopped by cancellation");
                break;
            }

            let payload = match map_record(record, &mapping.field_mappings) {
                Ok(payload) => payload_to_json(&payload),
                Err(e) => {
                    outcome.record_failed(&record.id, TRANSFORM_FAILED, e.to_string());
                    continue;
                }
            };

            let intent = lookup.intent_for(&record.id);
            let is_create = intent == PushIntent::Create;

            let pushed = self
                .adapter
                .push(PushRequest {
                    connection: self.connection,
                    entity: &mapping.external_entity,
                    local_id: &record.id,
                    intent,
                    payload: &payload,
                })
                .await;

            let external_id = match pushed {
                Ok(result) => result.external_id,
                Err(e) => {
                    outcome.record_failed(&record.id, e.code(), e.to_string());
                    continue;
                }
            };

            // Without the mapping row the next run would create a duplicate.
            if let Err(e) = lookup
                .record_success(&record.id, &external_id, payload, Utc::now())
                .await
            {
                outcome.record_failed(
                    &record.id,
                    IDENTITY_PERSIST_FAILED,
                    format!("pushed as {external_id} but the mapping was not saved: {e}"),
                );
                continue;
            }

            if is_create {
                outcome.record_created();
            } else {
                outcome.record_updated();
            }
        }

        outcome
    }
}
