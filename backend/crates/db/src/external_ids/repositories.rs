use async_trait::async_trait;
use uuid::Uuid;

use crate::external_ids::models::{ExternalIdMapping, ExternalIdUpsert};
use relay_common::error::RelayResult;

#[async_trait]
pub trait ExternalIdRepository: Send + Sync {
    /// Existing mappings for the given local ids of one table.
    async fn find_by_local_ids(
        &self,
        connection_id: Uuid,
        local_table: &str,
        local_ids: &[String],
    ) -> RelayResult<Vec<ExternalIdMapping>>;

    /// Every mapping of one table on a connection.
    async fn list_for_table(
        &self,
        connection_id: Uuid,
        local_table: &str,
    ) -> RelayResult<Vec<ExternalIdMapping>>;

    /// Insert or update the mapping keyed by (connection_id, local_table, local_id).
    /// Concurrent callers converge on one row; `created_at` is preserved on update.
    async fn upsert(&self, mapping: &ExternalIdUpsert) -> RelayResult<ExternalIdMapping>;
}
