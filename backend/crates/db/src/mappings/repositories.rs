use async_trait::async_trait;
use uuid::Uuid;

use crate::mappings::models::SyncMapping;
use relay_common::error::RelayResult;

#[async_trait]
pub trait SyncMappingRepository: Send + Sync {
    async fn get_by_id(&self, connection_id: Uuid, id: Uuid) -> RelayResult<Option<SyncMapping>>;

    /// Mappings of a connection in creation order.
    async fn list_for_connection(
        &self,
        connection_id: Uuid,
        active_only: bool,
    ) -> RelayResult<Vec<SyncMapping>>;
}
