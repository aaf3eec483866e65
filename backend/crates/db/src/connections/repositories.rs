use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::connections::models::{Connection, ConnectionCredentials};
use relay_common::error::RelayResult;

#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    async fn get_by_id(&self, org_id: Uuid, id: Uuid) -> RelayResult<Option<Connection>>;

    async fn list_active(&self, org_id: Uuid) -> RelayResult<Vec<Connection>>;

    /// Persist credentials obtained from a token refresh.
    async fn update_credentials(
        &self,
        id: Uuid,
        credentials: &ConnectionCredentials,
    ) -> RelayResult<Connection>;

    /// Stamp last-sync metadata. `last_error` of `None` clears a previous error.
    async fn record_sync_result(
        &self,
        id: Uuid,
        synced_at: DateTime<Utc>,
        last_error: Option<&str>,
    ) -> RelayResult<()>;
}
