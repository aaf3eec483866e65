use async_trait::async_trait;
use uuid::Uuid;

use crate::sync::models::{NewSyncLog, SyncLog, SyncLogCompletion, SyncLogStats};
use relay_common::error::RelayResult;

#[async_trait]
pub trait SyncLogRepository: Send + Sync {
    /// Open a log directly in `running`; there is no observable `pending` row.
    async fn create_running(&self, log: NewSyncLog) -> RelayResult<SyncLog>;

    async fn get_by_id(&self, org_id: Uuid, id: Uuid) -> RelayResult<Option<SyncLog>>;

    /// Apply the terminal write, only if the log is still `running`.
    /// Returns `None` when another writer (e.g. a cancel) closed it first.
    async fn finalize(&self, id: Uuid, completion: &SyncLogCompletion)
        -> RelayResult<Option<SyncLog>>;

    async fn stats_for_connection(
        &self,
        org_id: Uuid,
        connection_id: Uuid,
    ) -> RelayResult<SyncLogStats>;
}
