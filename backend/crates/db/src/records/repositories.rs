use async_trait::async_trait;

use crate::records::models::{LocalRecord, RecordFields};
use relay_common::error::RelayResult;

/// Row access to the local tables a sync mapping points at.
#[async_trait]
pub trait LocalRecordStore: Send + Sync {
    /// Every row of `table`, ordered by id.
    async fn fetch_all(&self, table: &str) -> RelayResult<Vec<LocalRecord>>;

    /// Rows of `table` whose id is in `ids`. Unknown ids are simply absent.
    async fn fetch_by_ids(&self, table: &str, ids: &[String]) -> RelayResult<Vec<LocalRecord>>;

    /// Insert a row and return its id.
    async fn insert(&self, table: &str, fields: &RecordFields) -> RelayResult<String>;

    /// Overwrite the given columns of one row.
    async fn update(&self, table: &str, id: &str, fields: &RecordFields) -> RelayResult<()>;
}
