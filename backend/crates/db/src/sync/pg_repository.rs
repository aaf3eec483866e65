use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, types::Json, PgPool, Row};
use uuid::Uuid;

use crate::sync::models::{
    NewSyncLog, SyncCounters, SyncError, SyncLog, SyncLogCompletion, SyncLogStats, SyncStatus,
    SyncType,
};
use crate::sync::repositories::SyncLogRepository;
use relay_common::error::{RelayError, RelayResult};

const COLUMNS: &str = "id, org_id, connection_id, mapping_id, sync_type, status, records_processed, \
     records_created, records_updated, records_failed, errors, retry_of, triggered_by, started_at, finished_at";

#[derive(Clone)]
pub struct PgSyncLogRepository {
    pool: PgPool,
}

impl PgSyncLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: PgRow) -> RelayResult<SyncLog> {
        let decode = |e: sqlx::Error| RelayError::Database(format!("sync_logs: {e}"));
        let id: Uuid = row.try_get("id").map_err(decode)?;

        let sync_type_raw: String = row.try_get("sync_type").map_err(decode)?;
        let sync_type = SyncType::from_str(&sync_type_raw).map_err(RelayError::Internal)?;
        let status_raw: String = row.try_get("status").map_err(decode)?;
        let status = SyncStatus::from_str(&status_raw).map_err(RelayError::Internal)?;

        let errors_raw: Option<serde_json::Value> = row.try_get("errors").map_err(decode)?;
        let errors: Vec<SyncError> = match errors_raw {
            Some(v) if !v.is_null() => serde_json::from_value(v).map_err(|e| {
                RelayError::Internal(format!("sync log {id} has malformed errors: {e}"))
            })?,
            _ => Vec::new(),
        };

        Ok(SyncLog {
            id,
            org_id: row.try_get("org_id").map_err(decode)?,
            connection_id: row.try_get("connection_id").map_err(decode)?,
            mapping_id: row.try_get("mapping_id").map_err(decode)?,
            sync_type,
            status,
            counters: SyncCounters {
                processed: row.try_get("records_processed").map_err(decode)?,
                created: row.try_get("records_created").map_err(decode)?,
                updated: row.try_get("records_updated").map_err(decode)?,
                failed: row.try_get("records_failed").map_err(decode)?,
            },
            errors,
            retry_of: row.try_get("retry_of").map_err(decode)?,
            triggered_by: row.try_get("triggered_by").map_err(decode)?,
            started_at: row.try_get("started_at").map_err(decode)?,
            finished_at: row.try_get("finished_at").map_err(decode)?,
        })
    }
}

#[async_trait]
impl SyncLogRepository for PgSyncLogRepository {
    async fn create_running(&self, log: NewSyncLog) -> RelayResult<SyncLog> {
        let row = sqlx::query(&format!(
            "insert into sync_logs
               (id, org_id, connection_id, mapping_id, sync_type, status, retry_of, triggered_by, started_at)
             values ($1, $2, $3, $4, $5, 'running', $6, $7, $8)
             returning {COLUMNS}"
        ))
        .bind(log.id)
        .bind(log.org_id)
        .bind(log.connection_id)
        .bind(log.mapping_id)
        .bind(log.sync_type.as_str())
        .bind(log.retry_of)
        .bind(&log.triggered_by)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RelayError::Database(e.to_string()))?;

        Self::map_row(row)
    }

    async fn get_by_id(&self, org_id: Uuid, id: Uuid) -> RelayResult<Option<SyncLog>> {
        let row = sqlx::query(&format!(
            "select {COLUMNS} from sync_logs where org_id = $1 and id = $2"
        ))
        .bind(org_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RelayError::Database(e.to_string()))?;

        row.map(Self::map_row).transpose()
    }

    async fn finalize(
        &self,
        id: Uuid,
        completion: &SyncLogCompletion,
    ) -> RelayResult<Option<SyncLog>> {
        if !SyncStatus::Running.can_transition_to(completion.status) {
            return Err(RelayError::Internal(format!(
                "cannot finalize sync log {id} as {}",
                completion.status
            )));
        }

        let row = sqlx::query(&format!(
            "update sync_logs
             set status = $1,
                 records_processed = $2,
                 records_created = $3,
                 records_updated = $4,
                 records_failed = $5,
                 errors = $6,
                 finished_at = $7
             where id = $8 and status = 'running'
             returning {COLUMNS}"
        ))
        .bind(completion.status.as_str())
        .bind(completion.counters.processed)
        .bind(completion.counters.created)
        .bind(completion.counters.updated)
        .bind(completion.counters.failed)
        .bind(Json(&completion.errors))
        .bind(completion.finished_at)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RelayError::Database(e.to_string()))?;

        row.map(Self::map_row).transpose()
    }

    async fn stats_for_connection(
        &self,
        org_id: Uuid,
        connection_id: Uuid,
    ) -> RelayResult<SyncLogStats> {
        let counts = sqlx::query(
            "select count(*) as total,
                    count(*) filter (where status = 'completed') as completed,
                    count(*) filter (where status = 'running') as running
             from sync_logs
             where org_id = $1 and connection_id = $2",
        )
        .bind(org_id)
        .bind(connection_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RelayError::Database(e.to_string()))?;

        let last = sqlx::query(&format!(
            "select {COLUMNS} from sync_logs
             where org_id = $1 and connection_id = $2
             order by started_at desc
             limit 1"
        ))
        .bind(org_id)
        .bind(connection_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RelayError::Database(e.to_string()))?
        .map(Self::map_row)
        .transpose()?;

        Ok(SyncLogStats {
            total: counts
                .try_get("total")
                .map_err(|e| RelayError::Database(e.to_string()))?,
            completed: counts
                .try_get("completed")
                .map_err(|e| RelayError::Database(e.to_string()))?,
            running: counts
                .try_get("running")
                .map_err(|e| RelayError::Database(e.to_string()))?,
            last,
        })
    }
}
