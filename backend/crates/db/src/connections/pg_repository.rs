use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use crate::connections::models::{Connection, ConnectionCredentials};
use crate::connections::repositories::ConnectionRepository;
use relay_common::error::{RelayError, RelayResult};

const COLUMNS: &str = "id, org_id, provider, name, is_active, access_token, refresh_token, \
     token_expires_at, last_sync_at, last_error, created_at, updated_at";

#[derive(Clone)]
pub struct PgConnectionRepository {
    pool: PgPool,
}

impl PgConnectionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: PgRow) -> RelayResult<Connection> {
        let decode = |e: sqlx::Error| RelayError::Database(format!("integration_connections: {e}"));
        Ok(Connection {
            id: row.try_get("id").map_err(decode)?,
            org_id: row.try_get("org_id").map_err(decode)?,
            provider: row.try_get("provider").map_err(decode)?,
            name: row.try_get("name").map_err(decode)?,
            is_active: row.try_get("is_active").map_err(decode)?,
            access_token: row.try_get("access_token").map_err(decode)?,
            refresh_token: row.try_get("refresh_token").map_err(decode)?,
            token_expires_at: row.try_get("token_expires_at").map_err(decode)?,
            last_sync_at: row.try_get("last_sync_at").map_err(decode)?,
            last_error: row.try_get("last_error").map_err(decode)?,
            created_at: row.try_get("created_at").map_err(decode)?,
            updated_at: row.try_get("updated_at").map_err(decode)?,
        })
    }
}

#[async_trait]
impl ConnectionRepository for PgConnectionRepository {
    async fn get_by_id(&self, org_id: Uuid, id: Uuid) -> RelayResult<Option<Connection>> {
        let row = sqlx::query(&format!(
            "select {COLUMNS} from integration_connections where org_id = $1 and id = $2"
        ))
        .bind(org_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RelayError::Database(e.to_string()))?;

        row.map(Self::map_row).transpose()
    }

    async fn list_active(&self, org_id: Uuid) -> RelayResult<Vec<Connection>> {
        let rows = sqlx::query(&format!(
            "select {COLUMNS} from integration_connections
             where org_id = $1 and is_active
             order by created_at"
        ))
        .bind(org_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RelayError::Database(e.to_string()))?;

        rows.into_iter().map(Self::map_row).collect()
    }

    async fn update_credentials(
        &self,
        id: Uuid,
        credentials: &ConnectionCredentials,
    ) -> RelayResult<Connection> {
        let row = sqlx::query(&format!(
            "update integration_connections
             set access_token = $1,
                 refresh_token = coalesce($2, refresh_token),
                 token_expires_at = $3,
                 updated_at = now()
             where id = $4
             returning {COLUMNS}"
        ))
        .bind(&credentials.access_token)
        .bind(&credentials.refresh_token)
        .bind(credentials.expires_at)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RelayError::Database(e.to_string()))?
        .ok_or_else(|| RelayError::NotFound(format!("connection {id}")))?;

        Self::map_row(row)
    }

    async fn record_sync_result(
        &self,
        id: Uuid,
        synced_at: DateTime<Utc>,
        last_error: Option<&str>,
    ) -> RelayResult<()> {
        sqlx::query(
            "update integration_connections
             set last_sync_at = $1, last_error = $2, updated_at = now()
             where id = $3",
        )
        .bind(synced_at)
        .bind(last_error)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| RelayError::Database(e.to_string()))?;
        Ok(())
    }
}
