use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use crate::external_ids::models::{ExternalIdMapping, ExternalIdUpsert};
use crate::external_ids::repositories::ExternalIdRepository;
use relay_common::error::{RelayError, RelayResult};

const COLUMNS: &str = "id, connection_id, local_table, local_id, external_id, last_synced_payload, \
     last_synced_at, created_at, updated_at";

#[derive(Clone)]
pub struct PgExternalIdRepository {
    pool: PgPool,
}

impl PgExternalIdRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: PgRow) -> RelayResult<ExternalIdMapping> {
        let decode = |e: sqlx::Error| RelayError::Database(format!("external_id_mappings: {e}"));
        Ok(ExternalIdMapping {
            id: row.try_get("id").map_err(decode)?,
            connection_id: row.try_get("connection_id").map_err(decode)?,
            local_table: row.try_get("local_table").map_err(decode)?,
            local_id: row.try_get("local_id").map_err(decode)?,
            external_id: row.try_get("external_id").map_err(decode)?,
            last_synced_payload: row.try_get("last_synced_payload").map_err(decode)?,
            last_synced_at: row.try_get("last_synced_at").map_err(decode)?,
            created_at: row.try_get("created_at").map_err(decode)?,
            updated_at: row.try_get("updated_at").map_err(decode)?,
        })
    }
}

#[async_trait]
impl ExternalIdRepository for PgExternalIdRepository {
    async fn find_by_local_ids(
        &self,
        connection_id: Uuid,
        local_table: &str,
        local_ids: &[String],
    ) -> RelayResult<Vec<ExternalIdMapping>> {
        if local_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            "select {COLUMNS} from external_id_mappings
             where connection_id = $1 and local_table = $2 and local_id = any($3)"
        ))
        .bind(connection_id)
        .bind(local_table)
        .bind(local_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RelayError::Database(e.to_string()))?;

        rows.into_iter().map(Self::map_row).collect()
    }

    async fn list_for_table(
        &self,
        connection_id: Uuid,
        local_table: &str,
    ) -> RelayResult<Vec<ExternalIdMapping>> {
        let rows = sqlx::query(&format!(
            "select {COLUMNS} from external_id_mappings
             where connection_id = $1 and local_table = $2"
        ))
        .bind(connection_id)
        .bind(local_table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RelayError::Database(e.to_string()))?;

        rows.into_iter().map(Self::map_row).collect()
    }

    async fn upsert(&self, mapping: &ExternalIdUpsert) -> RelayResult<ExternalIdMapping> {
        let row = sqlx::query(&format!(
            "insert into external_id_mappings
               (id, connection_id, local_table, local_id, external_id, last_synced_payload, last_synced_at)
             values ($1, $2, $3, $4, $5, $6, $7)
             on conflict (connection_id, local_table, local_id) do update set
               external_id = excluded.external_id,
               last_synced_payload = excluded.last_synced_payload,
               last_synced_at = excluded.last_synced_at,
               updated_at = now()
             returning {COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(mapping.connection_id)
        .bind(&mapping.local_table)
        .bind(&mapping.local_id)
        .bind(&mapping.external_id)
        .bind(&mapping.payload)
        .bind(mapping.synced_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RelayError::Database(e.to_string()))?;

        Self::map_row(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_pool;
    use chrono::Utc;

    async fn test_repo() -> Option<(PgExternalIdRepository, PgPool)> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = create_pool(&url, 2).await.expect("db should connect");

        sqlx::query(
            "create table if not exists external_id_mappings (
               id uuid primary key default gen_random_uuid(),
               connection_id uuid not null,
               local_table text not null,
               local_id text not null,
               external_id text not null,
               last_synced_payload jsonb,
               last_synced_at timestamptz not null default now(),
               created_at timestamptz not null default now(),
               updated_at timestamptz not null default now()
             )",
        )
        .execute(&pool)
        .await
        .ok()?;

        sqlx::query(
            "create unique index if not exists external_id_mappings_local_uidx
             on external_id_mappings(connection_id, local_table, local_id)",
        )
        .execute(&pool)
        .await
        .ok()?;

        Some((PgExternalIdRepository::new(pool.clone()), pool))
    }

    fn upsert_for(connection_id: Uuid, local_id: &str, external_id: &str) -> ExternalIdUpsert {
        ExternalIdUpsert {
            connection_id,
            local_table: "bookings".to_string(),
            local_id: local_id.to_string(),
            external_id: external_id.to_string(),
            payload: Some(serde_json::json!({"DocNumber": local_id})),
            synced_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_twice_keeps_one_row() {
        let (repo, pool) = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let conn = Uuid::new_v4();
        let first = repo.upsert(&upsert_for(conn, "b-1", "ext-1")).await.expect("insert");
        let second = repo.upsert(&upsert_for(conn, "b-1", "ext-1")).await.expect("update");
        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);

        let count: i64 = sqlx::query(
            "select count(*) as n from external_id_mappings where connection_id = $1 and local_id = 'b-1'",
        )
        .bind(conn)
        .fetch_one(&pool)
        .await
        .expect("count")
        .get("n");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn find_by_local_ids_returns_only_requested() {
        let (repo, _pool) = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let conn = Uuid::new_v4();
        repo.upsert(&upsert_for(conn, "b-1", "ext-1")).await.unwrap();
        repo.upsert(&upsert_for(conn, "b-2", "ext-2")).await.unwrap();

        let found = repo
            .find_by_local_ids(conn, "bookings", &["b-2".to_string(), "b-9".to_string()])
            .await
            .expect("find");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].external_id, "ext-2");

        let all = repo.list_for_table(conn, "bookings").await.expect("list");
        assert_eq!(all.len(), 2);
    }
}
