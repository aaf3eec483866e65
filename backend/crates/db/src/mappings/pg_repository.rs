use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use crate::mappings::models::{FieldRule, FilterCondition, SyncMapping};
use crate::mappings::repositories::SyncMappingRepository;
use relay_common::error::{RelayError, RelayResult};

const COLUMNS: &str = "id, connection_id, name, local_table, external_entity, field_mappings, \
     filters, is_active, created_at, updated_at";

#[derive(Clone)]
pub struct PgSyncMappingRepository {
    pool: PgPool,
}

impl PgSyncMappingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: PgRow) -> RelayResult<SyncMapping> {
        let decode = |e: sqlx::Error| RelayError::Database(format!("sync_mappings: {e}"));
        let id: Uuid = row.try_get("id").map_err(decode)?;

        let raw_rules: serde_json::Value = row.try_get("field_mappings").map_err(decode)?;
        let field_mappings: Vec<FieldRule> = serde_json::from_value(raw_rules)
            .map_err(|e| RelayError::Config(format!("mapping {id} has invalid field_mappings: {e}")))?;

        let raw_filters: Option<serde_json::Value> = row.try_get("filters").map_err(decode)?;
        let filters: Vec<FilterCondition> = match raw_filters {
            Some(v) if !v.is_null() => serde_json::from_value(v)
                .map_err(|e| RelayError::Config(format!("mapping {id} has invalid filters: {e}")))?,
            _ => Vec::new(),
        };

        Ok(SyncMapping {
            id,
            connection_id: row.try_get("connection_id").map_err(decode)?,
            name: row.try_get("name").map_err(decode)?,
            local_table: row.try_get("local_table").map_err(decode)?,
            external_entity: row.try_get("external_entity").map_err(decode)?,
            field_mappings,
            filters,
            is_active: row.try_get("is_active").map_err(decode)?,
            created_at: row.try_get("created_at").map_err(decode)?,
            updated_at: row.try_get("updated_at").map_err(decode)?,
        })
    }
}

#[async_trait]
impl SyncMappingRepository for PgSyncMappingRepository {
    async fn get_by_id(&self, connection_id: Uuid, id: Uuid) -> RelayResult<Option<SyncMapping>> {
        let row = sqlx::query(&format!(
            "select {COLUMNS} from sync_mappings where connection_id = $1 and id = $2"
        ))
        .bind(connection_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RelayError::Database(e.to_string()))?;

        row.map(Self::map_row).transpose()
    }

    async fn list_for_connection(
        &self,
        connection_id: Uuid,
        active_only: bool,
    ) -> RelayResult<Vec<SyncMapping>> {
        let rows = sqlx::query(&format!(
            "select {COLUMNS} from sync_mappings
             where connection_id = $1 and (is_active or not $2)
             order by created_at, id"
        ))
        .bind(connection_id)
        .bind(active_only)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RelayError::Database(e.to_string()))?;

        rows.into_iter().map(Self::map_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_pool;
    use serde_json::json;

    async fn test_repo() -> Option<(PgSyncMappingRepository, PgPool)> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = create_pool(&url, 2).await.expect("db should connect");

        sqlx::query(
            "create table if not exists sync_mappings (
               id uuid primary key default gen_random_uuid(),
               connection_id uuid not null,
               name text not null,
               local_table text not null,
               external_entity text not null,
               field_mappings jsonb not null default '[]'::jsonb,
               filters jsonb,
               is_active boolean not null default true,
               created_at timestamptz not null default now(),
               updated_at timestamptz not null default now()
             )",
        )
        .execute(&pool)
        .await
        .ok()?;

        Some((PgSyncMappingRepository::new(pool.clone()), pool))
    }

    async fn insert_mapping(
        pool: &PgPool,
        connection_id: Uuid,
        active: bool,
        rules: serde_json::Value,
    ) -> Uuid {
        let id = Uuid::new_v4();
        sqlx::query(
            "insert into sync_mappings (id, connection_id, name, local_table, external_entity, field_mappings, filters, is_active)
             values ($1, $2, 'bookings', 'bookings', 'Invoice', $3, $4, $5)",
        )
        .bind(id)
        .bind(connection_id)
        .bind(rules)
        .bind(json!([{"field": "status", "operator": "neq", "value": "draft"}]))
        .bind(active)
        .execute(pool)
        .await
        .expect("insert mapping");
        id
    }

    #[tokio::test]
    async fn list_for_connection_filters_inactive() {
        let (repo, pool) = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let conn = Uuid::new_v4();
        let rules = json!([{"local_field": "reference", "external_field": "DocNumber"}]);
        let active = insert_mapping(&pool, conn, true, rules.clone()).await;
        insert_mapping(&pool, conn, false, rules).await;

        let only_active = repo.list_for_connection(conn, true).await.expect("list");
        assert_eq!(only_active.len(), 1);
        assert_eq!(only_active[0].id, active);
        assert_eq!(only_active[0].filters.len(), 1);

        let all = repo.list_for_connection(conn, false).await.expect("list all");
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn malformed_rules_surface_as_config_error() {
        let (repo, pool) = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let conn = Uuid::new_v4();
        let id = insert_mapping(&pool, conn, true, json!({"not": "a list"})).await;

        let err = repo.get_by_id(conn, id).await.unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }
}
