use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::records::models::{LocalRecord, RecordFields};
use crate::records::repositories::LocalRecordStore;
use relay_common::error::{RelayError, RelayResult};

const ID_COLUMN: &str = "id";

/// Quote a table or column name after checking it is a plain SQL identifier.
/// Names come from sync configuration, so they are never trusted as-is.
pub fn quote_identifier(name: &str) -> RelayResult<String> {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 {
        return Err(RelayError::Validation(format!(
            "invalid identifier: {name}"
        )));
    }

    let mut quoted = Vec::with_capacity(parts.len());
    for part in parts {
        let valid = !part.is_empty()
            && part.len() <= 63
            && part
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(RelayError::Validation(format!(
                "invalid identifier: {name}"
            )));
        }
        quoted.push(format!("\"{part}\""));
    }

    Ok(quoted.join("."))
}

fn column_list(fields: &RecordFields) -> RelayResult<String> {
    let columns = fields
        .keys()
        .map(|k| quote_identifier(k))
        .collect::<RelayResult<Vec<_>>>()?;
    Ok(columns.join(", "))
}

fn fields_to_json(fields: &RecordFields) -> serde_json::Value {
    let map = fields
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::from(v.clone())))
        .collect::<serde_json::Map<_, _>>();
    serde_json::Value::Object(map)
}

#[derive(Clone)]
pub struct PgLocalRecordStore {
    pool: PgPool,
}

impl PgLocalRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_rows(table: &str, rows: Vec<sqlx::postgres::PgRow>) -> RelayResult<Vec<LocalRecord>> {
        rows.into_iter()
            .map(|row| {
                let json: serde_json::Value = row
                    .try_get("row")
                    .map_err(|e| RelayError::Database(e.to_string()))?;
                LocalRecord::from_json_row(json, ID_COLUMN).map_err(|e| {
                    RelayError::Internal(format!("failed to decode row of {table}: {e}"))
                })
            })
            .collect()
    }
}

#[async_trait]
impl LocalRecordStore for PgLocalRecordStore {
    async fn fetch_all(&self, table: &str) -> RelayResult<Vec<LocalRecord>> {
        let quoted = quote_identifier(table)?;
        let rows = sqlx::query(&format!(
            "select row_to_json(t)::jsonb as row from {quoted} t order by t.id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RelayError::Database(e.to_string()))?;

        Self::map_rows(table, rows)
    }

    async fn fetch_by_ids(&self, table: &str, ids: &[String]) -> RelayResult<Vec<LocalRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let quoted = quote_identifier(table)?;
        let rows = sqlx::query(&format!(
            "select row_to_json(t)::jsonb as row from {quoted} t
             where t.id::text = any($1)
             order by t.id"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RelayError::Database(e.to_string()))?;

        Self::map_rows(table, rows)
    }

    async fn insert(&self, table: &str, fields: &RecordFields) -> RelayResult<String> {
        let quoted = quote_identifier(table)?;
        let sql = if fields.is_empty() {
            format!("insert into {quoted} default values returning id::text as id")
        } else {
            let columns = column_list(fields)?;
            format!(
                "insert into {quoted} ({columns})
                 select {columns} from jsonb_populate_record(null::{quoted}, $1)
                 returning id::text as id"
            )
        };

        let row = sqlx::query(&sql)
            .bind(fields_to_json(fields))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RelayError::Database(e.to_string()))?;

        row.try_get("id")
            .map_err(|e| RelayError::Database(e.to_string()))
    }

    async fn update(&self, table: &str, id: &str, fields: &RecordFields) -> RelayResult<()> {
        // The id column is the row key; never rewrite it from inbound data.
        let mut writable = fields.clone();
        writable.remove(ID_COLUMN);
        if writable.is_empty() {
            return Ok(());
        }

        let quoted = quote_identifier(table)?;
        let columns = column_list(&writable)?;
        let result = sqlx::query(&format!(
            "update {quoted} set ({columns}) =
               (select {columns} from jsonb_populate_record(null::{quoted}, $1))
             where id::text = $2"
        ))
        .bind(fields_to_json(&writable))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| RelayError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RelayError::NotFound(format!("{table} row {id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_pool;
    use crate::records::models::FieldValue;

    #[test]
    fn quote_identifier_accepts_plain_and_qualified_names() {
        assert_eq!(quote_identifier("bookings").unwrap(), "\"bookings\"");
        assert_eq!(
            quote_identifier("public.hse_metrics").unwrap(),
            "\"public\".\"hse_metrics\""
        );
    }

    #[test]
    fn quote_identifier_rejects_injection() {
        for name in [
            "",
            "bookings; drop table users",
            "1bookings",
            "a.b.c",
            "book\"ings",
            "bookings ",
        ] {
            assert!(quote_identifier(name).is_err(), "{name:?} should be rejected");
        }
    }

    async fn test_store() -> Option<(PgLocalRecordStore, PgPool)> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = create_pool(&url, 2).await.expect("db should connect");

        sqlx::query(
            "create table if not exists relay_test_bookings (
               id uuid primary key default gen_random_uuid(),
               reference text,
               status text,
               weight numeric
             )",
        )
        .execute(&pool)
        .await
        .ok()?;

        Some((PgLocalRecordStore::new(pool.clone()), pool))
    }

    #[tokio::test]
    async fn insert_then_fetch_by_id() {
        let (store, _pool) = match test_store().await {
            Some(s) => s,
            None => return,
        };
        let mut fields = RecordFields::new();
        fields.insert("reference".to_string(), FieldValue::from("BK-1"));
        fields.insert("status".to_string(), FieldValue::from("confirmed"));

        let id = store
            .insert("relay_test_bookings", &fields)
            .await
            .expect("insert");
        let rows = store
            .fetch_by_ids("relay_test_bookings", &[id.clone()])
            .await
            .expect("fetch");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, id);
        assert_eq!(rows[0].get("reference"), &FieldValue::from("BK-1"));
    }

    #[tokio::test]
    async fn update_overwrites_columns() {
        let (store, _pool) = match test_store().await {
            Some(s) => s,
            None => return,
        };
        let mut fields = RecordFields::new();
        fields.insert("status".to_string(), FieldValue::from("draft"));
        let id = store
            .insert("relay_test_bookings", &fields)
            .await
            .expect("insert");

        fields.insert("status".to_string(), FieldValue::from("invoiced"));
        store
            .update("relay_test_bookings", &id, &fields)
            .await
            .expect("update");

        let rows = store
            .fetch_by_ids("relay_test_bookings", &[id])
            .await
            .expect("fetch");
        assert_eq!(rows[0].get("status"), &FieldValue::from("invoiced"));
    }

    #[tokio::test]
    async fn update_missing_row_is_not_found() {
        let (store, _pool) = match test_store().await {
            Some(s) => s,
            None => return,
        };
        let mut fields = RecordFields::new();
        fields.insert("status".to_string(), FieldValue::from("x"));
        let err = store
            .update(
                "relay_test_bookings",
                "00000000-0000-0000-0000-000000000000",
                &fields,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::NotFound(_)));
    }
}
