pub mod connections;
pub mod external_ids;
pub mod mappings;
pub mod members;
pub mod records;
pub mod sync;

use relay_common::error::{RelayError, RelayResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Create a Postgres connection pool from a database URL.
pub async fn create_pool(database_url: &str, max_connections: u32) -> RelayResult<PgPool> {
    tracing::info!(max_connections, "connecting to database");
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|e| RelayError::Database(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_pool_fails_with_invalid_url() {
        let result = create_pool("postgres://invalid:5432/nonexistent", 1).await;
        assert!(result.is_err());
    }
}
