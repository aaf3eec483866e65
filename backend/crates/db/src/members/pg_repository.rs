use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::members::models::Role;
use crate::members::repositories::MemberRepository;
use relay_common::error::{RelayError, RelayResult};

#[derive(Clone)]
pub struct PgMemberRepository {
    pool: PgPool,
}

impl PgMemberRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MemberRepository for PgMemberRepository {
    async fn role_for(&self, org_id: Uuid, user_id: Uuid) -> RelayResult<Option<Role>> {
        let row = sqlx::query("select role from org_members where org_id = $1 and user_id = $2")
            .bind(org_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RelayError::Database(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let raw: String = row
            .try_get("role")
            .map_err(|e| RelayError::Database(e.to_string()))?;
        // An unrecognised role grants nothing.
        Ok(Role::from_str(&raw).ok())
    }
}
