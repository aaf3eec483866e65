use async_trait::async_trait;
use uuid::Uuid;

use crate::members::models::Role;
use relay_common::error::RelayResult;

/// Role lookup for a user inside one organization.
#[async_trait]
pub trait MemberRepository: Send + Sync {
    async fn role_for(&self, org_id: Uuid, user_id: Uuid) -> RelayResult<Option<Role>>;
}
