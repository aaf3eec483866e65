use relay_common::error::{RelayError, RelayResult};
use relay_db::members::repositories::MemberRepository;
use uuid::Uuid;

pub const SCHEDULER_ACTOR: &str = "scheduler";

/// Who is invoking a sync operation, passed explicitly into every entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub org_id: Uuid,
    /// `None` for the scheduler's system context.
    pub user_id: Option<Uuid>,
}

impl Caller {
    pub fn user(org_id: Uuid, user_id: Uuid) -> Self {
        Self {
            org_id,
            user_id: Some(user_id),
        }
    }

    pub fn system(org_id: Uuid) -> Self {
        Self {
            org_id,
            user_id: None,
        }
    }

    pub fn is_system(&self) -> bool {
        self.user_id.is_none()
    }

    /// Value stored in `sync_logs.triggered_by`.
    pub fn actor(&self) -> String {
        match self.user_id {
            Some(id) => id.to_string(),
            None => SCHEDULER_ACTOR.to_string(),
        }
    }
}

/// Require the admin role in the caller's org. Any other outcome, including a
/// missing membership, is the same `Unauthorized`.
pub async fn authorize(members: &dyn MemberRepository, caller: &Caller) -> RelayResult<()> {
    let Some(user_id) = caller.user_id else {
        return Ok(());
    };

    match members.role_for(caller.org_id, user_id).await? {
        Some(role) if role.is_admin() => Ok(()),
        role => {
            tracing::warn!(
                org_id = %caller.org_id,
                %user_id,
                role = role.map(|r| r.as_str()).unwrap_or("none"),
                "sync operation denied"
            );
            Err(RelayError::Unauthorized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryDb;
    use relay_db::members::models::Role;

    #[tokio::test]
    async fn admin_is_allowed() {
        let db = MemoryDb::new();
        let org = Uuid::new_v4();
        let user = Uuid::new_v4();
        db.add_member(org, user, Role::Admin);
        assert!(authorize(&db, &Caller::user(org, user)).await.is_ok());
    }

    #[tokio::test]
    async fn non_admin_and_strangers_are_rejected_uniformly() {
        let db = MemoryDb::new();
        let org = Uuid::new_v4();
        let member = Uuid::new_v4();
        db.add_member(org, member, Role::Member);

        for user in [member, Uuid::new_v4()] {
            let err = authorize(&db, &Caller::user(org, user)).await.unwrap_err();
            assert!(matches!(err, RelayError::Unauthorized));
        }
    }

    #[tokio::test]
    async fn admin_of_another_org_is_rejected() {
        let db = MemoryDb::new();
        let user = Uuid::new_v4();
        db.add_member(Uuid::new_v4(), user, Role::Admin);
        let err = authorize(&db, &Caller::user(Uuid::new_v4(), user))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Unauthorized));
    }

    #[tokio::test]
    async fn system_context_skips_role_lookup() {
        let db = MemoryDb::new();
        let caller = Caller::system(Uuid::new_v4());
        assert!(authorize(&db, &caller).await.is_ok());
        assert_eq!(caller.actor(), "scheduler");
    }
}
