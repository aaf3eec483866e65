use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A configured link to one external system instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: Uuid,
    pub org_id: Uuid,
    pub provider: String,
    pub name: String,
    pub is_active: bool,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Usable,
    /// Expired (or about to), but a refresh token is on file.
    Refreshable,
    Unusable,
}

impl Connection {
    /// Classify the stored credentials. A token expiring within `skew` counts
    /// as expired so it cannot lapse mid-batch.
    pub fn token_state(&self, now: DateTime<Utc>, skew: Duration) -> TokenState {
        let has_refresh = self
            .refresh_token
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty());

        let has_access = self
            .access_token
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty());
        let expired = self
            .token_expires_at
            .is_some_and(|expires_at| {
                now.checked_add_signed(skew)
                    .map_or(true, |limit| expires_at <= limit)
            });

        if has_access && !expired {
            return TokenState::Usable;
        }
        if has_refresh {
            TokenState::Refreshable
        } else {
            TokenState::Unusable
        }
    }
}

/// Fresh credentials returned by a token refresh.
#[derive(Debug, Clone)]
pub struct ConnectionCredentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(
        access: Option<&str>,
        refresh: Option<&str>,
        expires_in: Option<i64>,
    ) -> Connection {
        let now = Utc::now();
        Connection {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            provider: "ledger".to_string(),
            name: "Ledger".to_string(),
            is_active: true,
            access_token: access.map(str::to_string),
            refresh_token: refresh.map(str::to_string),
            token_expires_at: expires_in.map(|s| now + Duration::seconds(s)),
            last_sync_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn skew_past_the_calendar_counts_as_expired() {
        let c = connection(Some("tok"), Some("ref"), Some(3600));
        assert_eq!(
            c.token_state(Utc::now(), Duration::MAX),
            TokenState::Refreshable
        );
    }

    #[test]
    fn token_without_expiry_is_usable() {
        let c = connection(Some("tok"), None, None);
        assert_eq!(c.token_state(Utc::now(), Duration::zero()), TokenState::Usable);
    }

    #[test]
    fn expired_token_with_refresh_is_refreshable() {
        let c = connection(Some("tok"), Some("ref"), Some(-60));
        assert_eq!(
            c.token_state(Utc::now(), Duration::zero()),
            TokenState::Refreshable
        );
    }

    #[test]
    fn expired_token_without_refresh_is_unusable() {
        let c = connection(Some("tok"), None, Some(-60));
        assert_eq!(
            c.token_state(Utc::now(), Duration::zero()),
            TokenState::Unusable
        );
    }

    #[test]
    fn token_inside_skew_counts_as_expired() {
        let c = connection(Some("tok"), None, Some(30));
        assert_eq!(
            c.token_state(Utc::now(), Duration::seconds(60)),
            TokenState::Unusable
        );
    }

    #[test]
    fn missing_token_is_unusable() {
        let c = connection(None, None, None);
        assert_eq!(
            c.token_state(Utc::now(), Duration::zero()),
            TokenState::Unusable
        );
    }

    #[test]
    fn tokens_are_not_serialized() {
        let c = connection(Some("secret-token"), Some("secret-refresh"), None);
        let json = serde_json::to_string(&c).unwrap();
        assert!(!json.contains("secret"));
    }
}
