use chrono::TimeDelta;
use relay_common::error::{RelayError, RelayResult};
use relay_config::parse_var_or;

#[derive(Debug, Clone)]
pub struct SyncEngineConfig {
    /// Tokens expiring within this many seconds are refreshed before a run.
    pub token_expiry_skew_secs: i64,
}

impl Default for SyncEngineConfig {
    fn default() -> Self {
        Self {
            token_expiry_skew_secs: 60,
        }
    }
}

impl SyncEngineConfig {
    pub fn from_env() -> RelayResult<Self> {
        let defaults = Self::default();
        let token_expiry_skew_secs: i64 =
            parse_var_or("SYNC_TOKEN_EXPIRY_SKEW_SECS", defaults.token_expiry_skew_secs)?;
        if TimeDelta::try_seconds(token_expiry_skew_secs).is_none() {
            return Err(RelayError::Config(format!(
                "SYNC_TOKEN_EXPIRY_SKEW_SECS out of range: {token_expiry_skew_secs}"
            )));
        }
        Ok(Self {
            token_expiry_skew_secs,
        })
    }

    /// Saturates instead of panicking for values built outside `from_env`.
    pub fn token_skew(&self) -> TimeDelta {
        TimeDelta::try_seconds(self.token_expiry_skew_secs.max(0)).unwrap_or(TimeDelta::MAX)
    }
}
