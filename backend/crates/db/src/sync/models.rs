use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    Push,
    Pull,
    FullSync,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Pull => "pull",
            Self::FullSync => "full_sync",
        }
    }
}

impl FromStr for SyncType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "push" => Ok(Self::Push),
            "pull" => Ok(Self::Pull),
            "full_sync" => Ok(Self::FullSync),
            _ => Err(format!("unknown sync type: {value}")),
        }
    }
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one sync execution: `pending -> running -> completed | failed | partial`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Partial,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Partial => "partial",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Partial)
    }

    pub fn can_transition_to(&self, next: SyncStatus) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Running),
            Self::Running => next.is_terminal(),
            Self::Completed | Self::Failed | Self::Partial => false,
        }
    }

    /// Only runs that lost records can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed | Self::Partial)
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "partial" => Ok(Self::Partial),
            _ => Err(format!("unknown sync status: {value}")),
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncCounters {
    pub processed: i32,
    pub created: i32,
    pub updated: i32,
    pub failed: i32,
}

impl SyncCounters {
    pub fn succeeded(&self) -> i32 {
        self.created + self.updated
    }

    pub fn merge(&mut self, other: &SyncCounters) {
        self.processed += other.processed;
        self.created += other.created;
        self.updated += other.updated;
        self.failed += other.failed;
    }
}

pub const CANCELLED_CODE: &str = "CANCELLED";

/// One failure recorded during a run. `record_id` is absent for mapping-level
/// and run-level failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    pub error_code: String,
    pub message: String,
}

impl SyncError {
    pub fn record(mapping_id: Uuid, record_id: &str, code: &str, message: impl Into<String>) -> Self {
        Self {
            mapping_id: Some(mapping_id),
            record_id: Some(record_id.to_string()),
            error_code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn mapping(mapping_id: Uuid, code: &str, message: impl Into<String>) -> Self {
        Self {
            mapping_id: Some(mapping_id),
            record_id: None,
            error_code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn run(code: &str, message: impl Into<String>) -> Self {
        Self {
            mapping_id: None,
            record_id: None,
            error_code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::run(CANCELLED_CODE, "sync cancelled by user")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncLog {
    pub id: Uuid,
    pub org_id: Uuid,
    pub connection_id: Uuid,
    pub mapping_id: Option<Uuid>,
    pub sync_type: SyncType,
    pub status: SyncStatus,
    pub counters: SyncCounters,
    pub errors: Vec<SyncError>,
    pub retry_of: Option<Uuid>,
    pub triggered_by: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewSyncLog {
    /// Chosen by the caller so the run can be registered before the row exists.
    pub id: Uuid,
    pub org_id: Uuid,
    pub connection_id: Uuid,
    pub mapping_id: Option<Uuid>,
    pub sync_type: SyncType,
    pub retry_of: Option<Uuid>,
    pub triggered_by: Option<String>,
}

/// The single terminal write of a run.
#[derive(Debug, Clone)]
pub struct SyncLogCompletion {
    pub status: SyncStatus,
    pub counters: SyncCounters,
    pub errors: Vec<SyncError>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct SyncLogStats {
    pub total: i64,
    pub completed: i64,
    pub running: i64,
    pub last: Option<SyncLog>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            SyncStatus::Pending,
            SyncStatus::Running,
            SyncStatus::Completed,
            SyncStatus::Failed,
            SyncStatus::Partial,
        ] {
            assert_eq!(SyncStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(SyncStatus::from_str("resumed").is_err());
    }

    #[test]
    fn terminal_states_are_final() {
        for terminal in [SyncStatus::Completed, SyncStatus::Failed, SyncStatus::Partial] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(SyncStatus::Running));
            assert!(!terminal.can_transition_to(SyncStatus::Failed));
        }
        assert!(SyncStatus::Pending.can_transition_to(SyncStatus::Running));
        assert!(!SyncStatus::Pending.can_transition_to(SyncStatus::Completed));
        assert!(SyncStatus::Running.can_transition_to(SyncStatus::Partial));
    }

    #[test]
    fn only_failed_and_partial_are_retryable() {
        assert!(SyncStatus::Failed.is_retryable());
        assert!(SyncStatus::Partial.is_retryable());
        assert!(!SyncStatus::Completed.is_retryable());
        assert!(!SyncStatus::Pending.is_retryable());
        assert!(!SyncStatus::Running.is_retryable());
    }

    #[test]
    fn counters_merge_is_a_sum() {
        let mut total = SyncCounters {
            processed: 3,
            created: 2,
            updated: 0,
            failed: 1,
        };
        total.merge(&SyncCounters {
            processed: 2,
            created: 0,
            updated: 2,
            failed: 0,
        });
        assert_eq!(
            total,
            SyncCounters {
                processed: 5,
                created: 2,
                updated: 2,
                failed: 1
            }
        );
        assert_eq!(total.succeeded(), 4);
    }

    #[test]
    fn sync_type_parses_wire_names() {
        assert_eq!(SyncType::from_str("full_sync").unwrap(), SyncType::FullSync);
        assert_eq!(
            serde_json::to_string(&SyncType::FullSync).unwrap(),
            "\"full_sync\""
        );
    }

    #[test]
    fn record_error_omits_absent_fields() {
        let json = serde_json::to_value(SyncError::run("TOP_LEVEL", "boom")).unwrap();
        assert!(json.get("record_id").is_none());
        assert!(json.get("mapping_id").is_none());
    }
}
