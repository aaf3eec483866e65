use std::collections::BTreeMap;

use chrono::Utc;
use relay_common::error::{RelayError, RelayResult};
use relay_db::sync::models::{
    SyncCounters, SyncError, SyncLog, SyncLogCompletion, SyncStatus,
};
use relay_db::sync::repositories::SyncLogRepository;
use uuid::Uuid;

use crate::context::SyncContext;

/// Decide the single terminal status of a run.
///
/// `aborted` covers a top-level failure before per-record accounting and a
/// cancellation. Otherwise: no failures is `completed`, some successes next to
/// failures is `partial`, nothing but failures is `failed`.
pub fn terminal_status(counters: &SyncCounters, aborted: bool) -> SyncStatus {
    if aborted {
        return SyncStatus::Failed;
    }
    if counters.failed == 0 {
        SyncStatus::Completed
    } else if counters.succeeded() > 0 {
        SyncStatus::Partial
    } else {
        SyncStatus::Failed
    }
}

/// Record-level failures of a log grouped by mapping, ids deduplicated in
/// first-seen order. Mapping-level and run-level entries carry no record and
/// are skipped.
pub fn failed_record_ids(log: &SyncLog) -> BTreeMap<Uuid, Vec<String>> {
    let mut grouped: BTreeMap<Uuid, Vec<String>> = BTreeMap::new();

    for error in &log.errors {
        let Some(record_id) = error.record_id.as_ref() else {
            continue;
        };
        let Some(mapping_id) = error.mapping_id.or(log.mapping_id) else {
            continue;
        };
        let ids = grouped.entry(mapping_id).or_default();
        if !ids.contains(record_id) {
            ids.push(record_id.clone());
        }
    }

    grouped
}

pub fn completion_for(context: &SyncContext) -> SyncLogCompletion {
    SyncLogCompletion {
        status: context.status(),
        counters: context.counters,
        errors: context.errors.clone(),
        finished_at: Utc::now(),
    }
}

/// Close a run that aborted before per-record accounting.
pub fn abort_completion(counters: SyncCounters, error: &RelayError) -> SyncLogCompletion {
    SyncLogCompletion {
        status: SyncStatus::Failed,
        counters,
        errors: vec![SyncError::run(error.code(), error.to_string())],
        finished_at: Utc::now(),
    }
}

/// Apply the terminal write. When another writer already closed the log the
/// stored row is returned instead, so callers always report what was persisted.
pub async fn finalize(
    logs: &dyn SyncLogRepository,
    log: &SyncLog,
    completion: &SyncLogCompletion,
) -> RelayResult<SyncLog> {
    if let Some(closed) = logs.finalize(log.id, completion).await? {
        tracing::info!(
            sync_log_id = %closed.id,
            connection_id = %closed.connection_id,
            status = %closed.status,
            processed = closed.counters.processed,
            created = closed.counters.created,
            updated = closed.counters.updated,
            failed = closed.counters.failed,
            "sync run finalized"
        );
        return Ok(closed);
    }

    tracing::info!(
        sync_log_id = %log.id,
        "sync log was closed by another writer, keeping its terminal state"
    );
    logs.get_by_id(log.org_id, log.id)
        .await?
        .ok_or_else(|| RelayError::NotFound(format!("sync log {}", log.id)))
}
