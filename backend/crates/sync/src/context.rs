use relay_db::sync::models::{SyncCounters, SyncError, SyncStatus};
use uuid::Uuid;

use crate::lifecycle::terminal_status;
use crate::runs::RunHandle;

pub const TRANSFORM_FAILED: &str = "TRANSFORM_FAILED";
pub const SOURCE_UNAVAILABLE: &str = "SOURCE_UNAVAILABLE";
pub const MAPPING_CONFIG_INVALID: &str = "MAPPING_CONFIG_INVALID";
pub const IDENTITY_LOOKUP_FAILED: &str = "IDENTITY_LOOKUP_FAILED";
pub const IDENTITY_PERSIST_FAILED: &str = "IDENTITY_PERSIST_FAILED";
pub const LOCAL_WRITE_FAILED: &str = "LOCAL_WRITE_FAILED";

/// Counters and errors of one mapping within a run. Every change is also
/// published to the run handle so a cancel can freeze the live totals.
#[derive(Debug)]
pub struct MappingOutcome {
    pub mapping_id: Uuid,
    pub counters: SyncCounters,
    pub errors: Vec<SyncError>,
    pub cancelled: bool,
    run: RunHandle,
}

impl MappingOutcome {
    pub fn new(mapping_id: Uuid, run: RunHandle) -> Self {
        Self {
            mapping_id,
            counters: SyncCounters::default(),
            errors: Vec::new(),
            cancelled: false,
            run,
        }
    }

    fn apply(&mut self, delta: SyncCounters) {
        self.counters.merge(&delta);
        self.run.add(&delta);
    }

    pub fn record_created(&mut self) {
        self.apply(SyncCounters {
            processed: 1,
            created: 1,
            ..Default::default()
        });
    }

    pub fn record_updated(&mut self) {
        self.apply(SyncCounters {
            processed: 1,
            updated: 1,
            ..Default::default()
        });
    }

    pub fn record_failed(&mut self, record_id: &str, code: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(
            mapping_id = %self.mapping_id,
            record_id,
            code,
            error = %message,
            "record failed to sync"
        );
        self.errors
            .push(SyncError::record(self.mapping_id, record_id, code, message));
        self.apply(SyncCounters {
            processed: 1,
            failed: 1,
            ..Default::default()
        });
    }

    /// A failure that prevents the mapping from processing its records.
    /// `units` records are counted as failed; at least one, so a mapping that
    /// could not even read its source still registers.
    pub fn mapping_failed(&mut self, code: &str, message: impl Into<String>, units: usize) {
        let message = message.into();
        let units = i32::try_from(units.max(1)).unwrap_or(i32::MAX);
        tracing::error!(
            mapping_id = %self.mapping_id,
            code,
            units,
            error = %message,
            "mapping failed"
        );
        self.errors
            .push(SyncError::mapping(self.mapping_id, code, message));
        self.apply(SyncCounters {
            processed: units,
            failed: units,
            ..Default::default()
        });
    }

    pub fn should_stop(&mut self) -> bool {
        if self.run.is_cancelled() {
            self.cancelled = true;
        }
        self.cancelled
    }
}

/// Aggregate of every mapping outcome of a run.
#[derive(Debug, Clone, Default)]
pub struct SyncContext {
    pub counters: SyncCounters,
    pub errors: Vec<SyncError>,
    pub cancelled: bool,
    pub mappings_run: usize,
}

impl SyncContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fold(&mut self, outcome: MappingOutcome) {
        self.counters.merge(&outcome.counters);
        self.errors.extend(outcome.errors);
        self.cancelled |= outcome.cancelled;
        self.mappings_run += 1;
    }

    pub fn status(&self) -> SyncStatus {
        terminal_status(&self.counters, self.cancelled)
    }

    /// Short summary for the connection's `last_error`, `None` on a clean run.
    pub fn last_error(&self) -> Option<String> {
        if self.cancelled {
            return Some("sync cancelled".to_string());
        }
        if self.counters.failed == 0 {
            return None;
        }
        let first = self
            .errors
            .first()
            .map(|e| format!(": {}", e.message))
            .unwrap_or_default();
        Some(format!(
            "{} of {} records failed{first}",
            self.counters.failed, self.counters.processed
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome() -> (MappingOutcome, RunHandle) {
        let run = RunHandle::detached(Uuid::new_v4());
        (MappingOutcome::new(Uuid::new_v4(), run.clone()), run)
    }

    #[test]
    fn counters_are_published_to_the_run() {
        let (mut out, run) = outcome();
        out.record_created();
        out.record_updated();
        out.record_failed("b-3", TRANSFORM_FAILED, "bad number");

        assert_eq!(out.counters.processed, 3);
        assert_eq!(run.snapshot(), out.counters);
        assert_eq!(out.errors[0].record_id.as_deref(), Some("b-3"));
        assert_eq!(out.errors[0].mapping_id, Some(out.mapping_id));
    }

    #[test]
    fn mapping_failure_counts_at_least_one_unit() {
        let (mut out, _) = outcome();
        out.mapping_failed(SOURCE_UNAVAILABLE, "table missing", 0);
        assert_eq!(out.counters.failed, 1);
        assert_eq!(out.errors.len(), 1);
        assert!(out.errors[0].record_id.is_none());

        let (mut out, _) = outcome();
        out.mapping_failed(MAPPING_CONFIG_INVALID, "bad operator", 4);
        assert_eq!(out.counters.processed, 4);
        assert_eq!(out.counters.failed, 4);
        assert_eq!(out.errors.len(), 1);
    }

    #[test]
    fn context_sums_mappings() {
        let mut ctx = SyncContext::new();
        let (mut a, _) = outcome();
        a.record_created();
        a.record_created();
        let (mut b, _) = outcome();
        b.record_failed("x", TRANSFORM_FAILED, "boom");

        ctx.fold(a);
        ctx.fold(b);

        assert_eq!(ctx.counters.processed, 3);
        assert_eq!(ctx.counters.created, 2);
        assert_eq!(ctx.counters.failed, 1);
        assert_eq!(ctx.mappings_run, 2);
        assert_eq!(ctx.status(), SyncStatus::Partial);
        assert_eq!(
            ctx.last_error().as_deref(),
            Some("1 of 3 records failed: boom")
        );
    }

    #[test]
    fn clean_context_has_no_last_error() {
        let mut ctx = SyncContext::new();
        let (mut a, _) = outcome();
        a.record_updated();
        ctx.fold(a);
        assert_eq!(ctx.status(), SyncStatus::Completed);
        assert!(ctx.last_error().is_none());
    }

    #[test]
    fn cancellation_is_observed_between_records() {
        let registry = crate::runs::RunRegistry::new();
        let log_id = Uuid::new_v4();
        let guard = registry.register(log_id);
        let mut out = MappingOutcome::new(Uuid::new_v4(), guard.handle().clone());

        assert!(!out.should_stop());
        registry.cancel(log_id);
        assert!(out.should_stop());
        assert!(out.cancelled);
    }
}
