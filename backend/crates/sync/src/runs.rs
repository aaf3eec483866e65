use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use relay_db::sync::models::SyncCounters;
use uuid::Uuid;

#[derive(Debug, Default)]
struct RunState {
    processed: AtomicI32,
    created: AtomicI32,
    updated: AtomicI32,
    failed: AtomicI32,
    cancelled: AtomicBool,
}

/// Live view of one in-process run: counters published as records complete,
/// and the cooperative cancel flag the batch polls between records.
#[derive(Debug, Clone)]
pub struct RunHandle {
    log_id: Uuid,
    state: Arc<RunState>,
}

impl RunHandle {
    /// A handle not tracked by any registry.
    pub fn detached(log_id: Uuid) -> Self {
        Self {
            log_id,
            state: Arc::new(RunState::default()),
        }
    }

    pub fn log_id(&self) -> Uuid {
        self.log_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    pub fn add(&self, delta: &SyncCounters) {
        self.state.processed.fetch_add(delta.processed, Ordering::SeqCst);
        self.state.created.fetch_add(delta.created, Ordering::SeqCst);
        self.state.updated.fetch_add(delta.updated, Ordering::SeqCst);
        self.state.failed.fetch_add(delta.failed, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> SyncCounters {
        SyncCounters {
            processed: self.state.processed.load(Ordering::SeqCst),
            created: self.state.created.load(Ordering::SeqCst),
            updated: self.state.updated.load(Ordering::SeqCst),
            failed: self.state.failed.load(Ordering::SeqCst),
        }
    }

    fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Runs currently executing in this process, keyed by sync log id.
#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    runs: Arc<Mutex<HashMap<Uuid, RunHandle>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, RunHandle>> {
        // A panic while holding the lock leaves the map itself consistent.
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Track a run until the returned guard is dropped.
    pub fn register(&self, log_id: Uuid) -> RunGuard {
        let handle = RunHandle::detached(log_id);
        self.lock().insert(log_id, handle.clone());
        RunGuard {
            registry: self.clone(),
            handle,
        }
    }

    /// Flag a local run as cancelled and return its counters so far.
    /// `None` when the run is not executing in this process.
    pub fn cancel(&self, log_id: Uuid) -> Option<SyncCounters> {
        let runs = self.lock();
        let handle = runs.get(&log_id)?;
        handle.cancel();
        Some(handle.snapshot())
    }

    pub fn is_running(&self, log_id: Uuid) -> bool {
        self.lock().contains_key(&log_id)
    }

    pub fn active(&self) -> Vec<Uuid> {
        self.lock().keys().copied().collect()
    }
}

pub struct RunGuard {
    registry: RunRegistry,
    handle: RunHandle,
}

impl RunGuard {
    pub fn handle(&self) -> &RunHandle {
        &self.handle
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.handle.log_id);
    }
}
