use std::sync::Arc;

use chrono::Utc;
use relay_common::error::{RelayError, RelayResult};
use relay_db::connections::models::{Connection, TokenState};
use relay_db::connections::pg_repository::PgConnectionRepository;
use relay_db::connections::repositories::ConnectionRepository;
use relay_db::external_ids::pg_repository::PgExternalIdRepository;
use relay_db::external_ids::repositories::ExternalIdRepository;
use relay_db::mappings::models::SyncMapping;
use relay_db::mappings::pg_repository::PgSyncMappingRepository;
use relay_db::mappings::repositories::SyncMappingRepository;
use relay_db::members::pg_repository::PgMemberRepository;
use relay_db::members::repositories::MemberRepository;
use relay_db::records::pg_repository::PgLocalRecordStore;
use relay_db::records::repositories::LocalRecordStore;
use relay_db::sync::models::{
    NewSyncLog, SyncCounters, SyncError, SyncLog, SyncLogCompletion, SyncStatus, SyncType,
};
use relay_db::sync::pg_repository::PgSyncLogRepository;
use relay_db::sync::repositories::SyncLogRepository;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use sqlx::PgPool;
use uuid::Uuid;

use crate::adapter::{AdapterRegistry, ExternalApiAdapter};
use crate::auth::{authorize, Caller};
use crate::batch::{BatchProcessor, BatchScope};
use crate::config::SyncEngineConfig;
use crate::context::SyncContext;
use crate::lifecycle;
use crate::runs::{RunGuard, RunHandle, RunRegistry};

/// Every persistence collaborator the engine needs.
#[derive(Clone)]
pub struct SyncStores {
    pub connections: Arc<dyn ConnectionRepository>,
    pub mappings: Arc<dyn SyncMappingRepository>,
    pub external_ids: Arc<dyn ExternalIdRepository>,
    pub logs: Arc<dyn SyncLogRepository>,
    pub records: Arc<dyn LocalRecordStore>,
    pub members: Arc<dyn MemberRepository>,
}

impl SyncStores {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            connections: Arc::new(PgConnectionRepository::new(pool.clone())),
            mappings: Arc::new(PgSyncMappingRepository::new(pool.clone())),
            external_ids: Arc::new(PgExternalIdRepository::new(pool.clone())),
            logs: Arc::new(PgSyncLogRepository::new(pool.clone())),
            records: Arc::new(PgLocalRecordStore::new(pool.clone())),
            members: Arc::new(PgMemberRepository::new(pool)),
        }
    }
}

/// Tagged result of a public operation: `{success: true, data}` or
/// `{success: false, error: {code, message}}`.
#[derive(Debug)]
pub enum OperationResult<T> {
    Success(T),
    Failure(RelayError),
}

impl<T> OperationResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            Self::Success(data) => Some(data),
            Self::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&RelayError> {
        match self {
            Self::Success(_) => None,
            Self::Failure(err) => Some(err),
        }
    }

    pub fn into_result(self) -> RelayResult<T> {
        match self {
            Self::Success(data) => Ok(data),
            Self::Failure(err) => Err(err),
        }
    }
}

impl<T> From<RelayResult<T>> for OperationResult<T> {
    fn from(result: RelayResult<T>) -> Self {
        match result {
            Ok(data) => Self::Success(data),
            Err(err) => Self::Failure(err),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl<T: Serialize> Serialize for OperationResult<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("OperationResult", 2)?;
        match self {
            Self::Success(data) => {
                state.serialize_field("success", &true)?;
                state.serialize_field("data", data)?;
            }
            Self::Failure(err) => {
                state.serialize_field("success", &false)?;
                state.serialize_field(
                    "error",
                    &ErrorBody {
                        code: err.code(),
                        message: err.to_string(),
                    },
                )?;
            }
        }
        state.end()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub sync_log_id: Uuid,
    pub status: SyncStatus,
    pub records_processed: i32,
    pub records_created: i32,
    pub records_updated: i32,
    pub records_failed: i32,
    pub errors: Vec<SyncError>,
}

impl From<&SyncLog> for SyncResult {
    fn from(log: &SyncLog) -> Self {
        Self {
            sync_log_id: log.id,
            status: log.status,
            records_processed: log.counters.processed,
            records_created: log.counters.created,
            records_updated: log.counters.updated,
            records_failed: log.counters.failed,
            errors: log.errors.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatusSummary {
    pub last_sync: Option<SyncLog>,
    pub is_running: bool,
    pub total_syncs: i64,
    pub success_rate: f64,
}

/// Share of completed runs, in percent. Zero with no history.
pub fn success_rate(completed: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    completed as f64 / total as f64 * 100.0
}

/// A run ready to execute: credentials checked, mappings resolved.
struct RunPlan {
    connection: Connection,
    adapter: Arc<dyn ExternalApiAdapter>,
    batches: Vec<(SyncMapping, BatchScope)>,
    sync_type: SyncType,
    mapping_id: Option<Uuid>,
    retry_of: Option<Uuid>,
}

/// Public entry points of the sync engine.
#[derive(Clone)]
pub struct SyncController {
    stores: SyncStores,
    adapters: AdapterRegistry,
    runs: RunRegistry,
    config: SyncEngineConfig,
}

impl SyncController {
    pub fn new(stores: SyncStores, adapters: AdapterRegistry, config: SyncEngineConfig) -> Self {
        Self {
            stores,
            adapters,
            runs: RunRegistry::new(),
            config,
        }
    }

    pub fn runs(&self) -> &RunRegistry {
        &self.runs
    }

    /// Run a sync of one connection, either every active mapping or the one
    /// given.
    pub async fn trigger_manual_sync(
        &self,
        caller: &Caller,
        connection_id: Uuid,
        mapping_id: Option<Uuid>,
        sync_type: SyncType,
    ) -> OperationResult<SyncResult> {
        let result = self
            .trigger(caller, connection_id, mapping_id, sync_type)
            .await;
        if let Err(e) = &result {
            tracing::warn!(%connection_id, code = e.code(), error = %e, "sync trigger failed");
        }
        result.into()
    }

    /// Re-run only the records a failed or partial run lost, as a new run.
    pub async fn retry_failed_sync(
        &self,
        caller: &Caller,
        sync_log_id: Uuid,
    ) -> OperationResult<SyncResult> {
        let result = self.retry(caller, sync_log_id).await;
        if let Err(e) = &result {
            tracing::warn!(%sync_log_id, code = e.code(), error = %e, "sync retry failed");
        }
        result.into()
    }

    pub async fn get_sync_status(
        &self,
        caller: &Caller,
        connection_id: Uuid,
    ) -> OperationResult<SyncStatusSummary> {
        self.status(caller, connection_id).await.into()
    }

    /// Close a running log as failed. The batch, if it is local, stops at the
    /// next record; in-flight external calls are not interrupted.
    pub async fn cancel_sync(&self, caller: &Caller, sync_log_id: Uuid) -> OperationResult<()> {
        let result = self.cancel(caller, sync_log_id).await;
        if let Err(e) = &result {
            tracing::warn!(%sync_log_id, code = e.code(), error = %e, "sync cancel failed");
        }
        result.into()
    }

    /// Full sync of every active connection of an org, in the system context.
    pub async fn sync_all_active(&self, org_id: Uuid) -> Vec<(Uuid, OperationResult<SyncResult>)> {
        let caller = Caller::system(org_id);
        let connections = match self.stores.connections.list_active(org_id).await {
            Ok(connections) => connections,
            Err(e) => {
                tracing::error!(%org_id, error = %e, "failed to list active connections");
                return Vec::new();
            }
        };

        tracing::info!(%org_id, count = connections.len(), "syncing active connections");

        let mut results = Vec::with_capacity(connections.len());
        for connection in connections {
            let result = self
                .trigger_manual_sync(&caller, connection.id, None, SyncType::FullSync)
                .await;
            results.push((connection.id, result));
        }
        results
    }

    async fn trigger(
        &self,
        caller: &Caller,
        connection_id: Uuid,
        mapping_id: Option<Uuid>,
        sync_type: SyncType,
    ) -> RelayResult<SyncResult> {
        authorize(self.stores.members.as_ref(), caller).await?;

        let connection = self.load_connection(caller, connection_id).await?;
        let adapter = self.adapter_for(&connection)?;
        let connection = self.ensure_credentials(connection, adapter.as_ref()).await?;

        let mappings = match mapping_id {
            Some(id) => vec![self.load_mapping(connection.id, id).await?],
            None => {
                let mappings = self
                    .stores
                    .mappings
                    .list_for_connection(connection.id, true)
                    .await
                    .map_err(config_precondition)?;
                if mappings.is_empty() {
                    return Err(RelayError::Precondition(
                        "connection has no active mappings".to_string(),
                    ));
                }
                mappings
            }
        };

        self.execute(
            caller,
            RunPlan {
                connection,
                adapter,
                batches: mappings
                    .into_iter()
                    .map(|m| (m, BatchScope::All))
                    .collect(),
                sync_type,
                mapping_id,
                retry_of: None,
            },
        )
        .await
    }

    async fn retry(&self, caller: &Caller, sync_log_id: Uuid) -> RelayResult<SyncResult> {
        authorize(self.stores.members.as_ref(), caller).await?;

        let original = self
            .stores
            .logs
            .get_by_id(caller.org_id, sync_log_id)
            .await?
            .ok_or_else(|| RelayError::NotFound(format!("sync log {sync_log_id}")))?;

        if !original.status.is_retryable() {
            return Err(RelayError::Precondition(format!(
                "only failed or partial syncs can be retried, this one is {}",
                original.status
            )));
        }

        let failed = lifecycle::failed_record_ids(&original);
        if failed.is_empty() {
            return Err(RelayError::Precondition(
                "sync log has no failed records to retry".to_string(),
            ));
        }

        let connection = self.load_connection(caller, original.connection_id).await?;
        let adapter = self.adapter_for(&connection)?;
        let connection = self.ensure_credentials(connection, adapter.as_ref()).await?;

        let mut batches = Vec::with_capacity(failed.len());
        for (mapping_id, ids) in failed {
            let mapping = self.load_mapping(connection.id, mapping_id).await?;
            batches.push((mapping, BatchScope::Only(ids)));
        }

        let records: usize = batches
            .iter()
            .map(|(_, scope)| match scope {
                BatchScope::Only(ids) => ids.len(),
                BatchScope::All => 0,
            })
            .sum();
        tracing::info!(%sync_log_id, mappings = batches.len(), records, "retrying failed records");

        self.execute(
            caller,
            RunPlan {
                connection,
                adapter,
                batches,
                sync_type: original.sync_type,
                mapping_id: original.mapping_id,
                retry_of: Some(original.id),
            },
        )
        .await
    }

    async fn status(&self, caller: &Caller, connection_id: Uuid) -> RelayResult<SyncStatusSummary> {
        authorize(self.stores.members.as_ref(), caller).await?;
        self.stores
            .connections
            .get_by_id(caller.org_id, connection_id)
            .await?
            .ok_or_else(|| RelayError::NotFound(format!("connection {connection_id}")))?;

        let stats = self
            .stores
            .logs
            .stats_for_connection(caller.org_id, connection_id)
            .await?;

        Ok(SyncStatusSummary {
            is_running: stats.running > 0,
            total_syncs: stats.total,
            success_rate: success_rate(stats.completed, stats.total),
            last_sync: stats.last,
        })
    }

    async fn cancel(&self, caller: &Caller, sync_log_id: Uuid) -> RelayResult<()> {
        authorize(self.stores.members.as_ref(), caller).await?;

        let log = self
            .stores
            .logs
            .get_by_id(caller.org_id, sync_log_id)
            .await?
            .ok_or_else(|| RelayError::NotFound(format!("sync log {sync_log_id}")))?;

        if log.status != SyncStatus::Running {
            return Err(RelayError::Precondition(format!(
                "only running syncs can be cancelled, this one is {}",
                log.status
            )));
        }

        let counters = match self.runs.cancel(log.id) {
            Some(live) => live,
            None => {
                tracing::info!(%sync_log_id, "run is not local, freezing persisted counters");
                log.counters
            }
        };

        let mut errors = log.errors.clone();
        errors.push(SyncError::cancelled());
        let completion = SyncLogCompletion {
            status: SyncStatus::Failed,
            counters,
            errors,
            finished_at: Utc::now(),
        };

        if self.stores.logs.finalize(log.id, &completion).await?.is_none() {
            return Err(RelayError::Precondition(
                "sync finished before it could be cancelled".to_string(),
            ));
        }

        tracing::info!(%sync_log_id, processed = counters.processed, "sync cancelled");
        self.stamp_connection(log.connection_id, Some("sync cancelled"))
            .await;
        Ok(())
    }

    async fn load_connection(&self, caller: &Caller, connection_id: Uuid) -> RelayResult<Connection> {
        let connection = self
            .stores
            .connections
            .get_by_id(caller.org_id, connection_id)
            .await?
            .ok_or_else(|| RelayError::NotFound(format!("connection {connection_id}")))?;

        if !connection.is_active {
            return Err(RelayError::Precondition(format!(
                "connection {connection_id} is inactive"
            )));
        }
        Ok(connection)
    }

    fn adapter_for(&self, connection: &Connection) -> RelayResult<Arc<dyn ExternalApiAdapter>> {
        self.adapters.get(&connection.provider).ok_or_else(|| {
            RelayError::Precondition(format!(
                "no adapter registered for provider {}",
                connection.provider
            ))
        })
    }

    async fn load_mapping(&self, connection_id: Uuid, mapping_id: Uuid) -> RelayResult<SyncMapping> {
        let mapping = self
            .stores
            .mappings
            .get_by_id(connection_id, mapping_id)
            .await
            .map_err(config_precondition)?
            .ok_or_else(|| {
                RelayError::Precondition(format!(
                    "mapping {mapping_id} does not belong to connection {connection_id}"
                ))
            })?;

        if !mapping.is_active {
            return Err(RelayError::Precondition(format!(
                "mapping {mapping_id} is inactive"
            )));
        }
        Ok(mapping)
    }

    /// Make sure the token will last the run, refreshing it through the
    /// adapter when it has expired and a refresh token is on file.
    async fn ensure_credentials(
        &self,
        connection: Connection,
        adapter: &dyn ExternalApiAdapter,
    ) -> RelayResult<Connection> {
        match connection.token_state(Utc::now(), self.config.token_skew()) {
            TokenState::Usable => Ok(connection),
            TokenState::Unusable => Err(RelayError::Precondition(
                "connection credentials are missing or expired".to_string(),
            )),
            TokenState::Refreshable => {
                tracing::info!(connection_id = %connection.id, "refreshing expired token");
                let credentials = adapter
                    .refresh_credentials(&connection)
                    .await
                    .map_err(|e| RelayError::Precondition(format!("token refresh failed: {e}")))?;
                self.stores
                    .connections
                    .update_credentials(connection.id, &credentials)
                    .await
            }
        }
    }

    /// Open the log, run every batch, and close the log exactly once.
    ///
    /// The run is registered under its log id before the row is written, so a
    /// cancel can never land on a running log the registry does not know.
    /// Everything after the insert runs on its own task: a caller that goes
    /// away mid-run (a dropped request) does not stop the terminal write.
    async fn execute(&self, caller: &Caller, plan: RunPlan) -> RelayResult<SyncResult> {
        let guard = self.runs.register(Uuid::new_v4());
        let log_id = guard.handle().log_id();

        let log = self
            .stores
            .logs
            .create_running(NewSyncLog {
                id: log_id,
                org_id: caller.org_id,
                connection_id: plan.connection.id,
                mapping_id: plan.mapping_id,
                sync_type: plan.sync_type,
                retry_of: plan.retry_of,
                triggered_by: Some(caller.actor()),
            })
            .await?;

        tracing::info!(
            sync_log_id = %log.id,
            connection_id = %plan.connection.id,
            sync_type = %plan.sync_type,
            mappings = plan.batches.len(),
            retry_of = ?plan.retry_of,
            "sync run started"
        );

        let controller = self.clone();
        let task = tokio::spawn(async move { controller.complete_run(plan, log, guard).await });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(sync_log_id = %log_id, error = %e, "sync run task died");
                let err = RelayError::Internal(format!("sync run task failed: {e}"));
                let abort = lifecycle::abort_completion(SyncCounters::default(), &err);
                if let Err(second) = self.stores.logs.finalize(log_id, &abort).await {
                    tracing::error!(sync_log_id = %log_id, error = %second, "sync log left open");
                }
                Err(err)
            }
        }
    }

    async fn complete_run(
        &self,
        plan: RunPlan,
        log: SyncLog,
        guard: RunGuard,
    ) -> RelayResult<SyncResult> {
        let context = self.run_batches(&plan, guard.handle()).await;
        let completion = lifecycle::completion_for(&context);

        let closed = match lifecycle::finalize(self.stores.logs.as_ref(), &log, &completion).await {
            Ok(closed) => closed,
            Err(e) => {
                tracing::error!(sync_log_id = %log.id, error = %e, "failed to finalize sync log");
                // Last attempt to keep the log from staying `running`.
                let abort = lifecycle::abort_completion(context.counters, &e);
                if let Err(second) = self.stores.logs.finalize(log.id, &abort).await {
                    tracing::error!(sync_log_id = %log.id, error = %second, "sync log left open");
                }
                return Err(e);
            }
        };
        drop(guard);

        let last_error = match closed.status {
            SyncStatus::Completed => None,
            _ => context.last_error().or_else(|| Some(closed.status.to_string())),
        };
        self.stamp_connection(plan.connection.id, last_error.as_deref())
            .await;

        Ok(SyncResult::from(&closed))
    }

    async fn run_batches(&self, plan: &RunPlan, run: &RunHandle) -> SyncContext {
        let processor =
            BatchProcessor::new(&self.stores, plan.adapter.as_ref(), &plan.connection, run);
        let mut context = SyncContext::new();

        for (mapping, scope) in &plan.batches {
            if run.is_cancelled() {
                context.cancelled = true;
                break;
            }
            let outcome = match plan.sync_type {
                SyncType::Push | SyncType::FullSync => processor.push(mapping, scope).await,
                SyncType::Pull => processor.pull(mapping, scope).await,
            };
            tracing::info!(
                mapping_id = %mapping.id,
                processed = outcome.counters.processed,
                failed = outcome.counters.failed,
                "mapping batch finished"
            );
            context.fold(outcome);
        }

        context
    }

    async fn stamp_connection(&self, connection_id: Uuid, last_error: Option<&str>) {
        if let Err(e) = self
            .stores
            .connections
            .record_sync_result(connection_id, Utc::now(), last_error)
            .await
        {
            tracing::warn!(%connection_id, error = %e, "failed to record last sync on connection");
        }
    }
}

/// Undecodable mapping configuration blocks the run before it starts.
fn config_precondition(err: RelayError) -> RelayError {
    match err {
        RelayError::Config(msg) => {
            RelayError::Precondition(format!("invalid mapping configuration: {msg}"))
        }
        other => other,
    }
}
