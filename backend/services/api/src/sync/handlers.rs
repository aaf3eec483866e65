use axum::extract::{Path, State};
use axum::Json;
use relay_sync::{SyncResult, SyncStatusSummary};
use uuid::Uuid;

use crate::error::OperationResponse;
use crate::extractors::CallerContext;
use crate::sync::requests::TriggerSyncRequest;
use crate::AppState;

pub async fn trigger_sync(
    State(state): State<AppState>,
    CallerContext(caller): CallerContext,
    Path(connection_id): Path<Uuid>,
    Json(body): Json<TriggerSyncRequest>,
) -> OperationResponse<SyncResult> {
    OperationResponse(
        state
            .controller
            .trigger_manual_sync(&caller, connection_id, body.mapping_id, body.sync_type)
            .await,
    )
}

pub async fn get_sync_status(
    State(state): State<AppState>,
    CallerContext(caller): CallerContext,
    Path(connection_id): Path<Uuid>,
) -> OperationResponse<SyncStatusSummary> {
    OperationResponse(state.controller.get_sync_status(&caller, connection_id).await)
}

pub async fn retry_sync(
    State(state): State<AppState>,
    CallerContext(caller): CallerContext,
    Path(sync_log_id): Path<Uuid>,
) -> OperationResponse<SyncResult> {
    OperationResponse(state.controller.retry_failed_sync(&caller, sync_log_id).await)
}

pub async fn cancel_sync(
    State(state): State<AppState>,
    CallerContext(caller): CallerContext,
    Path(sync_log_id): Path<Uuid>,
) -> OperationResponse<()> {
    OperationResponse(state.controller.cancel_sync(&caller, sync_log_id).await)
}
