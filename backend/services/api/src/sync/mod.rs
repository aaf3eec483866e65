pub mod handlers;
pub mod requests;

use axum::routing::{get, post};
use axum::Router;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/connections/{id}/sync", post(handlers::trigger_sync))
        .route("/connections/{id}/sync-status", get(handlers::get_sync_status))
        .route("/sync-logs/{id}/retry", post(handlers::retry_sync))
        .route("/sync-logs/{id}/cancel", post(handlers::cancel_sync))
}
