mod error;
mod extractors;
mod sync;

use std::net::SocketAddr;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    routing::get,
    Json, Router,
};
use relay_config::{init_tracing, AppConfig};
use relay_sync::{AdapterRegistry, SyncController, SyncEngineConfig, SyncStores};
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct AppState {
    pub controller: SyncController,
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn info() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": "relay-api",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
        ])
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-org-id"),
            HeaderName::from_static("x-user-id"),
        ]);

    Router::new()
        .route("/health", get(health))
        .route("/info", get(info))
        .merge(sync::router())
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() {
    init_tracing("info");

    let config = AppConfig::from_env().expect("failed to load config");
    let engine_config = SyncEngineConfig::from_env().expect("failed to load sync config");
    tracing::info!(service = "relay-api", "starting");

    let pool = relay_db::create_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("failed to create database pool");
    let adapters = AdapterRegistry::from_env().expect("failed to configure adapters");

    let state = AppState {
        controller: SyncController::new(SyncStores::postgres(pool), adapters, engine_config),
    };

    let app = build_router(state);
    let addr: SocketAddr = config.bind_addr().parse().expect("invalid bind address");

    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app).await.expect("server error");
}
