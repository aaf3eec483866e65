pub mod adapter;
pub mod auth;
pub mod batch;
pub mod config;
pub mod context;
pub mod controller;
pub mod identity;
pub mod lifecycle;
pub mod pull;
pub mod runs;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use adapter::{AdapterError, AdapterRegistry, ExternalApiAdapter};
pub use auth::Caller;
pub use config::SyncEngineConfig;
pub use controller::{
    OperationResult, SyncController, SyncResult, SyncStatusSummary, SyncStores,
};
pub use runs::RunRegistry;
