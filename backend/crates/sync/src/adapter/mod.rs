pub mod http;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use relay_common::error::{RelayError, RelayResult};
use relay_db::connections::models::{Connection, ConnectionCredentials};
use relay_db::records::models::RecordFields;

pub use http::{HttpAdapter, HttpAdapterConfig};

/// Whether a push creates a new external record or overwrites a known one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushIntent {
    Create,
    Update { external_id: String },
}

#[derive(Debug, Clone)]
pub struct PushRequest<'a> {
    pub connection: &'a Connection,
    pub entity: &'a str,
    /// Id of the local row being pushed; stable across runs and retries.
    pub local_id: &'a str,
    pub intent: PushIntent,
    pub payload: &'a serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOutcome {
    pub external_id: String,
}

/// One record read from the external system during a pull.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalRecord {
    pub external_id: String,
    pub fields: RecordFields,
}

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },

    #[error("unexpected response: {0}")]
    InvalidResponse(String),

    #[error("credentials rejected: {0}")]
    Auth(String),

    #[error("adapter misconfigured: {0}")]
    InvalidConfig(String),

    #[error("`{operation}` is not supported by provider `{provider}`")]
    Unsupported {
        provider: String,
        operation: &'static str,
    },
}

impl AdapterError {
    /// Code stored on the sync error entry for the failed record.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Rejected { .. } => "EXTERNAL_REJECTED",
            Self::Transport(_) => "EXTERNAL_UNAVAILABLE",
            Self::MaxRetriesExceeded { .. } => "EXTERNAL_RETRIES_EXHAUSTED",
            Self::InvalidResponse(_) => "EXTERNAL_INVALID_RESPONSE",
            Self::Auth(_) => "EXTERNAL_AUTH",
            Self::InvalidConfig(_) => "ADAPTER_CONFIG_INVALID",
            Self::Unsupported { .. } => "UNSUPPORTED",
        }
    }
}

/// The contract between the engine and one third-party system.
///
/// Only `push` is required. Adapters that cannot list records or refresh
/// tokens inherit the `Unsupported` defaults, which the engine reports as a
/// mapping-level or precondition error respectively.
#[async_trait]
pub trait ExternalApiAdapter: Send + Sync {
    fn provider(&self) -> &str;

    async fn push(&self, request: PushRequest<'_>) -> Result<PushOutcome, AdapterError>;

    async fn list(
        &self,
        _connection: &Connection,
        _entity: &str,
    ) -> Result<Vec<ExternalRecord>, AdapterError> {
        Err(AdapterError::Unsupported {
            provider: self.provider().to_string(),
            operation: "list",
        })
    }

    async fn refresh_credentials(
        &self,
        _connection: &Connection,
    ) -> Result<ConnectionCredentials, AdapterError> {
        Err(AdapterError::Unsupported {
            provider: self.provider().to_string(),
            operation: "refresh_credentials",
        })
    }
}

/// Adapters keyed by the `provider` column of a connection.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ExternalApiAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any previous one for the same provider.
    pub fn register(&mut self, adapter: Arc<dyn ExternalApiAdapter>) {
        let provider = adapter.provider().to_string();
        tracing::info!(%provider, "registered external adapter");
        self.adapters.insert(provider, adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn ExternalApiAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, provider: &str) -> Option<Arc<dyn ExternalApiAdapter>> {
        self.adapters.get(provider).cloned()
    }

    pub fn providers(&self) -> Vec<&str> {
        let mut providers: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        providers.sort_unstable();
        providers
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Registry holding the env-configured HTTP adapter, or nothing when
    /// `RELAY_ADAPTER_BASE_URL` is unset.
    pub fn from_env() -> RelayResult<Self> {
        let mut registry = Self::new();
        match HttpAdapterConfig::from_env()? {
            Some(config) => {
                let adapter = HttpAdapter::new(config).map_err(|e| {
                    RelayError::Config(format!("failed to build http adapter: {e}"))
                })?;
                registry.register(Arc::new(adapter));
            }
            None => tracing::warn!("RELAY_ADAPTER_BASE_URL not set, no external adapter registered"),
        }
        Ok(registry)
    }
}
