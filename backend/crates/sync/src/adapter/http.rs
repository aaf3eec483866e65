use std::time::Duration;

use async_trait::async_trait;
use relay_common::error::RelayResult;
use relay_config::{get_var_or, parse_var_or};
use relay_db::connections::models::Connection;
use relay_db::records::models::{FieldValue, RecordFields};
use reqwest::{Client, Method, StatusCode, Url};
use serde_json::Value;
use uuid::Uuid;

use super::{AdapterError, ExternalApiAdapter, ExternalRecord, PushIntent, PushOutcome, PushRequest};

#[derive(Debug, Clone)]
pub struct HttpAdapterConfig {
    pub base_url: String,
    pub provider: String,
    /// Field of a response object that carries the external id.
    pub id_field: String,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl HttpAdapterConfig {
    /// Load the adapter config from environment.
    ///
    /// Returns `Ok(None)` when `RELAY_ADAPTER_BASE_URL` is not set.
    pub fn from_env() -> RelayResult<Option<Self>> {
        let base_url = match std::env::var("RELAY_ADAPTER_BASE_URL").ok() {
            Some(v) if !v.trim().is_empty() => v.trim_end_matches('/').to_string(),
            _ => return Ok(None),
        };

        Ok(Some(Self {
            base_url,
            provider: get_var_or("RELAY_ADAPTER_PROVIDER", "http"),
            id_field: get_var_or("RELAY_ADAPTER_ID_FIELD", "id"),
            max_retries: parse_var_or("RELAY_ADAPTER_MAX_RETRIES", 3)?,
            timeout_secs: parse_var_or("RELAY_ADAPTER_TIMEOUT_SECS", 30)?,
        }))
    }
}

/// Generic JSON-over-HTTP adapter.
///
/// `POST {base}/{entity}` creates, `PUT {base}/{entity}/{id}` updates and
/// `GET {base}/{entity}` lists. Requests carry the connection's access token
/// as a bearer token. Creates also carry an `Idempotency-Key` derived from
/// the connection, entity and local id, so a retried POST is recognisable.
#[derive(Clone)]
pub struct HttpAdapter {
    client: Client,
    base: Url,
    config: HttpAdapterConfig,
}

/// Seconds to wait before retry number `attempt`.
fn backoff_secs(attempt: u32) -> u64 {
    1u64.checked_shl(attempt).unwrap_or(u64::MAX).min(30)
}

/// Same key for the same local row on every run, retry and attempt.
pub fn idempotency_key(connection_id: Uuid, entity: &str, local_id: &str) -> String {
    Uuid::new_v5(&connection_id, format!("{entity}/{local_id}").as_bytes()).to_string()
}

impl HttpAdapter {
    pub fn new(config: HttpAdapterConfig) -> Result<Self, AdapterError> {
        let base = Url::parse(&config.base_url).map_err(|e| {
            AdapterError::InvalidConfig(format!("invalid base url {}: {e}", config.base_url))
        })?;
        if base.cannot_be_a_base() {
            return Err(AdapterError::InvalidConfig(format!(
                "base url {} cannot carry a path",
                config.base_url
            )));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AdapterError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            client,
            base,
            config,
        })
    }

    /// Entity and id are pushed as encoded path segments, never spliced in.
    fn url(&self, entity: &str, external_id: Option<&str>) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(entity);
            if let Some(id) = external_id {
                segments.push(id);
            }
        }
        url
    }

    fn token(connection: &Connection) -> Result<&str, AdapterError> {
        connection
            .access_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AdapterError::Auth("connection has no access token".to_string()))
    }

    fn extract_id(&self, body: &Value) -> Option<String> {
        match body.get(&self.config.id_field)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn decode_record(&self, item: Value) -> Result<ExternalRecord, AdapterError> {
        let external_id = self.extract_id(&item).ok_or_else(|| {
            AdapterError::InvalidResponse(format!(
                "listed record has no `{}` field",
                self.config.id_field
            ))
        })?;

        let Value::Object(map) = item else {
            return Err(AdapterError::InvalidResponse(
                "listed record is not an object".to_string(),
            ));
        };

        // Nested values have no local column to land in.
        let fields: RecordFields = map
            .into_iter()
            .filter_map(|(k, v)| FieldValue::try_from(v).ok().map(|v| (k, v)))
            .collect();

        Ok(ExternalRecord {
            external_id,
            fields,
        })
    }

    /// Send one request, retrying timeouts, 5xx and 429. Returns the parsed
    /// body, or `None` for an empty one.
    async fn send_with_retry(
        &self,
        method: Method,
        url: &Url,
        token: &str,
        body: Option<&Value>,
        idempotency_key: Option<&str>,
    ) -> Result<Option<Value>, AdapterError> {
        let mut last_error = String::new();

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff_secs = backoff_secs(attempt);
                tracing::warn!(attempt, backoff_secs, %url, "retrying after backoff");
                tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
            }

            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .bearer_auth(token);
            if let Some(key) = idempotency_key {
                request = request.header("Idempotency-Key", key);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = e.to_string();
                    if e.is_timeout() || e.is_connect() {
                        continue;
                    }
                    return Err(AdapterError::Transport(last_error));
                }
            };

            let status = response.status();

            if status.is_success() {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| AdapterError::Transport(e.to_string()))?;
                if bytes.iter().all(u8::is_ascii_whitespace) {
                    return Ok(None);
                }
                return serde_json::from_slice(&bytes)
                    .map(Some)
                    .map_err(|e| AdapterError::InvalidResponse(e.to_string()));
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                if let Some(retry_after) = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                {
                    let wait = std::cmp::min(retry_after, 60);
                    tracing::warn!(wait, "rate-limited, waiting Retry-After");
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                }
                last_error = "429 Too Many Requests".to_string();
                continue;
            }

            if status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                last_error = format!("{status}: {body}");
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::UNAUTHORIZED {
                return Err(AdapterError::Auth(body));
            }
            return Err(AdapterError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Err(AdapterError::MaxRetriesExceeded {
            attempts: self.config.max_retries + 1,
            last_error,
        })
    }
}

#[async_trait]
impl ExternalApiAdapter for HttpAdapter {
    fn provider(&self) -> &str {
        &self.config.provider
    }

    async fn push(&self, request: PushRequest<'_>) -> Result<PushOutcome, AdapterError> {
        let token = Self::token(request.connection)?;

        match &request.intent {
            PushIntent::Create => {
                let url = self.url(request.entity, None);
                let key =
                    idempotency_key(request.connection.id, request.entity, request.local_id);
                let body = self
                    .send_with_retry(Method::POST, &url, token, Some(request.payload), Some(&key))
                    .await?
                    .ok_or_else(|| {
                        AdapterError::InvalidResponse("create returned an empty body".to_string())
                    })?;
                let external_id = self.extract_id(&body).ok_or_else(|| {
                    AdapterError::InvalidResponse(format!(
                        "create response has no `{}` field",
                        self.config.id_field
                    ))
                })?;
                Ok(PushOutcome { external_id })
            }
            PushIntent::Update { external_id } => {
                let url = self.url(request.entity, Some(external_id));
                let body = self
                    .send_with_retry(Method::PUT, &url, token, Some(request.payload), None)
                    .await?;
                // Some systems re-key on update; otherwise the id is unchanged.
                let external_id = body
                    .as_ref()
                    .and_then(|b| self.extract_id(b))
                    .unwrap_or_else(|| external_id.clone());
                Ok(PushOutcome { external_id })
            }
        }
    }

    async fn list(
        &self,
        connection: &Connection,
        entity: &str,
    ) -> Result<Vec<ExternalRecord>, AdapterError> {
        let token = Self::token(connection)?;
        let url = self.url(entity, None);
        let body = self
            .send_with_retry(Method::GET, &url, token, None, None)
            .await?
            .unwrap_or(Value::Array(Vec::new()));

        let Value::Array(items) = body else {
            return Err(AdapterError::InvalidResponse(
                "list response is not an array".to_string(),
            ));
        };

        items.into_iter().map(|item| self.decode_record(item)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::connection;
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer, max_retries: u32) -> HttpAdapter {
        HttpAdapter::new(HttpAdapterConfig {
            base_url: server.uri(),
            provider: "ledger".to_string(),
            id_field: "Id".to_string(),
            max_retries,
            timeout_secs: 5,
        })
        .unwrap()
    }

    fn conn() -> Connection {
        connection(Uuid::new_v4(), "ledger")
    }

    #[tokio::test]
    async fn create_posts_payload_and_reads_id() {
        let server = MockServer::start().await;
        let payload = json!({"DocNumber": "B-1", "TotalAmt": 10});

        Mock::given(method("POST"))
            .and(path("/Invoice"))
            .and(header("authorization", "Bearer test-token"))
            .and(body_json(&payload))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Id": 981})))
            .expect(1)
            .mount(&server)
            .await;

        let conn = conn();
        let outcome = adapter(&server, 0)
            .push(PushRequest {
                connection: &conn,
                entity: "Invoice",
                local_id: "b-1",
                intent: PushIntent::Create,
                payload: &payload,
            })
            .await
            .unwrap();
        assert_eq!(outcome.external_id, "981");
    }

    #[tokio::test]
    async fn update_puts_to_record_url_and_keeps_id_on_empty_body() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/Invoice/EXT-7"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let conn = conn();
        let outcome = adapter(&server, 0)
            .push(PushRequest {
                connection: &conn,
                entity: "Invoice",
                local_id: "b-1",
                intent: PushIntent::Update {
                    external_id: "EXT-7".to_string(),
                },
                payload: &json!({"DocNumber": "B-1"}),
            })
            .await
            .unwrap();
        assert_eq!(outcome.external_id, "EXT-7");
    }

    #[tokio::test]
    async fn retries_on_500() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/Invoice"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/Invoice"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"Id": "A1"})))
            .mount(&server)
            .await;

        let conn = conn();
        let outcome = adapter(&server, 2)
            .push(PushRequest {
                connection: &conn,
                entity: "Invoice",
                local_id: "b-1",
                intent: PushIntent::Create,
                payload: &json!({}),
            })
            .await
            .unwrap();
        assert_eq!(outcome.external_id, "A1");
    }

    #[tokio::test]
    async fn fails_fast_on_422() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/Invoice"))
            .respond_with(ResponseTemplate::new(422).set_body_string("DocNumber required"))
            .expect(1)
            .mount(&server)
            .await;

        let conn = conn();
        let err = adapter(&server, 3)
            .push(PushRequest {
                connection: &conn,
                entity: "Invoice",
                local_id: "b-1",
                intent: PushIntent::Create,
                payload: &json!({}),
            })
            .await
            .unwrap_err();

        match err {
            AdapterError::Rejected { status, body } => {
                assert_eq!(status, 422);
                assert_eq!(body, "DocNumber required");
            }
            other => panic!("expected Rejected, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unauthorized_maps_to_auth_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/Invoice"))
            .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
            .mount(&server)
            .await;

        let err = adapter(&server, 0).list(&conn(), "Invoice").await.unwrap_err();
        assert_eq!(err.code(), "EXTERNAL_AUTH");
    }

    #[tokio::test]
    async fn max_retries_exceeded() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/Invoice"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let conn = conn();
        let err = adapter(&server, 1)
            .push(PushRequest {
                connection: &conn,
                entity: "Invoice",
                local_id: "b-1",
                intent: PushIntent::Create,
                payload: &json!({}),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AdapterError::MaxRetriesExceeded { attempts: 2, .. }
        ));
    }

    #[tokio::test]
    async fn create_without_id_is_invalid_response() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/Invoice"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let conn = conn();
        let err = adapter(&server, 0)
            .push(PushRequest {
                connection: &conn,
                entity: "Invoice",
                local_id: "b-1",
                intent: PushIntent::Create,
                payload: &json!({}),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "EXTERNAL_INVALID_RESPONSE");
    }

    #[tokio::test]
    async fn list_decodes_scalar_fields() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/Customer"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"Id": "C1", "DisplayName": "Acme", "Balance": 12.5, "Meta": {"v": 1}},
                {"Id": 2, "DisplayName": "Globex"}
            ])))
            .mount(&server)
            .await;

        let records = adapter(&server, 0).list(&conn(), "Customer").await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].external_id, "C1");
        assert_eq!(records[0].fields["DisplayName"], FieldValue::from("Acme"));
        assert!(!records[0].fields.contains_key("Meta"));
        assert_eq!(records[1].external_id, "2");
    }

    #[tokio::test]
    async fn missing_token_fails_before_any_request() {
        let server = MockServer::start().await;
        let mut conn = conn();
        conn.access_token = None;

        let err = adapter(&server, 0).list(&conn, "Customer").await.unwrap_err();
        assert!(matches!(err, AdapterError::Auth(_)));
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn retried_create_reuses_its_idempotency_key() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/Invoice"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/Invoice"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"Id": "A1"})))
            .mount(&server)
            .await;

        let conn = conn();
        adapter(&server, 1)
            .push(PushRequest {
                connection: &conn,
                entity: "Invoice",
                local_id: "b-1",
                intent: PushIntent::Create,
                payload: &json!({}),
            })
            .await
            .unwrap();

        let expected = idempotency_key(conn.id, "Invoice", "b-1");
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        for request in &requests {
            let key = request
                .headers
                .get("idempotency-key")
                .and_then(|v| v.to_str().ok());
            assert_eq!(key, Some(expected.as_str()));
        }
    }

    #[test]
    fn idempotency_key_is_stable_per_row() {
        let connection_id = Uuid::new_v4();
        let key = idempotency_key(connection_id, "Invoice", "b-1");
        assert_eq!(key, idempotency_key(connection_id, "Invoice", "b-1"));
        assert_ne!(key, idempotency_key(connection_id, "Invoice", "b-2"));
        assert_ne!(key, idempotency_key(connection_id, "Bill", "b-1"));
        assert_ne!(key, idempotency_key(Uuid::new_v4(), "Invoice", "b-1"));
    }

    #[tokio::test]
    async fn updates_do_not_send_an_idempotency_key() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/Invoice/EXT-7"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let conn = conn();
        adapter(&server, 0)
            .push(PushRequest {
                connection: &conn,
                entity: "Invoice",
                local_id: "b-1",
                intent: PushIntent::Update {
                    external_id: "EXT-7".to_string(),
                },
                payload: &json!({}),
            })
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        assert!(requests[0].headers.get("idempotency-key").is_none());
    }

    #[tokio::test]
    async fn external_ids_are_encoded_as_one_path_segment() {
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/Invoice/A%2FB%3Fx"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let conn = conn();
        let outcome = adapter(&server, 0)
            .push(PushRequest {
                connection: &conn,
                entity: "Invoice",
                local_id: "b-1",
                intent: PushIntent::Update {
                    external_id: "A/B?x".to_string(),
                },
                payload: &json!({}),
            })
            .await
            .unwrap();
        assert_eq!(outcome.external_id, "A/B?x");
    }

    #[tokio::test]
    async fn base_url_path_is_kept() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v2/Customer"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = HttpAdapter::new(HttpAdapterConfig {
            base_url: format!("{}/api/v2", server.uri()),
            provider: "ledger".to_string(),
            id_field: "Id".to_string(),
            max_retries: 0,
            timeout_secs: 5,
        })
        .unwrap();
        assert!(adapter.list(&conn(), "Customer").await.unwrap().is_empty());
    }

    #[test]
    fn malformed_base_url_is_rejected() {
        let err = HttpAdapter::new(HttpAdapterConfig {
            base_url: "ledger.example".to_string(),
            provider: "ledger".to_string(),
            id_field: "Id".to_string(),
            max_retries: 0,
            timeout_secs: 5,
        })
        .err()
        .unwrap();
        assert_eq!(err.code(), "ADAPTER_CONFIG_INVALID");
    }

    #[test]
    fn backoff_is_capped_for_any_attempt() {
        assert_eq!(backoff_secs(1), 2);
        assert_eq!(backoff_secs(4), 16);
        assert_eq!(backoff_secs(5), 30);
        assert_eq!(backoff_secs(64), 30);
        assert_eq!(backoff_secs(u32::MAX), 30);
    }

    #[test]
    fn config_is_absent_without_base_url() {
        std::env::remove_var("RELAY_ADAPTER_BASE_URL");
        assert!(HttpAdapterConfig::from_env().unwrap().is_none());
    }
}
