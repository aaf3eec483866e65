//! In-memory stores and a scriptable adapter for exercising the engine without
//! Postgres or a live external system.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use relay_common::error::{RelayError, RelayResult};
use relay_db::connections::models::{Connection, ConnectionCredentials};
use relay_db::connections::repositories::ConnectionRepository;
use relay_db::external_ids::models::{ExternalIdMapping, ExternalIdUpsert};
use relay_db::external_ids::repositories::ExternalIdRepository;
use relay_db::mappings::models::{FieldRule, FilterCondition, SyncMapping};
use relay_db::mappings::repositories::SyncMappingRepository;
use relay_db::members::models::Role;
use relay_db::members::repositories::MemberRepository;
use relay_db::records::models::{FieldValue, LocalRecord, RecordFields};
use relay_db::records::repositories::LocalRecordStore;
use relay_db::sync::models::{
    NewSyncLog, SyncCounters, SyncError, SyncLog, SyncLogCompletion, SyncLogStats, SyncStatus,
    SyncType,
};
use relay_db::sync::repositories::SyncLogRepository;
use serde_json::{json, Value};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::adapter::{
    AdapterError, ExternalApiAdapter, ExternalRecord, PushIntent, PushOutcome, PushRequest,
};
use crate::controller::SyncStores;

// ── Fixtures ────────────────────────────────────────────────────

pub fn connection(org_id: Uuid, provider: &str) -> Connection {
    let now = Utc::now();
    Connection {
        id: Uuid::new_v4(),
        org_id,
        provider: provider.to_string(),
        name: format!("{provider} connection"),
        is_active: true,
        access_token: Some("test-token".to_string()),
        refresh_token: None,
        token_expires_at: None,
        last_sync_at: None,
        last_error: None,
        created_at: now,
        updated_at: now,
    }
}

/// `bookings` → `Invoice`, excluding drafts.
pub fn booking_mapping(connection_id: Uuid) -> SyncMapping {
    let now = Utc::now();
    SyncMapping {
        id: Uuid::new_v4(),
        connection_id,
        name: "Bookings to invoices".to_string(),
        local_table: "bookings".to_string(),
        external_entity: "Invoice".to_string(),
        field_mappings: vec![
            FieldRule::new("reference", "DocNumber"),
            FieldRule::new("customer", "CustomerName"),
            FieldRule::new("amount", "TotalAmt"),
        ],
        filters: vec![FilterCondition::new("status", "neq", json!("draft"))],
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

/// `Customer` → `customers`, for inbound runs.
pub fn customer_mapping(connection_id: Uuid) -> SyncMapping {
    let now = Utc::now();
    SyncMapping {
        id: Uuid::new_v4(),
        connection_id,
        name: "Customers".to_string(),
        local_table: "customers".to_string(),
        external_entity: "Customer".to_string(),
        field_mappings: vec![
            FieldRule::new("name", "DisplayName"),
            FieldRule::new("email", "PrimaryEmail"),
        ],
        filters: Vec::new(),
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

pub fn external(external_id: &str, display_name: &str) -> ExternalRecord {
    let mut fields = RecordFields::new();
    fields.insert("Id".to_string(), FieldValue::from(external_id));
    fields.insert("DisplayName".to_string(), FieldValue::from(display_name));
    ExternalRecord {
        external_id: external_id.to_string(),
        fields,
    }
}

// ── MemoryDb ────────────────────────────────────────────────────

#[derive(Default)]
struct State {
    members: Vec<(Uuid, Uuid, Role)>,
    connections: Vec<Connection>,
    mappings: Vec<SyncMapping>,
    corrupt_configs: HashSet<Uuid>,
    external_ids: Vec<ExternalIdMapping>,
    logs: Vec<SyncLog>,
    fail_next_finalize: bool,
    log_insert_gate: Option<Gate>,
    tables: BTreeMap<String, BTreeMap<String, RecordFields>>,
    next_row_id: u64,
}

/// Every repository the engine uses, backed by one mutex-guarded state.
#[derive(Default)]
pub struct MemoryDb {
    state: Mutex<State>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn stores(self: &Arc<Self>) -> SyncStores {
        SyncStores {
            connections: self.clone(),
            mappings: self.clone(),
            external_ids: self.clone(),
            logs: self.clone(),
            records: self.clone(),
            members: self.clone(),
        }
    }

    pub fn add_member(&self, org_id: Uuid, user_id: Uuid, role: Role) {
        self.lock().members.push((org_id, user_id, role));
    }

    pub fn add_connection(&self, connection: Connection) {
        self.lock().connections.push(connection);
    }

    pub fn connection(&self, id: Uuid) -> Connection {
        self.lock()
            .connections
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .expect("connection should exist")
    }

    pub fn add_mapping(&self, mapping: SyncMapping) {
        self.lock().mappings.push(mapping);
    }

    /// Make mapping reads of a connection fail as undecodable configuration.
    pub fn corrupt_mapping_config(&self, connection_id: Uuid) {
        self.lock().corrupt_configs.insert(connection_id);
    }

    /// Insert `bookings` rows as `(id, status)`; the reference is `B-{id}`.
    pub fn seed_bookings(&self, rows: &[(&str, &str)]) {
        let mut state = self.lock();
        let table = state.tables.entry("bookings".to_string()).or_default();
        for (id, status) in rows {
            let amount = id.parse::<i64>().unwrap_or(0) * 100;
            let mut fields = RecordFields::new();
            fields.insert("id".to_string(), FieldValue::from(*id));
            fields.insert("reference".to_string(), FieldValue::from(format!("B-{id}")));
            fields.insert("status".to_string(), FieldValue::from(*status));
            fields.insert("customer".to_string(), FieldValue::from(format!("Customer {id}")));
            fields.insert("amount".to_string(), FieldValue::from(amount));
            table.insert(id.to_string(), fields);
        }
    }

    pub fn table_rows(&self, table: &str) -> Vec<LocalRecord> {
        self.lock()
            .tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .map(|(id, fields)| LocalRecord::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn external_id_count(&self, connection_id: Uuid, local_table: &str) -> usize {
        self.lock()
            .external_ids
            .iter()
            .filter(|m| m.connection_id == connection_id && m.local_table == local_table)
            .count()
    }

    pub fn log(&self, id: Uuid) -> SyncLog {
        self.lock()
            .logs
            .iter()
            .find(|l| l.id == id)
            .cloned()
            .expect("sync log should exist")
    }

    /// Logs of a connection in creation order.
    pub fn logs_for(&self, connection_id: Uuid) -> Vec<SyncLog> {
        self.lock()
            .logs
            .iter()
            .filter(|l| l.connection_id == connection_id)
            .cloned()
            .collect()
    }

    fn push_log(
        &self,
        org_id: Uuid,
        connection_id: Uuid,
        status: SyncStatus,
        errors: Vec<SyncError>,
    ) -> Uuid {
        let log = SyncLog {
            id: Uuid::new_v4(),
            org_id,
            connection_id,
            mapping_id: None,
            sync_type: SyncType::Push,
            status,
            counters: SyncCounters::default(),
            errors,
            retry_of: None,
            triggered_by: None,
            started_at: Utc::now(),
            finished_at: status.is_terminal().then(Utc::now),
        };
        let id = log.id;
        self.lock().logs.push(log);
        id
    }

    /// A `running` log not owned by any local run, as if another process had it.
    pub fn open_log(&self, org_id: Uuid, connection_id: Uuid) -> Uuid {
        self.push_log(org_id, connection_id, SyncStatus::Running, Vec::new())
    }

    pub fn closed_log(
        &self,
        org_id: Uuid,
        connection_id: Uuid,
        status: SyncStatus,
        errors: Vec<SyncError>,
    ) -> Uuid {
        self.push_log(org_id, connection_id, status, errors)
    }

    pub fn fail_next_finalize(&self) {
        self.lock().fail_next_finalize = true;
    }

    /// Hold the next sync log insert until released.
    pub fn gate_next_log_insert(&self) -> Gate {
        let gate = Gate::default();
        self.lock().log_insert_gate = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl MemberRepository for MemoryDb {
    async fn role_for(&self, org_id: Uuid, user_id: Uuid) -> RelayResult<Option<Role>> {
        Ok(self
            .lock()
            .members
            .iter()
            .find(|(org, user, _)| *org == org_id && *user == user_id)
            .map(|(_, _, role)| *role))
    }
}

#[async_trait]
impl ConnectionRepository for MemoryDb {
    async fn get_by_id(&self, org_id: Uuid, id: Uuid) -> RelayResult<Option<Connection>> {
        Ok(self
            .lock()
            .connections
            .iter()
            .find(|c| c.id == id && c.org_id == org_id)
            .cloned())
    }

    async fn list_active(&self, org_id: Uuid) -> RelayResult<Vec<Connection>> {
        Ok(self
            .lock()
            .connections
            .iter()
            .filter(|c| c.org_id == org_id && c.is_active)
            .cloned()
            .collect())
    }

    async fn update_credentials(
        &self,
        id: Uuid,
        credentials: &ConnectionCredentials,
    ) -> RelayResult<Connection> {
        let mut state = self.lock();
        let conn = state
            .connections
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| RelayError::NotFound(format!("connection {id}")))?;
        conn.access_token = Some(credentials.access_token.clone());
        if credentials.refresh_token.is_some() {
            conn.refresh_token = credentials.refresh_token.clone();
        }
        conn.token_expires_at = credentials.expires_at;
        conn.updated_at = Utc::now();
        Ok(conn.clone())
    }

    async fn record_sync_result(
        &self,
        id: Uuid,
        synced_at: DateTime<Utc>,
        last_error: Option<&str>,
    ) -> RelayResult<()> {
        let mut state = self.lock();
        let conn = state
            .connections
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| RelayError::NotFound(format!("connection {id}")))?;
        conn.last_sync_at = Some(synced_at);
        conn.last_error = last_error.map(str::to_string);
        Ok(())
    }
}

#[async_trait]
impl SyncMappingRepository for MemoryDb {
    async fn get_by_id(&self, connection_id: Uuid, id: Uuid) -> RelayResult<Option<SyncMapping>> {
        let state = self.lock();
        if state.corrupt_configs.contains(&connection_id) {
            return Err(RelayError::Config("field_mappings is not a rule list".to_string()));
        }
        Ok(state
            .mappings
            .iter()
            .find(|m| m.id == id && m.connection_id == connection_id)
            .cloned())
    }

    async fn list_for_connection(
        &self,
        connection_id: Uuid,
        active_only: bool,
    ) -> RelayResult<Vec<SyncMapping>> {
        let state = self.lock();
        if state.corrupt_configs.contains(&connection_id) {
            return Err(RelayError::Config("field_mappings is not a rule list".to_string()));
        }
        Ok(state
            .mappings
            .iter()
            .filter(|m| m.connection_id == connection_id && (m.is_active || !active_only))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ExternalIdRepository for MemoryDb {
    async fn find_by_local_ids(
        &self,
        connection_id: Uuid,
        local_table: &str,
        local_ids: &[String],
    ) -> RelayResult<Vec<ExternalIdMapping>> {
        Ok(self
            .lock()
            .external_ids
            .iter()
            .filter(|m| {
                m.connection_id == connection_id
                    && m.local_table == local_table
                    && local_ids.contains(&m.local_id)
            })
            .cloned()
            .collect())
    }

    async fn list_for_table(
        &self,
        connection_id: Uuid,
        local_table: &str,
    ) -> RelayResult<Vec<ExternalIdMapping>> {
        Ok(self
            .lock()
            .external_ids
            .iter()
            .filter(|m| m.connection_id == connection_id && m.local_table == local_table)
            .cloned()
            .collect())
    }

    async fn upsert(&self, mapping: &ExternalIdUpsert) -> RelayResult<ExternalIdMapping> {
        let mut state = self.lock();
        let existing = state.external_ids.iter_mut().find(|m| {
            m.connection_id == mapping.connection_id
                && m.local_table == mapping.local_table
                && m.local_id == mapping.local_id
        });

        if let Some(row) = existing {
            row.external_id = mapping.external_id.clone();
            row.last_synced_payload = mapping.payload.clone();
            row.last_synced_at = mapping.synced_at;
            row.updated_at = Utc::now();
            return Ok(row.clone());
        }

        let now = Utc::now();
        let row = ExternalIdMapping {
            id: Uuid::new_v4(),
            connection_id: mapping.connection_id,
            local_table: mapping.local_table.clone(),
            local_id: mapping.local_id.clone(),
            external_id: mapping.external_id.clone(),
            last_synced_payload: mapping.payload.clone(),
            last_synced_at: mapping.synced_at,
            created_at: now,
            updated_at: now,
        };
        state.external_ids.push(row.clone());
        Ok(row)
    }
}

#[async_trait]
impl SyncLogRepository for MemoryDb {
    async fn create_running(&self, log: NewSyncLog) -> RelayResult<SyncLog> {
        let gate = self.lock().log_insert_gate.take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let row = SyncLog {
            id: log.id,
            org_id: log.org_id,
            connection_id: log.connection_id,
            mapping_id: log.mapping_id,
            sync_type: log.sync_type,
            status: SyncStatus::Running,
            counters: SyncCounters::default(),
            errors: Vec::new(),
            retry_of: log.retry_of,
            triggered_by: log.triggered_by,
            started_at: Utc::now(),
            finished_at: None,
        };
        self.lock().logs.push(row.clone());
        Ok(row)
    }

    async fn get_by_id(&self, org_id: Uuid, id: Uuid) -> RelayResult<Option<SyncLog>> {
        Ok(self
            .lock()
            .logs
            .iter()
            .find(|l| l.id == id && l.org_id == org_id)
            .cloned())
    }

    async fn finalize(
        &self,
        id: Uuid,
        completion: &SyncLogCompletion,
    ) -> RelayResult<Option<SyncLog>> {
        let mut state = self.lock();
        if state.fail_next_finalize {
            state.fail_next_finalize = false;
            return Err(RelayError::Database("connection reset by peer".to_string()));
        }
        if !completion.status.is_terminal() {
            return Err(RelayError::Validation(format!(
                "{} is not a terminal status",
                completion.status
            )));
        }

        let Some(log) = state
            .logs
            .iter_mut()
            .find(|l| l.id == id && l.status == SyncStatus::Running)
        else {
            return Ok(None);
        };
        log.status = completion.status;
        log.counters = completion.counters;
        log.errors = completion.errors.clone();
        log.finished_at = Some(completion.finished_at);
        Ok(Some(log.clone()))
    }

    async fn stats_for_connection(
        &self,
        org_id: Uuid,
        connection_id: Uuid,
    ) -> RelayResult<SyncLogStats> {
        let state = self.lock();
        let logs: Vec<&SyncLog> = state
            .logs
            .iter()
            .filter(|l| l.org_id == org_id && l.connection_id == connection_id)
            .collect();

        let count = |status: SyncStatus| logs.iter().filter(|l| l.status == status).count() as i64;
        Ok(SyncLogStats {
            total: logs.len() as i64,
            completed: count(SyncStatus::Completed),
            running: count(SyncStatus::Running),
            last: logs.last().map(|l| (*l).clone()),
        })
    }
}

#[async_trait]
impl LocalRecordStore for MemoryDb {
    async fn fetch_all(&self, table: &str) -> RelayResult<Vec<LocalRecord>> {
        let state = self.lock();
        let rows = state
            .tables
            .get(table)
            .ok_or_else(|| RelayError::Database(format!("relation \"{table}\" does not exist")))?;
        Ok(rows
            .iter()
            .map(|(id, fields)| LocalRecord::new(id.clone(), fields.clone()))
            .collect())
    }

    async fn fetch_by_ids(&self, table: &str, ids: &[String]) -> RelayResult<Vec<LocalRecord>> {
        Ok(self
            .fetch_all(table)
            .await?
            .into_iter()
            .filter(|r| ids.contains(&r.id))
            .collect())
    }

    async fn insert(&self, table: &str, fields: &RecordFields) -> RelayResult<String> {
        let mut state = self.lock();
        state.next_row_id += 1;
        let id = format!("{}", 1000 + state.next_row_id);

        let mut row = fields.clone();
        row.insert("id".to_string(), FieldValue::from(id.as_str()));
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(id.clone(), row);
        Ok(id)
    }

    async fn update(&self, table: &str, id: &str, fields: &RecordFields) -> RelayResult<()> {
        let mut state = self.lock();
        let row = state
            .tables
            .get_mut(table)
            .and_then(|rows| rows.get_mut(id))
            .ok_or_else(|| RelayError::NotFound(format!("{table} row {id}")))?;
        for (name, value) in fields {
            if name != "id" {
                row.insert(name.clone(), value.clone());
            }
        }
        Ok(())
    }
}

// ── ScriptedAdapter ─────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RecordedPush {
    pub entity: String,
    pub local_id: String,
    pub intent: PushIntent,
    pub payload: Value,
    /// Empty when the push was rejected.
    pub assigned_id: String,
}

/// Holds one push or log insert until released, so a test can act mid-run.
#[derive(Clone, Default)]
pub struct Gate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl Gate {
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[derive(Default)]
struct AdapterState {
    calls: Vec<RecordedPush>,
    failures: HashSet<String>,
    listing: Vec<ExternalRecord>,
    listing_fails: bool,
    gate: Option<Gate>,
    next_id: u32,
}

/// Adapter that rejects any payload containing a configured text value.
pub struct ScriptedAdapter {
    provider: String,
    state: Mutex<AdapterState>,
}

impl ScriptedAdapter {
    pub fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            state: Mutex::new(AdapterState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AdapterState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn fail_on(&self, value: &str) {
        self.lock().failures.insert(value.to_string());
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub fn set_listing(&self, records: Vec<ExternalRecord>) {
        self.lock().listing = records;
    }

    pub fn fail_listing(&self) {
        self.lock().listing_fails = true;
    }

    pub fn gate(&self) -> Gate {
        let gate = Gate::default();
        self.lock().gate = Some(gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<RecordedPush> {
        self.lock().calls.clone()
    }
}

#[async_trait]
impl ExternalApiAdapter for ScriptedAdapter {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn push(&self, request: PushRequest<'_>) -> Result<PushOutcome, AdapterError> {
        let (rejected, gate) = {
            let mut state = self.lock();
            let rejected = request
                .payload
                .as_object()
                .map(|fields| {
                    fields
                        .values()
                        .filter_map(Value::as_str)
                        .find(|v| state.failures.contains(*v))
                        .map(str::to_string)
                })
                .unwrap_or_default();
            (rejected, state.gate.take())
        };

        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let mut state = self.lock();
        if let Some(value) = rejected {
            state.calls.push(RecordedPush {
                entity: request.entity.to_string(),
                local_id: request.local_id.to_string(),
                intent: request.intent,
                payload: request.payload.clone(),
                assigned_id: String::new(),
            });
            return Err(AdapterError::Rejected {
                status: 422,
                body: format!("{value} rejected"),
            });
        }

        let external_id = match &request.intent {
            PushIntent::Create => {
                state.next_id += 1;
                format!("EXT-{}", state.next_id)
            }
            PushIntent::Update { external_id } => external_id.clone(),
        };
        state.calls.push(RecordedPush {
            entity: request.entity.to_string(),
            local_id: request.local_id.to_string(),
            intent: request.intent,
            payload: request.payload.clone(),
            assigned_id: external_id.clone(),
        });
        Ok(PushOutcome { external_id })
    }

    async fn list(
        &self,
        _connection: &Connection,
        _entity: &str,
    ) -> Result<Vec<ExternalRecord>, AdapterError> {
        let state = self.lock();
        if state.listing_fails {
            return Err(AdapterError::Transport("connection reset".to_string()));
        }
        Ok(state.listing.clone())
    }

    async fn refresh_credentials(
        &self,
        connection: &Connection,
    ) -> Result<ConnectionCredentials, AdapterError> {
        Ok(ConnectionCredentials {
            access_token: "refreshed-token".to_string(),
            refresh_token: connection.refresh_token.clone(),
            expires_at: Some(Utc::now() + Duration::hours(1)),
        })
    }
}
