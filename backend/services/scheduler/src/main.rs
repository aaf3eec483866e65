use std::time::Duration;

use relay_common::error::{RelayError, RelayResult};
use relay_config::{get_var, init_tracing, parse_var_or, AppConfig};
use relay_sync::{AdapterRegistry, SyncController, SyncEngineConfig, SyncStores};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct SchedulerConfig {
    org_ids: Vec<Uuid>,
    interval: Duration,
}

impl SchedulerConfig {
    /// `SCHEDULER_ORG_IDS` is a comma-separated list of organization ids.
    fn from_env() -> RelayResult<Self> {
        let org_ids = parse_org_ids(&get_var("SCHEDULER_ORG_IDS")?)?;
        let interval_secs: u64 = parse_var_or("SCHEDULER_INTERVAL_SECS", 900)?;
        if interval_secs == 0 {
            return Err(RelayError::Config(
                "SCHEDULER_INTERVAL_SECS must be positive".to_string(),
            ));
        }
        Ok(Self {
            org_ids,
            interval: Duration::from_secs(interval_secs),
        })
    }
}

fn parse_org_ids(raw: &str) -> RelayResult<Vec<Uuid>> {
    let ids = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            Uuid::parse_str(s).map_err(|e| {
                RelayError::Config(format!("invalid org id {s} in SCHEDULER_ORG_IDS: {e}"))
            })
        })
        .collect::<RelayResult<Vec<_>>>()?;

    if ids.is_empty() {
        return Err(RelayError::Config("SCHEDULER_ORG_IDS is empty".to_string()));
    }
    Ok(ids)
}

async fn run_tick(controller: &SyncController, org_ids: &[Uuid]) {
    for org_id in org_ids {
        for (connection_id, result) in controller.sync_all_active(*org_id).await {
            match result.into_result() {
                Ok(sync) => tracing::info!(
                    %org_id,
                    %connection_id,
                    sync_log_id = %sync.sync_log_id,
                    status = %sync.status,
                    processed = sync.records_processed,
                    failed = sync.records_failed,
                    "scheduled sync finished"
                ),
                Err(e) => tracing::warn!(
                    %org_id,
                    %connection_id,
                    code = e.code(),
                    error = %e,
                    "scheduled sync rejected"
                ),
            }
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing("info");

    let config = AppConfig::from_env().expect("failed to load config");
    let schedule = SchedulerConfig::from_env().expect("failed to load scheduler config");
    let engine_config = SyncEngineConfig::from_env().expect("failed to load sync config");
    tracing::info!(
        service = "relay-scheduler",
        orgs = schedule.org_ids.len(),
        interval_secs = schedule.interval.as_secs(),
        "starting"
    );

    let pool = relay_db::create_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("failed to create database pool");
    let adapters = AdapterRegistry::from_env().expect("failed to configure adapters");
    let controller = SyncController::new(SyncStores::postgres(pool), adapters, engine_config);

    let mut ticker = tokio::time::interval(schedule.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => run_tick(&controller, &schedule.org_ids).await,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
        }
    }
}
