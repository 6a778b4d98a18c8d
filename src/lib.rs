pub mod baseline;
pub mod battery;
pub mod collaborators;
pub mod db;
pub mod engine;
pub mod escalation;
pub mod fall;
pub mod host;
pub mod inactivity;
pub mod ledger;
pub mod models;
pub mod settings;
mod utils;

use std::{env, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use log::{error, info, warn};

pub use baseline::{BaselineConfig, BaselineLearner, DailySummary, Deviation, LearnerPhase};
pub use battery::BatteryGate;
pub use collaborators::{
    BatterySource, Clock, LocalPromptDispatcher, ManualClock, RemoteAlertDispatcher,
    RosterProvider, SystemClock,
};
pub use db::{SqliteStateStore, StateStore};
pub use engine::{Collaborators, Engine, EngineConfig, EngineStatus, PersistedState};
pub use escalation::{CancelOutcome, EscalationConfig, EscalationCoordinator, Resolution};
pub use fall::{FallConfig, FallState};
pub use inactivity::{InactivityConfig, MonitoringState, QuietHours};
pub use ledger::ActivityLedger;
pub use models::*;
pub use settings::{MonitoringSettings, SettingsStore};

const DEBUG_EVALUATION_INTERVAL: Duration = Duration::from_secs(10);

fn data_dir() -> PathBuf {
    if let Ok(dir) = env::var("HEARTHGUARD_DATA_DIR") {
        return PathBuf::from(dir);
    }
    match env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".hearthguard"),
        Err(_) => PathBuf::from(".hearthguard"),
    }
}

fn debug_mode() -> bool {
    matches!(env::var("HEARTHGUARD_DEBUG").as_deref(), Ok("1") | Ok("true"))
}

pub fn run() {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("HearthGuard starting up...");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("failed to start async runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(serve()) {
        error!("HearthGuard stopped: {err:#}");
        std::process::exit(1);
    }
}

async fn serve() -> Result<()> {
    let data_dir = data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let settings = Arc::new(SettingsStore::new(data_dir.join("settings.json"))?);
    let monitoring = settings.settings().sanitized();
    if monitoring.contacts.is_empty() {
        warn!("no contacts configured; alerts will fail until settings.json lists some");
    }

    let store = SqliteStateStore::open(data_dir.join("hearthguard.sqlite3"))?;
    let restored = match PersistedState::load(&store).await {
        Ok(restored) => restored,
        Err(err) => {
            warn!("starting from empty state: {err:#}");
            PersistedState::default()
        }
    };

    let mut config = EngineConfig::from_settings(&monitoring);
    if debug_mode() {
        info!("debug mode: evaluating every {}s", DEBUG_EVALUATION_INTERVAL.as_secs());
        config.evaluation_interval = DEBUG_EVALUATION_INTERVAL;
    }

    let battery_source = host::SysfsBatterySource::detect()
        .map(|source| Arc::new(source) as Arc<dyn BatterySource>);
    let engine = Engine::start(
        config,
        Collaborators {
            clock: Arc::new(SystemClock),
            prompts: Arc::new(host::LogPromptDispatcher),
            dispatcher: Arc::new(host::LogAlertDispatcher),
            roster: settings.clone(),
            battery_source,
        },
        restored,
    )
    .await?;
    engine.coordinator().set_location(monitoring.location.clone());

    let result = host::serve(&engine, &store).await;

    if let Err(err) = engine.persist(&store).await {
        error!("failed to persist state on shutdown: {err:#}");
    }
    engine.shutdown().await;
    result
}
