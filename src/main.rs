mod clock;
mod config;
mod pump;
mod registry;
mod scheduler;
mod state;
mod store;
mod web;

use std::{env, sync::Arc};

use anyhow::Result;
use tokio::sync::{Mutex, RwLock};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use clock::SystemClock;
use pump::PumpBank;
use registry::Registry;
use store::{layout_size, FileRegion, PlantStore};

/// Pre-loop wall-clock sync attempts, one per second.
const CLOCK_SYNC_RETRIES: u32 = 10;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;
    let millis_per_oz = cfg.calibration.millis_per_oz;

    let mut registry = Registry::new(&cfg);
    registry.events.record_system("controller started".to_string());

    // ── Persistent store ────────────────────────────────────────────
    let storage_path = env::var("STORAGE_PATH").unwrap_or_else(|_| "plants.bin".to_string());
    let num_plants = registry.plants.len();
    let region = FileRegion::open(&storage_path, layout_size(num_plants))?;
    let mut store = PlantStore::new(Box::new(region), num_plants)?;

    if env::var("RESET_STORAGE").map(|v| v == "1").unwrap_or(false) {
        store.reset()?;
    }

    // ── Clock sync (bounded, pre-loop) ──────────────────────────────
    let clock = SystemClock::new();
    clock::wait_for_sync(&clock, CLOCK_SYNC_RETRIES).await;

    // With no clock, history timestamps can only be checked against the
    // amount bounds; an unbounded `now` keeps valid entries loadable.
    let now = clock.wall_secs().unwrap_or(i64::MAX);
    if let Err(e) = store.load(&mut registry.plants, now) {
        warn!("storage load failed — continuing with defaults: {e:#}");
    }
    registry.recompute_pending_durations(millis_per_oz);

    scheduler::log_schedules(&registry);

    // ── Pump bank ───────────────────────────────────────────────────
    let pin_pairs: Vec<(u8, u8)> = registry.pumps.iter().map(|p| (p.pin_a, p.pin_b)).collect();
    let mut bank = PumpBank::new(&pin_pairs)?;
    bank.all_stop();

    // ── Shared state + web server ───────────────────────────────────
    let registry = Arc::new(RwLock::new(registry));
    let store = Arc::new(Mutex::new(store));

    let app_state = web::AppState {
        registry: Arc::clone(&registry),
        store: Arc::clone(&store),
        millis_per_oz,
    };
    tokio::spawn(async move {
        web::serve(app_state).await;
    });

    // ── Polling loop ────────────────────────────────────────────────
    let tick_ms = env::var("TICK_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(scheduler::DEFAULT_TICK_MS);

    scheduler::run(registry, store, bank, clock, millis_per_oz, tick_ms).await;
    Ok(())
}
