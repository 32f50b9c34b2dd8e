//! REST API + static dashboard. Handlers mutate the shared registry and
//! flush the store after every successful mutation; validation failures
//! return `400 {"error": "..."}` with no partial mutation and no flush.

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post, put};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::error;

use crate::registry::{SharedRegistry, WateringEvent, MAX_NAME_BYTES};
use crate::scheduler::duration_ms;
use crate::store::PlantStore;

const INDEX_HTML: &str = include_str!("ui/index.html");

#[derive(Clone)]
pub struct AppState {
    pub registry: SharedRegistry,
    pub store: Arc<Mutex<PlantStore>>,
    pub millis_per_oz: u64,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/status", get(api_status))
        .route("/api/plants", get(api_plants))
        .route("/api/plants/{index}/water-now", post(water_now))
        .route("/api/plants/{index}/amount", put(set_amount))
        .route("/api/plants/{index}/interval", put(set_interval))
        .route("/api/plants/{index}/name", put(set_name))
        .route("/api/plants/{index}/reset-history", post(reset_history))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Read endpoints
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlantView {
    name: String,
    oz_per_watering: f32,
    interval_minutes: u32,
    needs_watering: bool,
    /// Most recent first; empty slots omitted.
    watering_history: Vec<WateringEvent>,
}

async fn index() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], INDEX_HTML)
}

async fn api_status(State(state): State<AppState>) -> impl IntoResponse {
    let reg = state.registry.read().await;
    Json(reg.events.to_status())
}

async fn api_plants(State(state): State<AppState>) -> impl IntoResponse {
    let reg = state.registry.read().await;
    let plants: Vec<PlantView> = reg
        .plants
        .iter()
        .map(|p| PlantView {
            name: p.name.clone(),
            oz_per_watering: p.oz_per_watering,
            interval_minutes: p.interval_minutes,
            needs_watering: p.needs_watering,
            watering_history: p.history_recent_first(),
        })
        .collect();
    // The dashboard is also served from dev hosts during UI work.
    ([(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")], Json(plants))
}

// ---------------------------------------------------------------------------
// Mutation endpoints
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AmountBody {
    oz_per_watering: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntervalBody {
    interval_days: f64,
}

#[derive(Deserialize)]
struct NameBody {
    name: String,
}

type ApiResult = (StatusCode, Json<serde_json::Value>);

fn ok() -> ApiResult {
    (StatusCode::OK, Json(json!({ "success": true })))
}

fn bad_request(msg: &str) -> ApiResult {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": msg })))
}

/// Flush in-memory plant state. Commit failure is logged but does not
/// fail the request; memory stays authoritative until the next flush.
async fn flush(state: &AppState) {
    let reg = state.registry.read().await;
    let mut store = state.store.lock().await;
    if let Err(e) = store.save(&reg.plants) {
        error!("web: flush failed: {e:#}");
    }
}

async fn water_now(State(state): State<AppState>, Path(index): Path<usize>) -> ApiResult {
    {
        let mut reg = state.registry.write().await;
        if index >= reg.plants.len() {
            return bad_request("Invalid plant index");
        }
        let oz = reg.plants[index].oz_per_watering;
        if oz <= 0.0 {
            return bad_request("Plant is disabled");
        }
        // Already flagged or mid-run: a second trigger must not retarget
        // the duration — a running pump cannot be cut short, and amount
        // edits apply only from the next cycle.
        if reg.plants[index].needs_watering || reg.pumps[index].is_running {
            return ok();
        }
        reg.plants[index].needs_watering = true;
        reg.pumps[index].run_duration_ms = duration_ms(oz, state.millis_per_oz);

        let name = reg.plants[index].name.clone();
        reg.events.record_watering(format!("{name}: manual watering requested"));
    }
    flush(&state).await;
    ok()
}

async fn set_amount(
    State(state): State<AppState>,
    Path(index): Path<usize>,
    Json(body): Json<AmountBody>,
) -> ApiResult {
    let oz = body.oz_per_watering;
    if !oz.is_finite() || oz <= 0.0 || oz > crate::config::MAX_OZ_PER_WATERING {
        return bad_request("Invalid watering amount");
    }
    {
        let mut reg = state.registry.write().await;
        if index >= reg.plants.len() {
            return bad_request("Invalid plant index");
        }
        reg.plants[index].oz_per_watering = oz;
        let name = reg.plants[index].name.clone();
        reg.events.record_config(format!("{name}: amount set to {oz:.1} oz"));
    }
    flush(&state).await;
    ok()
}

async fn set_interval(
    State(state): State<AppState>,
    Path(index): Path<usize>,
    Json(body): Json<IntervalBody>,
) -> ApiResult {
    let minutes = (body.interval_days * 1440.0).round();
    if !body.interval_days.is_finite()
        || body.interval_days <= 0.0
        || minutes < 1.0
        || minutes > u32::MAX as f64
    {
        return bad_request("Invalid interval");
    }
    let minutes = minutes as u32;
    {
        let mut reg = state.registry.write().await;
        if index >= reg.plants.len() {
            return bad_request("Invalid plant index");
        }
        reg.plants[index].interval_minutes = minutes;
        let name = reg.plants[index].name.clone();
        reg.events.record_config(format!("{name}: interval set to {minutes} min"));
    }
    flush(&state).await;
    ok()
}

async fn set_name(
    State(state): State<AppState>,
    Path(index): Path<usize>,
    Json(body): Json<NameBody>,
) -> ApiResult {
    let name = body.name.trim().to_string();
    if name.is_empty() || name.len() > MAX_NAME_BYTES {
        return bad_request("Invalid name");
    }
    {
        let mut reg = state.registry.write().await;
        if index >= reg.plants.len() {
            return bad_request("Invalid plant index");
        }
        let old = std::mem::replace(&mut reg.plants[index].name, name.clone());
        reg.events.record_config(format!("'{old}' renamed to '{name}'"));
    }
    flush(&state).await;
    ok()
}

async fn reset_history(State(state): State<AppState>, Path(index): Path<usize>) -> ApiResult {
    let mut reg = state.registry.write().await;
    let mut store = state.store.lock().await;
    // reset_history persists as part of the operation, so no extra flush.
    if let Err(e) = store.reset_history(&mut reg.plants, index) {
        return bad_request(&format!("{e}"));
    }
    let name = reg.plants[index].name.clone();
    reg.events.record_config(format!("{name}: history reset"));
    ok()
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState) {
    let port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await.expect("failed to bind web port");

    tracing::info!("dashboard listening on http://{addr}");

    axum::serve(listener, router(state))
        .await
        .expect("web server error");
}

// ===========================================================================
// Tests
// ===========================================================================
