//! Traffic read API
//!
//! Read-only views over the agent's outputs:
//! - `/api/traffic/current`, `/intersection/{id}`, `/stats`, `/route/optimize`
//!   read the snapshot file
//! - `/api/traffic/history` reads the SQLite log
//!
//! Every body is `{success, data}`; lookups that find nothing answer
//! `success: false` with a message rather than an HTTP error.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, warn};

use traffic_agent::export::{Snapshot, SnapshotEntry};
use traffic_agent::{Database, TrafficStatus};

const DEFAULT_HISTORY_HOURS: u32 = 24;
const HISTORY_LIMIT: usize = 1000;
/// A century; wider windows are clamped.
const MAX_HISTORY_HOURS: u32 = 100 * 366 * 24;

const ENDPOINTS: [&str; 6] = [
    "GET /api/traffic/current",
    "GET /api/traffic/intersection/{id}",
    "GET /api/traffic/history",
    "GET /api/traffic/stats",
    "POST /api/traffic/route/optimize",
    "GET /health",
];

#[derive(Clone)]
pub struct AppState {
    pub snapshot_path: Arc<PathBuf>,
    pub db: Database,
}

impl AppState {
    pub fn new(snapshot_path: impl Into<PathBuf>, db: Database) -> Self {
        Self {
            snapshot_path: Arc::new(snapshot_path.into()),
            db,
        }
    }

    async fn snapshot(&self) -> Option<Snapshot> {
        match Snapshot::load(&self.snapshot_path).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Unreadable snapshot {}: {}", self.snapshot_path.display(), e);
                None
            }
        }
    }
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/traffic/current", get(current))
        .route("/api/traffic/intersection/{id}", get(intersection))
        .route("/api/traffic/history", get(history))
        .route("/api/traffic/stats", get(stats))
        .route("/api/traffic/route/optimize", post(optimize_route))
        .fallback(not_found)
        .with_state(app_state)
}

fn success<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

fn failure(message: &str) -> Json<Value> {
    Json(json!({ "success": false, "data": message }))
}

async fn current(State(app): State<AppState>) -> Json<Value> {
    match app.snapshot().await {
        Some(snapshot) => success(snapshot),
        None => failure("no data available"),
    }
}

async fn intersection(State(app): State<AppState>, Path(id): Path<String>) -> Json<Value> {
    let Some(snapshot) = app.snapshot().await else {
        return failure("no data available");
    };

    let entry = id
        .parse::<u32>()
        .ok()
        .and_then(|id| snapshot.intersections.into_iter().find(|e| e.id == id));

    match entry {
        Some(entry) => success(entry),
        None => failure("intersection not found"),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    hours: Option<String>,
    intersection_id: Option<String>,
}

async fn history(State(app): State<AppState>, Query(params): Query<HistoryParams>) -> Json<Value> {
    let hours = params
        .hours
        .as_deref()
        .and_then(|h| h.trim().parse::<u32>().ok())
        .filter(|h| *h > 0)
        .unwrap_or(DEFAULT_HISTORY_HOURS)
        .min(MAX_HISTORY_HOURS);

    let intersection_id = match params.intersection_id.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => match raw.parse::<u32>() {
            Ok(id) => Some(id),
            Err(_) => return failure("invalid intersection_id"),
        },
    };

    match app
        .db
        .query_recent_for(hours, intersection_id, Some(HISTORY_LIMIT))
        .await
    {
        Ok(rows) => Json(json!({ "success": true, "count": rows.len(), "data": rows })),
        Err(e) => {
            error!("History query failed: {}", e);
            failure("database error")
        }
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrafficStats {
    pub total_intersections: usize,
    pub total_vehicles: u64,
    pub average_speed: u32,
    pub average_wait_time: u32,
    pub critical_intersections: usize,
    pub moderate_intersections: usize,
    pub normal_intersections: usize,
}

impl TrafficStats {
    /// `None` for an empty batch.
    pub fn from_entries(entries: &[SnapshotEntry]) -> Option<Self> {
        if entries.is_empty() {
            return None;
        }
        let n = entries.len() as f64;
        let count = |status: TrafficStatus| entries.iter().filter(|e| e.status == status).count();

        Some(Self {
            total_intersections: entries.len(),
            total_vehicles: entries.iter().map(|e| u64::from(e.vehicle_count)).sum(),
            average_speed: (entries.iter().map(|e| f64::from(e.avg_speed)).sum::<f64>() / n).round() as u32,
            average_wait_time: (entries.iter().map(|e| f64::from(e.wait_time)).sum::<f64>() / n).round() as u32,
            critical_intersections: count(TrafficStatus::Critical),
            moderate_intersections: count(TrafficStatus::Moderate),
            normal_intersections: count(TrafficStatus::Normal),
        })
    }
}

async fn stats(State(app): State<AppState>) -> Json<Value> {
    match app
        .snapshot()
        .await
        .and_then(|s| TrafficStats::from_entries(&s.intersections))
    {
        Some(stats) => success(stats),
        None => failure("statistics unavailable"),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRequest {
    #[serde(default)]
    origin: Value,
    #[serde(default)]
    destination: Value,
    #[serde(default = "default_avoid_critical")]
    avoid_critical: bool,
}

fn default_avoid_critical() -> bool {
    true
}

/// Empty strings, zero, false and null count as absent.
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => true,
    }
}

#[derive(Debug, Serialize)]
struct AvoidPoint {
    lat: f64,
    lng: f64,
    name: String,
}

/// Minutes for a 10 km trip at the mean speed plus the mean wait.
pub fn estimate_duration(entries: &[SnapshotEntry]) -> Option<i64> {
    if entries.is_empty() {
        return None;
    }
    let n = entries.len() as f64;
    let avg_speed = entries.iter().map(|e| f64::from(e.avg_speed)).sum::<f64>() / n;
    let avg_wait = entries.iter().map(|e| f64::from(e.wait_time)).sum::<f64>() / n;
    if avg_speed <= 0.0 {
        return None;
    }
    Some(((10.0 / avg_speed) * 60.0 + avg_wait / 60.0).round() as i64)
}

pub fn overall_condition(entries: &[SnapshotEntry]) -> &'static str {
    if entries.is_empty() {
        return "light";
    }
    let n = entries.len() as f64;
    let ratio = |status: TrafficStatus| entries.iter().filter(|e| e.status == status).count() as f64 / n;
    let critical = ratio(TrafficStatus::Critical);
    let moderate = ratio(TrafficStatus::Moderate);

    if critical > 0.4 {
        "heavy"
    } else if critical > 0.2 || moderate > 0.5 {
        "moderate"
    } else {
        "light"
    }
}

async fn optimize_route(State(app): State<AppState>, Json(request): Json<RouteRequest>) -> Json<Value> {
    if !is_present(&request.origin) || !is_present(&request.destination) {
        return Json(json!({ "success": false, "message": "origin and destination are required" }));
    }

    let Some(snapshot) = app.snapshot().await else {
        return failure("route could not be computed");
    };
    let entries = &snapshot.intersections;

    let critical: Vec<AvoidPoint> = entries
        .iter()
        .filter(|e| e.status == TrafficStatus::Critical)
        .map(|e| AvoidPoint {
            lat: e.lat,
            lng: e.lng,
            name: e.name.clone(),
        })
        .collect();
    let critical_areas = critical.len();
    let avoid_points = if request.avoid_critical { critical } else { Vec::new() };

    success(json!({
        "route": {
            "origin": request.origin,
            "destination": request.destination,
            "avoidPoints": avoid_points,
            "estimatedDuration": estimate_duration(entries),
        },
        "trafficConditions": {
            "overall": overall_condition(entries),
            "criticalAreas": critical_areas,
        }
    }))
}

async fn not_found() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "message": "endpoint not found",
            "endpoints": ENDPOINTS,
        })),
    )
}
