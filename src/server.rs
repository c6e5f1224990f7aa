//! ==============================================================================
//! server.rs - dashboard json api
//! ==============================================================================
//!
//! routes:
//!     GET  /api                   current reading, derived status, connection
//!     GET  /api/history           rolling chart history
//!     GET  /api/statistics        ?preset=24h|7d|30d|90d|all  or  ?start=&end=
//!     GET  /api/report            same range params, plus ?filename=
//!     GET  /api/sensors           sensor registry and current selection
//!     POST /api/sensors/select    {"id": "..."}
//!     GET  /api/settings
//!     PUT  /api/settings          partial settings, shallow merge
//!     POST /api/settings/reset
//!
//! relationships:
//!     - reads: monitor.rs (DashboardState), subscriber.rs (RegistryHandle)
//!     - writes: settings.rs (through the shared store)
//!
//! ==============================================================================

use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;

use crate::classifier::classify_latest;
use crate::domain::{ConnectionState, HistoryPoint, Reading, Status, ThresholdConfig};
use crate::monitor::SharedDashboard;
use crate::report::{build_report, Report};
use crate::settings::{InvalidSettings, Settings, SettingsPatch, SettingsStore};
use crate::stats::{compute_statistics, filter_by_date_range, RangePreset, Statistics};
use crate::subscriber::{RegistryHandle, RegistryState};

#[derive(Clone)]
pub struct ApiState {
    pub dashboard: SharedDashboard,
    pub settings: Arc<RwLock<SettingsStore>>,
    pub registry: RegistryHandle,
    /// local timezone for report file names
    pub offset: FixedOffset,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api", get(api_handler))
        .route("/api/history", get(history_handler))
        .route("/api/statistics", get(statistics_handler))
        .route("/api/report", get(report_handler))
        .route("/api/sensors", get(sensors_handler))
        .route("/api/sensors/select", post(select_sensor_handler))
        .route("/api/settings", get(get_settings_handler).put(put_settings_handler))
        .route("/api/settings/reset", post(reset_settings_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server(bind: &str, state: ApiState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("dashboard api live at http://{}", bind);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ==============================================================================
// errors
// ==============================================================================

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(e: anyhow::Error) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: format!("{:#}", e) }
    }

    fn internal(e: anyhow::Error) -> Self {
        tracing::error!("api error: {:#}", e);
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: format!("{:#}", e) }
    }

    /// rejected settings are the caller's fault, anything else is ours
    fn from_save(e: anyhow::Error) -> Self {
        if e.is::<InvalidSettings>() {
            Self::bad_request(e)
        } else {
            Self::internal(e)
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({"status": "error", "message": self.message}));
        (self.status, body).into_response()
    }
}

// ==============================================================================
// current state
// ==============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardView {
    pub reading: Option<Reading>,
    pub status: Status,
    /// warning or danger: show the alert banner
    pub alert: bool,
    pub connection: ConnectionState,
    pub thresholds: ThresholdConfig,
    pub last_update: Option<DateTime<Utc>>,
    pub last_notification_at: Option<DateTime<Utc>>,
    pub notifications_sent: u64,
}

async fn api_handler(State(state): State<ApiState>) -> Json<DashboardView> {
    let thresholds = state.settings.read().await.current().thresholds;
    let dash = state.dashboard.read().await;
    let status = classify_latest(dash.reading.as_ref().map(|r| r.value), &thresholds);
    Json(DashboardView {
        reading: dash.reading.clone(),
        status,
        alert: status.is_alerting(),
        connection: dash.connection.clone(),
        thresholds,
        last_update: dash.last_update,
        last_notification_at: dash.last_notification_at,
        notifications_sent: dash.notifications_sent,
    })
}

async fn history_handler(State(state): State<ApiState>) -> Json<Vec<HistoryPoint>> {
    Json(state.dashboard.read().await.history.clone())
}

// ==============================================================================
// ranges, statistics, reports
// ==============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    pub preset: Option<RangePreset>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub filename: Option<String>,
}

impl RangeQuery {
    /// explicit start/end win over a preset
    fn resolve(
        &self,
        now: DateTime<Utc>,
    ) -> (RangePreset, Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        if self.start.is_some() || self.end.is_some() {
            return (RangePreset::Custom, self.start, self.end);
        }
        let preset = self.preset.unwrap_or_default();
        let (start, end) = preset.bounds(now);
        (preset, start, end)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsView {
    pub label: &'static str,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub statistics: Statistics,
    pub percentages: TierPercentages,
}

/// rounded share of readings per tier, for the distribution bars
#[derive(Serialize)]
pub struct TierPercentages {
    pub safe: u32,
    pub warning: u32,
    pub danger: u32,
}

impl From<&Statistics> for TierPercentages {
    fn from(stats: &Statistics) -> Self {
        Self {
            safe: stats.percentage(Status::Safe),
            warning: stats.percentage(Status::Warning),
            danger: stats.percentage(Status::Danger),
        }
    }
}

async fn statistics_handler(
    State(state): State<ApiState>,
    Query(query): Query<RangeQuery>,
) -> Json<StatisticsView> {
    let (preset, start, end) = query.resolve(Utc::now());
    let thresholds = state.settings.read().await.current().thresholds;
    let points = filter_by_date_range(&state.dashboard.read().await.history, start, end);
    let statistics = compute_statistics(&points, &thresholds);
    Json(StatisticsView {
        label: preset.label(),
        start,
        end,
        percentages: TierPercentages::from(&statistics),
        statistics,
    })
}

async fn report_handler(
    State(state): State<ApiState>,
    Query(query): Query<RangeQuery>,
) -> Json<Report> {
    let now = Utc::now();
    let (_, start, end) = query.resolve(now);
    let thresholds = state.settings.read().await.current().thresholds;
    let points = filter_by_date_range(&state.dashboard.read().await.history, start, end);
    let sensor = state.registry.snapshot().selected_sensor().map(|s| s.info.clone());
    Json(build_report(
        &points,
        &thresholds,
        sensor,
        query.filename.as_deref(),
        now,
        state.offset,
    ))
}

// ==============================================================================
// sensors
// ==============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorsView {
    #[serde(flatten)]
    pub state: RegistryState,
    pub sensor_count: usize,
}

impl From<RegistryState> for SensorsView {
    fn from(state: RegistryState) -> Self {
        let sensor_count = state.sensor_count();
        Self { state, sensor_count }
    }
}

async fn sensors_handler(State(state): State<ApiState>) -> Json<SensorsView> {
    Json(state.registry.snapshot().into())
}

#[derive(Deserialize)]
struct SelectRequest {
    id: String,
}

async fn select_sensor_handler(
    State(state): State<ApiState>,
    Json(req): Json<SelectRequest>,
) -> Result<Json<SensorsView>, ApiError> {
    state.registry.select(&req.id).map_err(ApiError::bad_request)?;
    Ok(Json(state.registry.snapshot().into()))
}

// ==============================================================================
// settings
// ==============================================================================

async fn get_settings_handler(State(state): State<ApiState>) -> Json<Settings> {
    Json(state.settings.read().await.current().clone())
}

async fn put_settings_handler(
    State(state): State<ApiState>,
    Json(patch): Json<SettingsPatch>,
) -> Result<Json<Settings>, ApiError> {
    let saved = state.settings.write().await.save(patch).map_err(ApiError::from_save)?;
    Ok(Json(saved))
}

async fn reset_settings_handler(State(state): State<ApiState>) -> Result<Json<Settings>, ApiError> {
    let mut store = state.settings.write().await;
    store.reset_to_defaults().map_err(ApiError::internal)?;
    Ok(Json(store.current().clone()))
}
