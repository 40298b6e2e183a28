//! HTTP endpoints for the tally service.
//!
//! # Ingestion
//!
//! - `GET|POST /push?title=&object_id=&value=&meta=&comment=` buffers one
//!   event. `value` defaults to 1, `object_id` to 0. An empty or missing
//!   title is accepted as a no-op.
//! - `GET /info?title=` returns a snapshot of one series, or `null`.
//!
//! # Operations
//!
//! - `GET /api/health` - liveness
//! - `GET /api/status` - registry and scheduler counters
//! - `POST /api/sync` - run one cycle now (409 while one is running)
//! - `POST /api/sync/start`, `POST /api/sync/stop` - scheduler lifecycle
//!
//! ## Error Handling
//!
//! All endpoints return structured JSON errors via [`AppError`]. Malformed
//! numbers, NaN and infinities included, are rejected with 400 before
//! reaching the registry; store failures return 503 since the store may
//! come back on its own.
//!
//! # Example
//!
//! ```ignore
//! use tally_service::api;
//!
//! let app = api::router().with_state(state);
//! ```

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tally_core::{
    AppendOutcome, PersistenceGateway, PushEvent, PushOutcome, SeriesId, SeriesInfo, SyncReport,
};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::state::AppState;

/// Create the API router.
pub fn router<G: PersistenceGateway + 'static>() -> Router<Arc<AppState<G>>> {
    Router::new()
        // Ingestion
        .route("/push", get(push::<G>).post(push::<G>))
        .route("/info", get(info::<G>))
        // Health and status
        .route("/api/health", get(health))
        .route("/api/status", get(get_status::<G>))
        // Sync control
        .route("/api/sync", post(sync_now::<G>))
        .route("/api/sync/start", post(scheduler_start::<G>))
        .route("/api/sync/stop", post(scheduler_stop::<G>))
}

// ==========================================================================
// Ingestion
// ==========================================================================

/// Raw push parameters; numbers are parsed by hand to report bad input.
#[derive(Debug, Default, Deserialize)]
pub struct PushParams {
    pub title: Option<String>,
    #[serde(alias = "objectId")]
    pub object_id: Option<String>,
    pub value: Option<String>,
    pub meta: Option<String>,
    pub comment: Option<String>,
}

impl PushParams {
    fn into_event(self) -> Result<PushEvent, AppError> {
        Ok(PushEvent {
            title: self.title.unwrap_or_default(),
            object_id: parse_field("object_id", self.object_id.as_deref())?,
            value: parse_value(self.value.as_deref())?,
            meta: self.meta,
            comment: self.comment,
        })
    }
}

fn parse_field<T: std::str::FromStr>(
    name: &str,
    raw: Option<&str>,
) -> Result<Option<T>, AppError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => text
            .parse()
            .map(Some)
            .map_err(|_| AppError::BadRequest(format!("invalid {} '{}'", name, text))),
    }
}

/// `f64` parsing accepts `NaN` and `inf`, which the store cannot hold.
fn parse_value(raw: Option<&str>) -> Result<Option<f64>, AppError> {
    match parse_field::<f64>("value", raw)? {
        Some(value) if !value.is_finite() => Err(AppError::BadRequest(format!(
            "invalid value '{}': must be finite",
            raw.unwrap_or_default().trim()
        ))),
        value => Ok(value),
    }
}

/// Push response.
#[derive(Debug, Serialize)]
pub struct PushResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_id: Option<SeriesId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<AppendOutcome>,
}

impl From<PushOutcome> for PushResponse {
    fn from(outcome: PushOutcome) -> Self {
        match outcome {
            PushOutcome::Ignored => Self {
                accepted: false,
                series_id: None,
                row: None,
            },
            PushOutcome::Accepted { series_id, row } => Self {
                accepted: true,
                series_id: Some(series_id),
                row: Some(row),
            },
        }
    }
}

/// Buffer one event.
async fn push<G: PersistenceGateway + 'static>(
    State(state): State<Arc<AppState<G>>>,
    Query(params): Query<PushParams>,
) -> Result<Json<PushResponse>, AppError> {
    let event = params.into_event()?;
    debug!("Push to '{}'", event.title);
    let outcome = state.registry.push(event).await?;
    Ok(Json(outcome.into()))
}

#[derive(Debug, Deserialize)]
pub struct InfoParams {
    pub title: Option<String>,
}

/// Snapshot of one series, `null` if unknown.
async fn info<G: PersistenceGateway + 'static>(
    State(state): State<Arc<AppState<G>>>,
    Query(params): Query<InfoParams>,
) -> Json<Option<SeriesInfo>> {
    let Some(title) = params.title.filter(|t| !t.is_empty()) else {
        return Json(None);
    };
    Json(state.registry.info(&title).await)
}

// ==========================================================================
// Health and Status
// ==========================================================================

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Health check endpoint.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Service status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    /// Number of registered series.
    pub series: usize,
    /// Last successful sync cycle.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_synced_at: Option<OffsetDateTime>,
    pub scheduler: SchedulerStatus,
}

/// Scheduler state and counters.
#[derive(Debug, Default, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub interval_secs: u64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    pub ticks: u64,
    pub cycles_started: u64,
    pub cycles_succeeded: u64,
    pub cycles_failed: u64,
    pub ticks_skipped: u64,
    pub last_error: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_error_at: Option<OffsetDateTime>,
}

async fn get_status<G: PersistenceGateway + 'static>(
    State(state): State<Arc<AppState<G>>>,
) -> Json<StatusResponse> {
    let interval_secs = state.config.read().await.sync.interval_secs;

    let mut scheduler = SchedulerStatus {
        running: state.scheduler.is_running().await,
        interval_secs,
        started_at: state.scheduler.started_at().await,
        ..Default::default()
    };
    if let Some(stats) = state.scheduler.stats().await {
        scheduler.ticks = stats.ticks();
        scheduler.cycles_started = stats.started();
        scheduler.cycles_succeeded = stats.succeeded();
        scheduler.cycles_failed = stats.failed();
        scheduler.ticks_skipped = stats.skipped();
        scheduler.last_error = stats.last_error().await;
        scheduler.last_error_at = stats.last_error_at();
    }

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        started_at: state.started_at(),
        series: state.registry.len().await,
        last_synced_at: state.registry.last_synced_at(),
        scheduler,
    })
}

// ==========================================================================
// Sync Control
// ==========================================================================

/// Run one sync cycle now.
async fn sync_now<G: PersistenceGateway + 'static>(
    State(state): State<Arc<AppState<G>>>,
) -> Result<Json<SyncReport>, AppError> {
    let report = state.registry.try_synchronize().await?;
    Ok(Json(report))
}

/// Scheduler control response.
#[derive(Debug, Serialize)]
pub struct SchedulerActionResponse {
    pub success: bool,
    pub message: String,
    pub running: bool,
}

/// Start the background scheduler.
async fn scheduler_start<G: PersistenceGateway + 'static>(
    State(state): State<Arc<AppState<G>>>,
) -> Json<SchedulerActionResponse> {
    if !state.start_scheduler().await {
        return Json(SchedulerActionResponse {
            success: false,
            message: "Scheduler is already running".to_string(),
            running: true,
        });
    }

    Json(SchedulerActionResponse {
        success: true,
        message: "Scheduler started".to_string(),
        running: true,
    })
}

/// Stop the background scheduler, letting a running cycle finish.
async fn scheduler_stop<G: PersistenceGateway + 'static>(
    State(state): State<Arc<AppState<G>>>,
) -> Json<SchedulerActionResponse> {
    if !state.stop_scheduler().await {
        return Json(SchedulerActionResponse {
            success: false,
            message: "Scheduler is not running".to_string(),
            running: false,
        });
    }

    Json(SchedulerActionResponse {
        success: true,
        message: "Scheduler stopped".to_string(),
        running: false,
    })
}

// ==========================================================================
// Errors
// ==========================================================================

/// API error type.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Conflict(String),
    /// The store failed; the request may succeed later.
    Unavailable(String),
    Internal(String),
}

impl From<tally_core::Error> for AppError {
    fn from(e: tally_core::Error) -> Self {
        match e {
            tally_core::Error::SyncInProgress => AppError::Conflict(e.to_string()),
            tally_core::Error::NonFinite { .. } => AppError::BadRequest(e.to_string()),
            tally_core::Error::Store(_) => {
                warn!("Store error: {}", e);
                AppError::Unavailable(e.to_string())
            }
            tally_core::Error::Unassigned(_) => AppError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}
