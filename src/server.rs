//! HTTP query API over stored telemetry.
//!
//! Read-only; the monitor writes to the store and this server only reads it.
//!
//! ```text
//! GET /health
//! GET /sensors
//! GET /sensors/:id/readings?hours=1
//! GET /sensors/:id/summary?hours=24
//! GET /alerts?hours=24&severity=warning
//! ```

use crate::monitor::alerts::{ConnectionAlert, Severity};
use crate::monitor::health::HealthStatus;
use crate::monitor::reading::{ReadingSummary, SensorReading};
use crate::store::{window_start, StoreError, TelemetryQuery};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

const DEFAULT_READINGS_HOURS: i64 = 1;
const DEFAULT_SUMMARY_HOURS: i64 = 24;
const DEFAULT_ALERT_HOURS: i64 = 24;

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
    pub query: Arc<dyn TelemetryQuery>,
}

impl ServerConfig {
    pub fn new(port: u16, query: Arc<dyn TelemetryQuery>) -> Self {
        Self { port, query }
    }
}

type SharedQuery = Arc<dyn TelemetryQuery>;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// One row of `GET /sensors`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorView {
    pub sensor_id: String,
    pub status: HealthStatus,
    pub data_freshness_seconds: Option<f64>,
    pub error_count: u32,
    pub checked_at: Option<DateTime<Utc>>,
    pub latest: Option<SensorReading>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error(status: StatusCode, code: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
            code: code.to_string(),
        }),
    )
}

fn store_error(e: StoreError) -> ApiError {
    tracing::error!(error = %e, "query failed");
    error(StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR", e.to_string())
}

fn window(hours: Option<i64>, default: i64) -> Result<DateTime<Utc>, ApiError> {
    let hours = hours.unwrap_or(default);
    window_start(Utc::now(), hours).ok_or_else(|| {
        error(
            StatusCode::BAD_REQUEST,
            "INVALID_WINDOW",
            format!("hours must be a positive number of hours, got {hours}"),
        )
    })
}

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    pub hours: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AlertQuery {
    pub hours: Option<i64>,
    pub severity: Option<String>,
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /sensors
async fn sensors(State(query): State<SharedQuery>) -> Result<Json<Vec<SensorView>>, ApiError> {
    let mut views: BTreeMap<String, SensorView> = BTreeMap::new();

    for record in query.current_health().map_err(store_error)? {
        views.insert(
            record.sensor_id.clone(),
            SensorView {
                sensor_id: record.sensor_id,
                status: record.status,
                data_freshness_seconds: Some(record.data_freshness_seconds),
                error_count: record.error_count,
                checked_at: Some(record.timestamp),
                latest: None,
            },
        );
    }
    for reading in query.latest_readings().map_err(store_error)? {
        views
            .entry(reading.sensor_id.clone())
            .or_insert_with(|| SensorView {
                sensor_id: reading.sensor_id.clone(),
                status: HealthStatus::Unknown,
                data_freshness_seconds: None,
                error_count: 0,
                checked_at: None,
                latest: None,
            })
            .latest = Some(reading);
    }

    Ok(Json(views.into_values().collect()))
}

/// GET /sensors/:id/readings
async fn readings(
    State(query): State<SharedQuery>,
    Path(sensor_id): Path<String>,
    Query(params): Query<WindowQuery>,
) -> Result<Json<Vec<SensorReading>>, ApiError> {
    let since = window(params.hours, DEFAULT_READINGS_HOURS)?;
    let rows = query
        .readings(&sensor_id, since, Utc::now())
        .map_err(store_error)?;
    Ok(Json(rows))
}

/// GET /sensors/:id/summary
async fn summary(
    State(query): State<SharedQuery>,
    Path(sensor_id): Path<String>,
    Query(params): Query<WindowQuery>,
) -> Result<Json<ReadingSummary>, ApiError> {
    let since = window(params.hours, DEFAULT_SUMMARY_HOURS)?;
    let rows = query
        .readings(&sensor_id, since, Utc::now())
        .map_err(store_error)?;

    ReadingSummary::from_readings(&sensor_id, &rows)
        .map(Json)
        .ok_or_else(|| {
            error(
                StatusCode::NOT_FOUND,
                "NO_READINGS",
                format!("no readings for {sensor_id} in the window"),
            )
        })
}

/// GET /alerts
async fn alerts(
    State(query): State<SharedQuery>,
    Query(params): Query<AlertQuery>,
) -> Result<Json<Vec<ConnectionAlert>>, ApiError> {
    let since = window(params.hours, DEFAULT_ALERT_HOURS)?;
    let min_severity = params
        .severity
        .as_deref()
        .map(str::parse::<Severity>)
        .transpose()
        .map_err(|e| error(StatusCode::BAD_REQUEST, "INVALID_SEVERITY", e))?;

    let rows = query.alerts(since, min_severity).map_err(store_error)?;
    Ok(Json(rows))
}

pub fn router(query: SharedQuery) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sensors", get(sensors))
        .route("/sensors/:id/readings", get(readings))
        .route("/sensors/:id/summary", get(summary))
        .route("/alerts", get(alerts))
        .layer(
            CorsLayer::new()
                .allow_origin([
                    HeaderValue::from_static("http://localhost"),
                    HeaderValue::from_static("http://127.0.0.1"),
                ])
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(query)
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(config.query);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Query API listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
