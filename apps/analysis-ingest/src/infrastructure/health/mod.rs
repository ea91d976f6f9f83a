//! Health Check and Metrics Endpoint
//!
//! # Endpoints
//!
//! - `GET /health` - JSON status of the consumer loops, worker pool and store
//! - `GET /healthz` - liveness probe
//! - `GET /readyz` - ready while at least one consumer loop is running
//! - `GET /metrics` - Prometheus text format
//! - `GET /market-data/{product_id}/latest` - newest stored tick
//! - `GET /market-data/{product_id}/bars?minutes=N` - minute bars over the
//!   last `N` minutes (default 60)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::ports::TickQueryPort;
use crate::application::services::{ConsumerStats, WorkerPool};
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::postgres::PgTickRepository;

/// Bound on the store round-trip made by `/health`.
const DATABASE_PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Lookback for `/bars` when `minutes` is absent.
const DEFAULT_BAR_MINUTES: u32 = 60;

/// Longest lookback `/bars` accepts.
const MAX_BAR_MINUTES: u32 = 7 * 24 * 60;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Consumer loop counters.
    pub consumers: ConsumerInfo,
    /// Event tasks admitted and not yet finished.
    pub pool_in_flight: usize,
    /// Whether the store answered a ping. `None` when no store is attached.
    pub database_reachable: Option<bool>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every listener is running and the store answers.
    Healthy,
    /// Some listeners are down.
    Degraded,
    /// No listener is running or the store is unreachable.
    Unhealthy,
}

/// Consumer loop counters.
#[derive(Debug, Clone, Serialize)]
pub struct ConsumerInfo {
    /// Loops configured.
    pub expected: usize,
    /// Loops running.
    pub running: usize,
    /// Batches received.
    pub batches: u64,
    /// Batches acknowledged.
    pub acknowledged: u64,
    /// Redelivery requests.
    pub redelivered: u64,
    /// Batches acknowledged after exhausting redeliveries.
    pub forced: u64,
    /// Ticks stored.
    pub persisted: u64,
    /// When the last batch arrived.
    pub last_batch_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Health Server
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    expected_consumers: usize,
    stats: Arc<ConsumerStats>,
    pool: Arc<WorkerPool>,
    repository: Option<PgTickRepository>,
    queries: Option<Arc<dyn TickQueryPort>>,
}

impl HealthServerState {
    /// Create health state over the consumer stats and worker pool.
    #[must_use]
    pub fn new(
        version: String,
        expected_consumers: usize,
        stats: Arc<ConsumerStats>,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            expected_consumers,
            stats,
            pool,
            repository: None,
            queries: None,
        }
    }

    /// Ping `repository` on every `/health` request.
    #[must_use]
    pub fn with_repository(mut self, repository: PgTickRepository) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Serve the `/market-data` read routes from `queries`.
    #[must_use]
    pub fn with_queries(mut self, queries: Arc<dyn TickQueryPort>) -> Self {
        self.queries = Some(queries);
        self
    }
}

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails or the server stops abnormally.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Routes served by [`HealthServer`].
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .route("/market-data/{product_id}/latest", get(latest_tick_handler))
        .route("/market-data/{product_id}/bars", get(minute_bars_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let database_reachable = match &state.repository {
        Some(repository) => Some(matches!(
            tokio::time::timeout(DATABASE_PING_TIMEOUT, repository.ping()).await,
            Ok(Ok(()))
        )),
        None => None,
    };

    let response = build_health_response(&state, database_reachable);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.stats.running() > 0 {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

/// Query string for `/bars`.
#[derive(Debug, Deserialize)]
struct BarsQuery {
    minutes: Option<u32>,
}

async fn latest_tick_handler(
    State(state): State<Arc<HealthServerState>>,
    Path(product_id): Path<String>,
) -> Response {
    let Some(queries) = &state.queries else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match queries.latest(&product_id).await {
        Ok(Some(tick)) => (StatusCode::OK, Json(tick)).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "no data for product").into_response(),
        Err(e) => query_failed(&product_id, &e),
    }
}

async fn minute_bars_handler(
    State(state): State<Arc<HealthServerState>>,
    Path(product_id): Path<String>,
    Query(query): Query<BarsQuery>,
) -> Response {
    let Some(queries) = &state.queries else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let minutes = query.minutes.unwrap_or(DEFAULT_BAR_MINUTES);
    if minutes == 0 || minutes > MAX_BAR_MINUTES {
        return (
            StatusCode::BAD_REQUEST,
            format!("minutes must be between 1 and {MAX_BAR_MINUTES}"),
        )
            .into_response();
    }

    let since = Utc::now() - TimeDelta::minutes(i64::from(minutes));
    match queries.minute_bars(&product_id, since).await {
        Ok(bars) => (StatusCode::OK, Json(bars)).into_response(),
        Err(e) => query_failed(&product_id, &e),
    }
}

fn query_failed(product_id: &str, error: &impl std::fmt::Display) -> Response {
    tracing::warn!(product_id, error = %error, "Market data query failed");
    (StatusCode::SERVICE_UNAVAILABLE, "query failed").into_response()
}

fn build_health_response(
    state: &HealthServerState,
    database_reachable: Option<bool>,
) -> HealthResponse {
    let stats = &state.stats;
    let consumers = ConsumerInfo {
        expected: state.expected_consumers,
        running: stats.running(),
        batches: stats.batches(),
        acknowledged: stats.acknowledged(),
        redelivered: stats.redelivered(),
        forced: stats.forced(),
        persisted: stats.persisted(),
        last_batch_at: stats.last_batch_at(),
    };

    HealthResponse {
        status: determine_health_status(&consumers, database_reachable),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        consumers,
        pool_in_flight: state.pool.in_flight(),
        database_reachable,
    }
}

fn determine_health_status(consumers: &ConsumerInfo, database_reachable: Option<bool>) -> HealthStatus {
    if consumers.running == 0 || database_reachable == Some(false) {
        HealthStatus::Unhealthy
    } else if consumers.running < consumers.expected {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
