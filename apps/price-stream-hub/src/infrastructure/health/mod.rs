//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, feed status reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (not shutting down)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::SubscriptionHub;
use crate::infrastructure::metrics::{get_metrics_handle, record_hub_stats};
use crate::infrastructure::stream::StreamState;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy" or "unhealthy".
    pub status: HealthStatus,
    /// Hub version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Number of running feeds.
    pub active_feeds: usize,
    /// Registered listeners across all feeds.
    pub listeners: usize,
    /// Running feeds by symbol.
    pub feeds: Vec<FeedInfo>,
    /// Connected streaming clients.
    pub sessions: usize,
    /// Delivery statistics.
    pub delivery: DeliveryStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Accepting subscriptions.
    Healthy,
    /// Shutting down.
    Unhealthy,
}

/// Status of one running feed.
#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    /// Feed symbol.
    pub symbol: String,
    /// Registered listeners.
    pub listeners: usize,
    /// Last delivered price, if any.
    pub last_price: Option<String>,
}

/// Delivery counters.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryStatus {
    /// Updates handed to listeners.
    pub updates_delivered: u64,
    /// Listener invocations that failed.
    pub listener_failures: u64,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
#[derive(Debug)]
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    hub: Arc<SubscriptionHub>,
    stream: Arc<StreamState>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(version: String, hub: Arc<SubscriptionHub>, stream: Arc<StreamState>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            hub,
            stream,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
#[derive(Debug)]
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

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
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

/// Build the health router.
#[must_use]
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.hub.is_shutting_down() {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    } else {
        (StatusCode::OK, "READY")
    }
}

async fn metrics_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            record_hub_stats(&state.hub.stats());
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let feeds: Vec<FeedInfo> = state
        .hub
        .active_symbols()
        .into_iter()
        .map(|symbol| FeedInfo {
            listeners: state.hub.listener_count(symbol.as_str()),
            last_price: state
                .hub
                .last_price(symbol.as_str())
                .map(|p| p.as_str().to_string()),
            symbol: symbol.into_inner(),
        })
        .collect();

    let stats = state.hub.stats();

    HealthResponse {
        status: determine_health_status(state.hub.is_shutting_down()),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        active_feeds: stats.registry.active_feeds,
        listeners: stats.registry.listeners,
        feeds,
        sessions: state.stream.active_sessions(),
        delivery: DeliveryStatus {
            updates_delivered: stats.updates_delivered,
            listener_failures: stats.listener_failures,
        },
    }
}

const fn determine_health_status(shutting_down: bool) -> HealthStatus {
    if shutting_down {
        HealthStatus::Unhealthy
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

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::application::ports::NoOpEventReporter;
    use crate::application::services::HubConfig;
    use crate::infrastructure::feeds::ScriptedFeedAdapter;

    fn state() -> Arc<HealthServerState> {
        let hub = Arc::new(SubscriptionHub::new(
            Arc::new(ScriptedFeedAdapter::new()),
            Arc::new(NoOpEventReporter),
            HubConfig::default(),
        ));
        let stream = Arc::new(StreamState::new(
            Arc::clone(&hub),
            16,
            CancellationToken::new(),
        ));
        Arc::new(HealthServerState::new("0.1.0".to_string(), hub, stream))
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn determine_status() {
        assert_eq!(determine_health_status(false), HealthStatus::Healthy);
        assert_eq!(determine_health_status(true), HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn ready_until_shutdown() {
        let state = state();
        let hub = Arc::clone(&state.hub);
        let app = router(state);

        let request = || Request::get("/readyz").body(Body::empty()).unwrap();

        let response = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        hub.shutdown().await;

        let response = app.oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn health_reports_json() {
        let response = router(state())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["sessions"], 0);
        assert_eq!(json["active_feeds"], 0);
        assert_eq!(json["feeds"], serde_json::json!([]));
    }
}
