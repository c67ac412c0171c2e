//! Health Check and Metrics Endpoint
//!
//! HTTP [`ApiSurface`] over the running platform.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON health status (503 when unhealthy)
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (platform healthy)
//! - `GET /metrics` - Prometheus metrics in text format
//! - `GET /stats` - JSON metrics snapshot

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{ApiError, ApiSurface, PlatformStatus};
use crate::application::services::{MetricsSnapshot, PlatformState};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Lifecycle state.
    pub state: PlatformState,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Whether the feed is connected.
    pub feed_connected: bool,
    /// Health per delivery channel.
    pub channels: BTreeMap<String, bool>,
    /// Current metrics.
    pub metrics: MetricsSnapshot,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Running, feed connected and every channel healthy.
    Healthy,
    /// Running with the feed up but some channel unhealthy.
    Degraded,
    /// Not running or feed down.
    Unhealthy,
}

struct HealthState {
    version: String,
    started_at: Instant,
    status: Arc<dyn PlatformStatus>,
}

// =============================================================================
// Health Server
// =============================================================================

struct Serving {
    addr: SocketAddr,
    cancel: CancellationToken,
    handle: JoinHandle<Result<(), ApiError>>,
}

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    serving: tokio::sync::Mutex<Option<Serving>>,
}

impl HealthServer {
    /// Create a server for `port` (0 picks an ephemeral port).
    #[must_use]
    pub const fn new(port: u16) -> Self {
        Self {
            port,
            serving: tokio::sync::Mutex::const_new(None),
        }
    }

    /// Address actually bound, while serving.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.serving.lock().await.as_ref().map(|s| s.addr)
    }
}

impl std::fmt::Debug for HealthServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthServer")
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ApiSurface for HealthServer {
    async fn start(&self, status: Arc<dyn PlatformStatus>) -> Result<(), ApiError> {
        let mut serving = self.serving.lock().await;
        if serving.is_some() {
            return Ok(());
        }

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ApiError::BindFailed(self.port, e.to_string()))?;
        let addr = listener
            .local_addr()
            .map_err(|e| ApiError::BindFailed(self.port, e.to_string()))?;

        let app = router(status);
        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
                .map_err(|e| ApiError::ServerFailed(e.to_string()))
        });

        tracing::info!(port = addr.port(), "Health server listening");
        *serving = Some(Serving {
            addr,
            cancel,
            handle,
        });
        Ok(())
    }

    async fn stop(&self) -> Result<(), ApiError> {
        let Some(serving) = self.serving.lock().await.take() else {
            return Ok(());
        };

        serving.cancel.cancel();
        let result = serving
            .handle
            .await
            .map_err(|e| ApiError::ServerFailed(e.to_string()))?;
        tracing::info!("Health server stopped");
        result
    }
}

/// Build the HTTP router over a platform status view.
pub fn router(status: Arc<dyn PlatformStatus>) -> Router {
    let state = Arc::new(HealthState {
        version: env!("CARGO_PKG_VERSION").to_string(),
        started_at: Instant::now(),
        status,
    });

    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    if state.status.is_healthy() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn stats_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    Json(state.status.metrics())
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

fn build_health_response(state: &HealthState) -> HealthResponse {
    let platform_state = state.status.state();
    let feed_connected = state.status.feed_connected();
    let channels = state.status.channel_health();

    HealthResponse {
        status: determine_health_status(platform_state, feed_connected, &channels),
        state: platform_state,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feed_connected,
        channels,
        metrics: state.status.metrics(),
    }
}

fn determine_health_status(
    state: PlatformState,
    feed_connected: bool,
    channels: &BTreeMap<String, bool>,
) -> HealthStatus {
    if state != PlatformState::Running || !feed_connected {
        return HealthStatus::Unhealthy;
    }
    if channels.values().all(|&healthy| healthy) {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::application::services::MetricsRegistry;

    struct FixedStatus {
        state: PlatformState,
        feed_connected: bool,
        channels: BTreeMap<String, bool>,
    }

    impl PlatformStatus for FixedStatus {
        fn state(&self) -> PlatformState {
            self.state
        }

        fn is_healthy(&self) -> bool {
            self.state == PlatformState::Running
                && self.feed_connected
                && self.channels.values().all(|&h| h)
        }

        fn feed_connected(&self) -> bool {
            self.feed_connected
        }

        fn channel_health(&self) -> BTreeMap<String, bool> {
            self.channels.clone()
        }

        fn metrics(&self) -> MetricsSnapshot {
            MetricsRegistry::default().snapshot()
        }
    }

    fn status(state: PlatformState, feed_connected: bool, slack: bool) -> Arc<dyn PlatformStatus> {
        Arc::new(FixedStatus {
            state,
            feed_connected,
            channels: BTreeMap::from([("log".to_string(), true), ("slack".to_string(), slack)]),
        })
    }

    async fn get_path(app: Router, path: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
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
        let mut channels = BTreeMap::from([("log".to_string(), true)]);
        assert_eq!(
            determine_health_status(PlatformState::Running, true, &channels),
            HealthStatus::Healthy
        );
        assert_eq!(
            determine_health_status(PlatformState::Running, false, &channels),
            HealthStatus::Unhealthy
        );
        assert_eq!(
            determine_health_status(PlatformState::Stopped, true, &channels),
            HealthStatus::Unhealthy
        );

        channels.insert("slack".to_string(), false);
        assert_eq!(
            determine_health_status(PlatformState::Running, true, &channels),
            HealthStatus::Degraded
        );
    }

    #[tokio::test]
    async fn healthy_platform_reports_ok() {
        let app = router(status(PlatformState::Running, true, true));

        let (code, body) = get_path(app.clone(), "/health").await;
        assert_eq!(code, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["state"], "running");
        assert_eq!(json["channels"]["slack"], true);

        let (code, body) = get_path(app, "/readyz").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body, "READY");
    }

    #[tokio::test]
    async fn disconnected_feed_is_unavailable() {
        let app = router(status(PlatformState::Running, false, true));

        let (code, _) = get_path(app.clone(), "/health").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);

        let (code, body) = get_path(app, "/readyz").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "NOT READY");
    }

    #[tokio::test]
    async fn liveness_ignores_platform_state() {
        let app = router(status(PlatformState::Stopped, false, false));
        let (code, body) = get_path(app, "/healthz").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn stats_returns_snapshot() {
        let app = router(status(PlatformState::Running, true, true));
        let (code, body) = get_path(app, "/stats").await;
        assert_eq!(code, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["sent"], 0);
    }

    #[tokio::test]
    async fn start_and_stop_on_ephemeral_port() {
        let server = HealthServer::new(0);
        server
            .start(status(PlatformState::Running, true, true))
            .await
            .unwrap();
        let addr = server.local_addr().await.unwrap();
        assert_ne!(addr.port(), 0);

        server.stop().await.unwrap();
        assert!(server.local_addr().await.is_none());
        assert!(server.stop().await.is_ok());
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let first = HealthServer::new(0);
        first
            .start(status(PlatformState::Running, true, true))
            .await
            .unwrap();
        let port = first.local_addr().await.unwrap().port();

        let second = HealthServer::new(port);
        let err = second
            .start(status(PlatformState::Running, true, true))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BindFailed(p, _) if p == port));

        first.stop().await.unwrap();
    }
}
