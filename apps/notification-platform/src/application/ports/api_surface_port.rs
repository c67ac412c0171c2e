//! API Surface Port (Driver Port)
//!
//! An externally exposed surface (HTTP, gRPC, ...) that reports platform
//! health and metrics. The platform controller starts it with a read-only
//! [`PlatformStatus`] view of itself.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::application::services::{MetricsSnapshot, PlatformState};

/// Read-only view of the running platform.
pub trait PlatformStatus: Send + Sync {
    /// Current lifecycle state.
    fn state(&self) -> PlatformState;

    /// Aggregate health: running, feed connected and every channel healthy.
    fn is_healthy(&self) -> bool;

    /// Whether the feed monitor reports a live connection.
    fn feed_connected(&self) -> bool;

    /// Health flag per delivery channel.
    fn channel_health(&self) -> BTreeMap<String, bool>;

    /// Current metrics.
    fn metrics(&self) -> MetricsSnapshot;
}

/// API surface error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

/// API surface port.
#[async_trait]
pub trait ApiSurface: Send + Sync {
    /// Start serving. Must return once the surface is accepting requests.
    async fn start(&self, status: Arc<dyn PlatformStatus>) -> Result<(), ApiError>;

    /// Stop serving. Calling it when not started is a no-op.
    async fn stop(&self) -> Result<(), ApiError>;
}
