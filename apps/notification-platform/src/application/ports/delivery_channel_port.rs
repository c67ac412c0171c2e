//! Delivery Channel Port (Driven Port)
//!
//! An independently owned transport that sends a notification to an
//! external destination. Retry and backoff, if any, belong to the channel;
//! the delivery coordinator makes exactly one `send` call per notification.

use async_trait::async_trait;

use crate::domain::notification::Notification;

/// Channel-level error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    /// The channel could not be brought up.
    #[error("channel initialization failed: {0}")]
    Initialization(String),

    /// The destination rejected or failed the send.
    #[error("send failed: {0}")]
    Send(String),

    /// The channel is not usable right now.
    #[error("channel unavailable: {0}")]
    Unavailable(String),
}

/// Delivery channel port.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Stable channel name used in logs, metrics and health reports.
    fn name(&self) -> &str;

    /// Bring the channel up.
    async fn initialize(&self) -> Result<(), ChannelError>;

    /// Tear the channel down.
    async fn shutdown(&self) -> Result<(), ChannelError>;

    /// Send one notification.
    async fn send(&self, notification: &Notification) -> Result<(), ChannelError>;

    /// Probe channel health.
    async fn is_healthy(&self) -> bool;
}
