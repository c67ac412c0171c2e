//! Feed Monitor Port (Driving Port)
//!
//! Interface for the component that owns the upstream market-data
//! connection. Connection retries after a failed `connect()` are the
//! caller's concern; reconnects after an established connection drops are
//! the monitor's own and are reported as [`FeedSignal::Reconnected`].
//!
//! No sequence numbers are guaranteed across a reconnect, so events may be
//! duplicated or missing around one.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::domain::event::MarketEvent;

/// Signal emitted by a feed monitor on its single tagged stream.
#[derive(Debug, Clone)]
pub enum FeedSignal {
    /// A decoded market event.
    Event(MarketEvent),
    /// The connection failed or dropped.
    Error(String),
    /// The connection was re-established after a drop.
    Reconnected,
}

/// Feed monitor error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FeedError {
    /// Could not establish the connection.
    #[error("feed connection failed: {0}")]
    ConnectionFailed(String),

    /// WebSocket protocol or transport error.
    #[error("feed websocket error: {0}")]
    WebSocket(String),

    /// A frame could not be decoded.
    #[error("feed decode error: {0}")]
    Decode(String),

    /// The connection was closed by the remote end.
    #[error("feed connection closed")]
    ConnectionClosed,

    /// Reconnection gave up.
    #[error("maximum reconnection attempts ({0}) exceeded")]
    MaxReconnectAttemptsExceeded(u32),
}

/// Feed monitor port.
#[async_trait]
pub trait FeedMonitor: Send + Sync {
    /// Establish the connection.
    async fn connect(&self) -> Result<(), FeedError>;

    /// Tear the connection down.
    async fn disconnect(&self) -> Result<(), FeedError>;

    /// Whether the connection is currently up.
    fn is_connected(&self) -> bool;

    /// Subscribe to the signal stream. Signals emitted before the call are
    /// not replayed.
    fn subscribe(&self) -> broadcast::Receiver<FeedSignal>;
}
