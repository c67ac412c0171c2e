//! Mock feed monitor for testing and dry runs.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::application::ports::{FeedError, FeedMonitor, FeedSignal};
use crate::domain::event::MarketEvent;

/// In-process feed driven by the caller.
#[derive(Debug)]
pub struct MockFeedMonitor {
    signals: broadcast::Sender<FeedSignal>,
    connected: AtomicBool,
    fail_connect: AtomicBool,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl Default for MockFeedMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFeedMonitor {
    /// Create a disconnected mock feed.
    #[must_use]
    pub fn new() -> Self {
        let (signals, _) = broadcast::channel(1024);
        Self {
            signals,
            connected: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        }
    }

    /// Make every `connect()` fail.
    #[must_use]
    pub fn failing() -> Self {
        let feed = Self::new();
        feed.fail_connect.store(true, Ordering::Release);
        feed
    }

    /// Publish an event to subscribers. Returns the number of receivers.
    pub fn emit(&self, event: impl Into<MarketEvent>) -> usize {
        self.signals.send(FeedSignal::Event(event.into())).unwrap_or(0)
    }

    /// Simulate a connection drop.
    pub fn drop_connection(&self, reason: &str) {
        self.connected.store(false, Ordering::Release);
        let _ = self.signals.send(FeedSignal::Error(reason.to_string()));
    }

    /// Simulate a successful reconnect.
    pub fn reconnect(&self) {
        self.connected.store(true, Ordering::Release);
        let _ = self.signals.send(FeedSignal::Reconnected);
    }

    /// Number of `connect()` calls.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::Acquire)
    }

    /// Number of `disconnect()` calls.
    #[must_use]
    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::Acquire)
    }
}

#[async_trait]
impl FeedMonitor for MockFeedMonitor {
    async fn connect(&self) -> Result<(), FeedError> {
        self.connects.fetch_add(1, Ordering::AcqRel);
        if self.fail_connect.load(Ordering::Acquire) {
            return Err(FeedError::ConnectionFailed("mock feed refused".to_string()));
        }
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), FeedError> {
        self.disconnects.fetch_add(1, Ordering::AcqRel);
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn subscribe(&self) -> broadcast::Receiver<FeedSignal> {
        self.signals.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_and_drop() {
        let feed = MockFeedMonitor::new();
        let mut rx = feed.subscribe();

        feed.connect().await.unwrap();
        assert!(feed.is_connected());

        feed.drop_connection("reset by peer");
        assert!(!feed.is_connected());
        assert!(matches!(rx.recv().await, Ok(FeedSignal::Error(reason)) if reason == "reset by peer"));
    }

    #[tokio::test]
    async fn failing_feed_refuses_connect() {
        let feed = MockFeedMonitor::failing();
        assert!(feed.connect().await.is_err());
        assert!(!feed.is_connected());
        assert_eq!(feed.connect_count(), 1);
    }
}
