//! In-memory delivery channel for testing and dry runs.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::application::ports::{ChannelError, DeliveryChannel};
use crate::domain::notification::Notification;

/// Delivery channel that records what it receives.
#[derive(Debug)]
pub struct MemoryChannel {
    name: String,
    delivered: RwLock<Vec<Notification>>,
    delay: Option<Duration>,
    fail_send: AtomicBool,
    fail_initialize: bool,
    fail_nth: Option<usize>,
    initialized: AtomicBool,
    attempts: AtomicUsize,
    initializations: AtomicUsize,
    shutdowns: AtomicUsize,
}

impl MemoryChannel {
    /// Create a healthy channel.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delivered: RwLock::new(Vec::new()),
            delay: None,
            fail_send: AtomicBool::new(false),
            fail_initialize: false,
            fail_nth: None,
            initialized: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
            initializations: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
        }
    }

    /// Fail every send.
    #[must_use]
    pub fn failing(self) -> Self {
        self.fail_send.store(true, Ordering::Release);
        self
    }

    /// Fail only the send attempt with this 1-based index.
    #[must_use]
    pub const fn failing_nth(mut self, attempt: usize) -> Self {
        self.fail_nth = Some(attempt);
        self
    }

    /// Fail `initialize()`.
    #[must_use]
    pub const fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    /// Sleep before every send.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Toggle send failures at runtime.
    pub fn set_failing(&self, failing: bool) {
        self.fail_send.store(failing, Ordering::Release);
    }

    /// Notifications accepted so far, in arrival order.
    #[must_use]
    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered.read().clone()
    }

    /// Number of `send()` calls, failed ones included.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Acquire)
    }

    /// Number of successful `initialize()` calls.
    #[must_use]
    pub fn initialize_count(&self) -> usize {
        self.initializations.load(Ordering::Acquire)
    }

    /// Number of `shutdown()` calls.
    #[must_use]
    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::Acquire)
    }

    /// Whether the channel is currently initialized.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }
}

#[async_trait]
impl DeliveryChannel for MemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> Result<(), ChannelError> {
        if self.fail_initialize {
            return Err(ChannelError::Initialization(format!(
                "{} refused to start",
                self.name
            )));
        }
        self.initializations.fetch_add(1, Ordering::AcqRel);
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        self.shutdowns.fetch_add(1, Ordering::AcqRel);
        self.initialized.store(false, Ordering::Release);
        Ok(())
    }

    async fn send(&self, notification: &Notification) -> Result<(), ChannelError> {
        let attempt = self.attempts.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_send.load(Ordering::Acquire) || self.fail_nth == Some(attempt) {
            return Err(ChannelError::Send(format!(
                "{} rejected attempt {attempt}",
                self.name
            )));
        }
        self.delivered.write().push(notification.clone());
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        self.is_initialized() && !self.fail_send.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;
    use tokio_test::{assert_err, assert_ok, block_on};

    use super::*;
    use crate::domain::event::{Asset, MarketEvent, PriceAlertEvent};
    use crate::domain::notification::{NotificationCandidate, Severity};

    fn notification(price: i64) -> Notification {
        let event = MarketEvent::PriceAlert(PriceAlertEvent {
            timestamp: Utc::now(),
            asset: Asset::new("BTC"),
            price: Decimal::from(price),
            reference_price: None,
        });
        Notification::from_candidate(
            NotificationCandidate::new("price_alert", Severity::Info, "BTC price alert"),
            &event,
        )
    }

    #[test]
    fn records_in_arrival_order() {
        let channel = MemoryChannel::new("memory");
        block_on(async {
            assert_ok!(channel.initialize().await);
            assert_ok!(channel.send(&notification(1)).await);
            assert_ok!(channel.send(&notification(2)).await);
        });

        let delivered = channel.delivered();
        assert_eq!(delivered.len(), 2);
        assert!(delivered[0].message().starts_with("BTC"));
        assert!(delivered[0].created_at() <= delivered[1].created_at());
        assert_eq!(channel.attempts(), 2);
    }

    #[test]
    fn fails_only_the_nth_attempt() {
        let channel = MemoryChannel::new("memory").failing_nth(2);
        block_on(async {
            assert_ok!(channel.send(&notification(1)).await);
            assert_err!(channel.send(&notification(2)).await);
            assert_ok!(channel.send(&notification(3)).await);
        });
        assert_eq!(channel.delivered().len(), 2);
        assert_eq!(channel.attempts(), 3);
    }

    #[test]
    fn failure_toggle_drives_health() {
        let channel = MemoryChannel::new("memory");
        block_on(async {
            assert_ok!(channel.initialize().await);
            assert!(channel.is_healthy().await);

            channel.set_failing(true);
            assert!(!channel.is_healthy().await);
            assert_err!(channel.send(&notification(1)).await);

            channel.set_failing(false);
            assert!(channel.is_healthy().await);
        });
    }

    #[test]
    fn refuses_initialize_when_configured() {
        let channel = MemoryChannel::new("memory").failing_initialize();
        assert!(matches!(
            block_on(channel.initialize()),
            Err(ChannelError::Initialization(_))
        ));
        assert!(!channel.is_initialized());
        assert_eq!(channel.initialize_count(), 0);
    }
}
