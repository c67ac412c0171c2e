//! Log Delivery Channel
//!
//! Writes each notification to the tracing pipeline as a structured event,
//! at a level derived from its severity. Always available.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::application::ports::{ChannelError, DeliveryChannel};
use crate::domain::notification::{Notification, Severity};

/// Delivery channel backed by `tracing`.
#[derive(Debug)]
pub struct LogChannel {
    name: String,
    ready: AtomicBool,
}

impl Default for LogChannel {
    fn default() -> Self {
        Self::new("log")
    }
}

impl LogChannel {
    /// Create a log channel.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ready: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl DeliveryChannel for LogChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> Result<(), ChannelError> {
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        self.ready.store(false, Ordering::Release);
        Ok(())
    }

    async fn send(&self, notification: &Notification) -> Result<(), ChannelError> {
        if !self.ready.load(Ordering::Acquire) {
            return Err(ChannelError::Unavailable(format!(
                "{} is not initialized",
                self.name
            )));
        }

        let payload = serde_json::to_string(notification.payload())
            .map_err(|e| ChannelError::Send(format!("payload encoding failed: {e}")))?;

        macro_rules! emit {
            ($level:ident) => {
                tracing::$level!(
                    target: "notifications",
                    id = %notification.id(),
                    category = %notification.category(),
                    severity = notification.severity().as_str(),
                    asset = %notification.asset(),
                    rule = notification.rule_id(),
                    payload = %payload,
                    "{}",
                    notification.message()
                )
            };
        }

        match notification.severity() {
            Severity::Info => emit!(info),
            Severity::Warning => emit!(warn),
            Severity::Critical => emit!(error),
        }
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}
