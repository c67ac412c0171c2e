//! Notification Types
//!
//! A [`Notification`] is created by the event processor from one rule match
//! against one [`MarketEvent`] and is immutable afterwards. The delivery
//! coordinator shares it across channel workers as `Arc<Notification>`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::event::{Asset, EventCategory, MarketEvent};

// =============================================================================
// Identity and Severity
// =============================================================================

/// Unique notification identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(Uuid);

impl NotificationId {
    /// Generate a new random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Notification severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational.
    Info,
    /// Worth attention.
    Warning,
    /// Requires immediate attention.
    Critical,
}

impl Severity {
    /// Get the severity name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Candidate
// =============================================================================

/// A rule match returned by a rule evaluator, before identity is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationCandidate {
    /// Identifier of the rule that matched.
    pub rule_id: String,
    /// Severity assigned by the rule.
    pub severity: Severity,
    /// Human-readable message.
    pub message: String,
}

impl NotificationCandidate {
    /// Create a new candidate.
    #[must_use]
    pub fn new(rule_id: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.into(),
            severity,
            message: message.into(),
        }
    }
}

// =============================================================================
// Notification
// =============================================================================

/// Immutable notification record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    id: NotificationId,
    category: EventCategory,
    severity: Severity,
    asset: Asset,
    rule_id: String,
    message: String,
    payload: MarketEvent,
    created_at: DateTime<Utc>,
}

impl Notification {
    /// Build a notification from a rule match against `event`.
    #[must_use]
    pub fn from_candidate(candidate: NotificationCandidate, event: &MarketEvent) -> Self {
        Self {
            id: NotificationId::generate(),
            category: event.category(),
            severity: candidate.severity,
            asset: event.asset().clone(),
            rule_id: candidate.rule_id,
            message: candidate.message,
            payload: event.clone(),
            created_at: Utc::now(),
        }
    }

    /// Unique identifier.
    #[must_use]
    pub const fn id(&self) -> NotificationId {
        self.id
    }

    /// Category of the triggering event.
    #[must_use]
    pub const fn category(&self) -> EventCategory {
        self.category
    }

    /// Severity.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        self.severity
    }

    /// Subject asset.
    #[must_use]
    pub const fn asset(&self) -> &Asset {
        &self.asset
    }

    /// Rule that produced this notification.
    #[must_use]
    pub fn rule_id(&self) -> &str {
        &self.rule_id
    }

    /// Human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Triggering event.
    #[must_use]
    pub const fn payload(&self) -> &MarketEvent {
        &self.payload
    }

    /// Creation time.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

// =============================================================================
// Tests
// =============================================================================
