//! Error taxonomy for the notification platform.
//!
//! | Error | Raised by | Fatal |
//! |-------|-----------|-------|
//! | [`FeedError`] | feed monitor | no, surfaces as a feed error signal |
//! | [`EvaluationError`] | rule evaluator | no, the event's notifications are lost |
//! | [`DeliveryError`] | delivery coordinator | no, metered per channel |
//! | [`PlatformError::Startup`] | `start()` | yes, startup is rolled back |
//! | [`PlatformError::AlreadyStarted`] | `start()` | no, state unchanged |
//!
//! Once the platform is running no error escapes the pipeline; every
//! runtime failure is converted into a [`PipelineError`] and recorded by the
//! metrics registry.

use std::fmt;

use thiserror::Error;

use crate::application::ports::{ApiError, EvaluationError, FeedError};
use crate::application::services::{CoordinatorError, DeliveryError, PlatformState};
use crate::domain::event::EventCategory;

/// A runtime failure inside the running pipeline.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// The feed connection failed or dropped.
    #[error("feed connection error: {0}")]
    Connection(String),

    /// Rule evaluation failed for one event.
    #[error("{category} evaluation failed: {source}")]
    Evaluation {
        /// Category of the event being evaluated.
        category: EventCategory,
        /// Underlying failure.
        #[source]
        source: EvaluationError,
    },

    /// Delivery of one notification to one channel failed.
    #[error("{category} delivery via {channel} failed: {source}")]
    Delivery {
        /// Category of the notification.
        category: EventCategory,
        /// Channel name.
        channel: String,
        /// Underlying failure.
        #[source]
        source: DeliveryError,
    },

    /// Events were dropped before reaching the event processor.
    #[error("{dropped} event(s) dropped: {reason}")]
    Dispatch {
        /// Number of events lost.
        dropped: u64,
        /// Why they were dropped.
        reason: String,
    },
}

/// Startup step of the platform controller, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupStage {
    /// Connect the feed monitor.
    FeedConnect,
    /// Subscribe to feed signals.
    EventSubscription,
    /// Initialize the delivery coordinator.
    DeliveryInitialize,
    /// Start the API surface.
    ApiStart,
    /// Start the metrics registry.
    MetricsStart,
}

impl StartupStage {
    /// Get the stage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FeedConnect => "feed_connect",
            Self::EventSubscription => "event_subscription",
            Self::DeliveryInitialize => "delivery_initialize",
            Self::ApiStart => "api_start",
            Self::MetricsStart => "metrics_start",
        }
    }
}

impl fmt::Display for StartupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cause of a failed startup step.
#[derive(Debug, Clone, Error)]
pub enum StartupError {
    /// Feed monitor failed to connect.
    #[error(transparent)]
    Feed(#[from] FeedError),

    /// A delivery channel failed to initialize.
    #[error(transparent)]
    Delivery(#[from] CoordinatorError),

    /// API surface failed to start.
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Platform controller error.
#[derive(Debug, Clone, Error)]
pub enum PlatformError {
    /// `start()` was called while the platform was not stopped.
    #[error("platform is already {state}")]
    AlreadyStarted {
        /// State at the time of the call.
        state: PlatformState,
    },

    /// A startup step failed; completed steps were rolled back.
    #[error("startup failed at {stage}: {source}")]
    Startup {
        /// Failing step.
        stage: StartupStage,
        /// Underlying failure.
        #[source]
        source: StartupError,
    },
}

impl PlatformError {
    /// Whether this is a rejected double start.
    #[must_use]
    pub const fn is_already_started(&self) -> bool {
        matches!(self, Self::AlreadyStarted { .. })
    }
}
