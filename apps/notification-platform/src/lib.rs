#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_possible_truncation
    )
)]

//! Notification Platform - Market Alert Pipeline
//!
//! Listens to a live market-data feed, evaluates alert rules against every
//! event and fans the resulting notifications out to all configured
//! delivery channels, tracking metrics along the way.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no runtime knowledge
//!   - `event`: Market events and duplicate suppression
//!   - `notification`: Notification records and rule candidates
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Feed monitor, rule evaluator, delivery channel, API surface
//!   - `services`: Event processor, delivery coordinator, metrics registry,
//!     platform controller
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `feed`: Hyperliquid WebSocket feed and an in-process mock
//!   - `rules`: Threshold rule evaluator
//!   - `channels`: Log and in-memory delivery channels
//!   - `config`: Environment configuration
//!   - `health`: Health and metrics HTTP endpoint
//!   - `metrics`, `telemetry`: Prometheus and OpenTelemetry setup
//!
//! # Data Flow
//!
//! ```text
//!                ┌────────────┐    ┌───────────┐    ┌───────────┐
//! Feed WS ──────►│ Dispatcher │───►│  Workers  │───►│ Evaluator │
//!                └────────────┘    └───────────┘    └─────┬─────┘
//!                                                         │
//!                              ┌──────────────────────────┘
//!                              ▼
//!                     ┌─────────────────┐     ┌──► Channel A
//!                     │    Delivery     │─────┼──► Channel B
//!                     │   Coordinator   │     └──► Channel N
//!                     └────────┬────────┘
//!                              ▼
//!                     Metrics Registry ──► /metrics, /stats
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core event and notification types.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

/// Error taxonomy.
pub mod error;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::event::{
    Asset, DuplicateWindow, EventCategory, FundingEvent, LargeOrderEvent, LiquidationEvent,
    MarketEvent, PriceAlertEvent, Side, TradeEvent,
};
pub use domain::notification::{Notification, NotificationCandidate, NotificationId, Severity};

// Ports
pub use application::ports::{
    ApiError, ApiSurface, ChannelError, DeliveryChannel, EvaluationError, FeedError, FeedMonitor,
    FeedSignal, PlatformStatus, RuleEvaluator,
};

// Services
pub use application::services::{
    DeliveryConfig, DeliveryCoordinator, DeliveryError, DeliveryReport, EventProcessor,
    MetricsRegistry, MetricsSnapshot, PipelineConfig, PlatformComponents, PlatformController,
    PlatformSignal, PlatformState,
};

// Errors
pub use error::{PipelineError, PlatformError, StartupError, StartupStage};

// Infrastructure config
pub use infrastructure::config::{ConfigError, PlatformConfig};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
