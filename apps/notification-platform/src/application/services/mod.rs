//! Application Services
//!
//! The pipeline itself: event processing, delivery fan-out, metrics and the
//! controller that owns their lifecycle.

mod delivery_coordinator;
mod event_processor;
mod metrics_registry;
mod platform;

pub use delivery_coordinator::{
    CoordinatorError, DeliveryConfig, DeliveryCoordinator, DeliveryError, DeliveryOutcome,
    DeliveryReport,
};
pub use event_processor::{DEFAULT_DEDUP_WINDOW, EventProcessor};
pub use metrics_registry::{DEFAULT_EXPORT_INTERVAL, MetricsRegistry, MetricsSnapshot};
pub use platform::{
    PipelineConfig, PlatformComponents, PlatformController, PlatformSignal, PlatformState,
};
