//! Port Interfaces
//!
//! Contracts for the collaborators the pipeline depends on or exposes,
//! following the Hexagonal Architecture pattern. Infrastructure adapters
//! implement these traits.
//!
//! ## Driven Ports (Outbound)
//!
//! - `RuleEvaluator`: matches a market event against alert rules
//! - `DeliveryChannel`: sends a notification to one destination
//!
//! ## Driver Ports (Inbound)
//!
//! - `FeedMonitor`: emits market events and connection signals
//! - `ApiSurface`: exposes health and metrics externally

mod api_surface_port;
mod delivery_channel_port;
mod feed_monitor_port;
mod rule_evaluator_port;

pub use api_surface_port::{ApiError, ApiSurface, PlatformStatus};
pub use delivery_channel_port::{ChannelError, DeliveryChannel};
pub use feed_monitor_port::{FeedError, FeedMonitor, FeedSignal};
#[cfg(test)]
pub use rule_evaluator_port::MockRuleEvaluator;
pub use rule_evaluator_port::{EvaluationError, RuleEvaluator};
