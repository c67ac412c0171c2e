//! Domain Layer - Core event and notification types.
//!
//! This layer contains the core domain types of the alerting pipeline with
//! no knowledge of transports, runtimes or delivery channels.

/// Market event types (trades, liquidations, funding, ...).
pub mod event;

/// Notification records and rule-match candidates.
pub mod notification;
