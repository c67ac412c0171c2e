//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Delivery channel adapters.
pub mod channels;

/// Configuration loading.
pub mod config;

/// Market feed adapters (Hyperliquid WebSocket, in-process mock).
pub mod feed;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Threshold rule evaluator.
pub mod rules;

/// OpenTelemetry tracing integration.
pub mod telemetry;
