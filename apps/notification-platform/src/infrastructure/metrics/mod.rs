//! Prometheus Metrics Module
//!
//! Installs the Prometheus recorder behind the `metrics` facade used by the
//! metrics registry, and describes every metric it emits.
//!
//! # Metrics
//!
//! - **Deliveries**: notifications sent and failed, by category and channel
//! - **Pipeline**: events received, dropped and suppressed as duplicates
//! - **Errors**: evaluation and feed errors
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Later calls return the same handle.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let handle = PROMETHEUS_HANDLE.get_or_init(|| handle).clone();
    register_metrics();
    Ok(handle)
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

fn register_metrics() {
    describe_counter!(
        "notification_platform_notifications_sent_total",
        "Notifications accepted by a delivery channel"
    );
    describe_counter!(
        "notification_platform_notifications_failed_total",
        "Notification deliveries that failed, by reason"
    );
    describe_counter!(
        "notification_platform_evaluation_errors_total",
        "Events whose rule evaluation failed"
    );
    describe_counter!(
        "notification_platform_feed_errors_total",
        "Feed connection errors"
    );
    describe_counter!(
        "notification_platform_events_received_total",
        "Market events that reached the event processor"
    );
    describe_counter!(
        "notification_platform_events_dropped_total",
        "Market events dropped before processing"
    );
    describe_counter!(
        "notification_platform_duplicate_events_total",
        "Redelivered market events skipped"
    );
    describe_gauge!(
        "notification_platform_uptime_seconds",
        "Seconds since the metrics registry was created"
    );
}
