//! Metrics Registry
//!
//! Process-wide pipeline counters. Every counter is an atomic so increments
//! from concurrent pipeline and channel workers never block each other, and
//! [`MetricsRegistry::snapshot`] returns an immutable copy that can be read
//! while increments continue. Counters only ever grow.
//!
//! Each increment is mirrored to the `metrics` facade, so the same numbers
//! appear on the Prometheus endpoint when an exporter is installed.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain::event::EventCategory;
use crate::domain::notification::Notification;
use crate::error::PipelineError;

/// Default interval of the periodic snapshot export.
pub const DEFAULT_EXPORT_INTERVAL: Duration = Duration::from_secs(60);

// =============================================================================
// Snapshot
// =============================================================================

/// Immutable copy of the registry counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Successful (notification, channel) deliveries.
    pub sent: u64,
    /// Failed (notification, channel) deliveries.
    pub failed: u64,
    /// All recorded errors: delivery, evaluation, connection and dispatch.
    pub errors: u64,
    /// Rule evaluation failures.
    pub evaluation_errors: u64,
    /// Feed connection errors.
    pub connection_errors: u64,
    /// Events received from the feed.
    pub events_received: u64,
    /// Events dropped before processing.
    pub events_dropped: u64,
    /// Events skipped as redeliveries.
    pub duplicates_suppressed: u64,
    /// Successful deliveries per event category.
    pub sent_by_category: BTreeMap<String, u64>,
    /// Failed deliveries per event category.
    pub failed_by_category: BTreeMap<String, u64>,
    /// Successful deliveries per channel.
    pub sent_by_channel: BTreeMap<String, u64>,
    /// Failed deliveries per channel.
    pub failed_by_channel: BTreeMap<String, u64>,
    /// Seconds since the registry was created.
    pub uptime_secs: u64,
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
}

// =============================================================================
// Labeled Counters
// =============================================================================

#[derive(Debug, Default)]
struct LabeledCounters {
    counters: RwLock<HashMap<String, Arc<AtomicU64>>>,
}

impl LabeledCounters {
    fn increment(&self, label: &str) {
        if let Some(counter) = self.counters.read().get(label) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.counters
            .write()
            .entry(label.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counters
            .read()
            .iter()
            .map(|(label, counter)| (label.clone(), counter.load(Ordering::Relaxed)))
            .collect()
    }
}

// =============================================================================
// Registry
// =============================================================================

struct Exporter {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Pipeline metrics registry.
pub struct MetricsRegistry {
    started_at: Instant,
    export_interval: Duration,
    sent: AtomicU64,
    failed: AtomicU64,
    evaluation_errors: AtomicU64,
    connection_errors: AtomicU64,
    events_received: AtomicU64,
    events_dropped: AtomicU64,
    duplicates_suppressed: AtomicU64,
    sent_by_category: LabeledCounters,
    failed_by_category: LabeledCounters,
    sent_by_channel: LabeledCounters,
    failed_by_channel: LabeledCounters,
    exporter: Mutex<Option<Exporter>>,
}

impl MetricsRegistry {
    /// Create a registry exporting every `export_interval` once started.
    #[must_use]
    pub fn new(export_interval: Duration) -> Self {
        Self {
            started_at: Instant::now(),
            export_interval,
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            evaluation_errors: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
            events_received: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            duplicates_suppressed: AtomicU64::new(0),
            sent_by_category: LabeledCounters::default(),
            failed_by_category: LabeledCounters::default(),
            sent_by_channel: LabeledCounters::default(),
            failed_by_channel: LabeledCounters::default(),
            exporter: Mutex::new(None),
        }
    }

    /// Record one successful delivery of `notification` via `channel`.
    pub fn record_notification(&self, notification: &Notification, channel: &str) {
        let category = notification.category().as_str();
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.sent_by_category.increment(category);
        self.sent_by_channel.increment(channel);

        counter!(
            "notification_platform_notifications_sent_total",
            "category" => category,
            "channel" => channel.to_string()
        )
        .increment(1);
    }

    /// Record a pipeline failure.
    pub fn record_error(&self, error: &PipelineError) {
        match error {
            PipelineError::Connection(_) => {
                self.connection_errors.fetch_add(1, Ordering::Relaxed);
                counter!("notification_platform_feed_errors_total").increment(1);
            }
            PipelineError::Evaluation { category, .. } => {
                self.evaluation_errors.fetch_add(1, Ordering::Relaxed);
                counter!(
                    "notification_platform_evaluation_errors_total",
                    "category" => category.as_str()
                )
                .increment(1);
            }
            PipelineError::Delivery {
                category,
                channel,
                source,
            } => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.failed_by_category.increment(category.as_str());
                self.failed_by_channel.increment(channel);
                counter!(
                    "notification_platform_notifications_failed_total",
                    "category" => category.as_str(),
                    "channel" => channel.clone(),
                    "reason" => source.kind()
                )
                .increment(1);
            }
            PipelineError::Dispatch { dropped, .. } => {
                self.events_dropped.fetch_add(*dropped, Ordering::Relaxed);
                counter!("notification_platform_events_dropped_total").increment(*dropped);
            }
        }
    }

    /// Record an event received from the feed.
    pub fn record_event_received(&self, category: EventCategory) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
        counter!(
            "notification_platform_events_received_total",
            "category" => category.as_str()
        )
        .increment(1);
    }

    /// Record an event skipped as a redelivery.
    pub fn record_duplicate(&self, category: EventCategory) {
        self.duplicates_suppressed.fetch_add(1, Ordering::Relaxed);
        counter!(
            "notification_platform_duplicate_events_total",
            "category" => category.as_str()
        )
        .increment(1);
    }

    /// Take an immutable copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let failed = self.failed.load(Ordering::Relaxed);
        let evaluation_errors = self.evaluation_errors.load(Ordering::Relaxed);
        let connection_errors = self.connection_errors.load(Ordering::Relaxed);
        let events_dropped = self.events_dropped.load(Ordering::Relaxed);

        MetricsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            failed,
            errors: failed + evaluation_errors + connection_errors + events_dropped,
            evaluation_errors,
            connection_errors,
            events_received: self.events_received.load(Ordering::Relaxed),
            events_dropped,
            duplicates_suppressed: self.duplicates_suppressed.load(Ordering::Relaxed),
            sent_by_category: self.sent_by_category.snapshot(),
            failed_by_category: self.failed_by_category.snapshot(),
            sent_by_channel: self.sent_by_channel.snapshot(),
            failed_by_channel: self.failed_by_channel.snapshot(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            taken_at: Utc::now(),
        }
    }

    /// Start the periodic export task. No-op if already started.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self: &Arc<Self>) {
        let mut exporter = self.exporter.lock();
        if exporter.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let registry = Arc::clone(self);
        let token = cancel.clone();
        let period = self.export_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => registry.export(),
                }
            }
        });

        *exporter = Some(Exporter { cancel, handle });
        tracing::debug!(interval_secs = period.as_secs(), "Metrics export started");
    }

    /// Stop the periodic export task. No-op if not started.
    pub async fn stop(&self) {
        let exporter = self.exporter.lock().take();
        if let Some(exporter) = exporter {
            exporter.cancel.cancel();
            if let Err(e) = exporter.handle.await {
                tracing::warn!(error = %e, "Metrics export task ended abnormally");
            }
            self.export();
            tracing::debug!("Metrics export stopped");
        }
    }

    /// Whether the export task is running.
    #[must_use]
    pub fn is_exporting(&self) -> bool {
        self.exporter.lock().is_some()
    }

    #[allow(clippy::cast_precision_loss)]
    fn export(&self) {
        let snapshot = self.snapshot();
        gauge!("notification_platform_uptime_seconds").set(snapshot.uptime_secs as f64);
        tracing::info!(
            sent = snapshot.sent,
            failed = snapshot.failed,
            errors = snapshot.errors,
            events_received = snapshot.events_received,
            events_dropped = snapshot.events_dropped,
            duplicates = snapshot.duplicates_suppressed,
            "Pipeline metrics"
        );
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_EXPORT_INTERVAL)
    }
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("sent", &self.sent.load(Ordering::Relaxed))
            .field("failed", &self.failed.load(Ordering::Relaxed))
            .field("exporting", &self.is_exporting())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================
