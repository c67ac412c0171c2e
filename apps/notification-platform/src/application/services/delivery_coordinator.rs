//! Delivery Coordinator
//!
//! Fans a notification out to every configured delivery channel. Each
//! channel owns a bounded job queue drained by a fixed pool of workers, so a
//! slow or stuck channel fills its own queue and fails fast instead of
//! holding up the other channels or feed ingestion.
//!
//! # Guarantees
//!
//! - exactly one attempt per channel per `send` call, no retry;
//! - a failure on one channel never prevents attempts on the others;
//! - no delivery failure propagates past `send`: every failure becomes a
//!   [`DeliveryOutcome`] and is recorded by the metrics registry.
//!
//! ```text
//!                 ┌─ queue ─► worker × N ─► channel A
//! send(n) ─ fan ──┼─ queue ─► worker × N ─► channel B
//!                 └─ queue ─► worker × N ─► channel C
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::MetricsRegistry;
use crate::application::ports::{ChannelError, DeliveryChannel};
use crate::domain::event::EventCategory;
use crate::domain::notification::{Notification, NotificationId};
use crate::error::PipelineError;

// =============================================================================
// Configuration
// =============================================================================

/// Delivery coordinator configuration.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Capacity of each channel's job queue.
    pub channel_queue_capacity: usize,
    /// Workers draining each channel's queue.
    pub workers_per_channel: usize,
    /// Upper bound of a single `DeliveryChannel::send` call.
    pub attempt_timeout: Duration,
    /// Upper bound `send` waits for a channel's reply, queueing included.
    pub reply_timeout: Duration,
    /// How long `shutdown` waits for workers before aborting them.
    pub shutdown_timeout: Duration,
    /// Interval of the background channel health probe.
    pub health_probe_interval: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            channel_queue_capacity: 1024,
            workers_per_channel: 2,
            attempt_timeout: Duration::from_secs(10),
            reply_timeout: Duration::from_secs(15),
            shutdown_timeout: Duration::from_secs(5),
            health_probe_interval: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Failure of one (notification, channel) delivery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The channel returned an error.
    #[error("channel {channel} failed: {reason}")]
    Failed {
        /// Channel name.
        channel: String,
        /// Failure description.
        reason: String,
    },

    /// The attempt or the wait for it exceeded its bound.
    #[error("channel {channel} timed out after {timeout:?}")]
    TimedOut {
        /// Channel name.
        channel: String,
        /// Bound that was exceeded.
        timeout: Duration,
    },

    /// The channel's queue was full.
    #[error("channel {channel} queue is full")]
    QueueFull {
        /// Channel name.
        channel: String,
    },

    /// The attempt was cancelled by shutdown.
    #[error("delivery via {channel} cancelled")]
    Cancelled {
        /// Channel name.
        channel: String,
    },

    /// No worker is left to serve the channel.
    #[error("channel {channel} has no running workers")]
    WorkerUnavailable {
        /// Channel name.
        channel: String,
    },

    /// `send` was called before `initialize` or after `shutdown`.
    #[error("delivery coordinator is not initialized")]
    NotInitialized,
}

impl DeliveryError {
    /// Short label used as the metrics `reason`.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Failed { .. } => "failed",
            Self::TimedOut { .. } => "timeout",
            Self::QueueFull { .. } => "queue_full",
            Self::Cancelled { .. } => "cancelled",
            Self::WorkerUnavailable { .. } => "worker_unavailable",
            Self::NotInitialized => "not_initialized",
        }
    }
}

/// Coordinator lifecycle error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoordinatorError {
    /// A channel failed to initialize; already initialized channels were shut down.
    #[error("channel {channel} failed to initialize: {source}")]
    ChannelInit {
        /// Channel name.
        channel: String,
        /// Underlying failure.
        #[source]
        source: ChannelError,
    },
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of delivering one notification to one channel.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    /// Delivered notification.
    pub notification_id: NotificationId,
    /// Notification category.
    pub category: EventCategory,
    /// Channel name.
    pub channel: String,
    /// Time from enqueue to reply.
    pub elapsed: Duration,
    /// Success, or the failure reason.
    pub result: Result<(), DeliveryError>,
}

impl DeliveryOutcome {
    /// Whether the channel accepted the notification.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// All outcomes of one `send` call, in channel configuration order.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    /// Delivered notification.
    pub notification_id: NotificationId,
    /// One outcome per configured channel.
    pub outcomes: Vec<DeliveryOutcome>,
}

impl DeliveryReport {
    /// Number of channels that accepted the notification.
    #[must_use]
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    /// Number of channels that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.delivered()
    }

    /// Whether every channel accepted the notification.
    #[must_use]
    pub fn all_delivered(&self) -> bool {
        self.outcomes.iter().all(DeliveryOutcome::is_success)
    }
}

// =============================================================================
// Internals
// =============================================================================

struct ChannelSlot {
    name: String,
    channel: Arc<dyn DeliveryChannel>,
    healthy: AtomicBool,
}

struct DeliveryJob {
    notification: Arc<Notification>,
    reply: oneshot::Sender<Result<(), DeliveryError>>,
}

type SharedJobQueue = Arc<tokio::sync::Mutex<mpsc::Receiver<DeliveryJob>>>;

struct WorkerRuntime {
    queues: Vec<mpsc::Sender<DeliveryJob>>,
    tasks: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

// =============================================================================
// Coordinator
// =============================================================================

/// Multi-channel delivery coordinator.
pub struct DeliveryCoordinator {
    slots: Vec<Arc<ChannelSlot>>,
    config: DeliveryConfig,
    metrics: Arc<MetricsRegistry>,
    runtime: parking_lot::Mutex<Option<WorkerRuntime>>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl DeliveryCoordinator {
    /// Create a coordinator over `channels`, in delivery order.
    #[must_use]
    pub fn new(
        channels: Vec<Arc<dyn DeliveryChannel>>,
        config: DeliveryConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let slots = channels
            .into_iter()
            .map(|channel| {
                Arc::new(ChannelSlot {
                    name: channel.name().to_string(),
                    channel,
                    healthy: AtomicBool::new(false),
                })
            })
            .collect();

        Self {
            slots,
            config,
            metrics,
            runtime: parking_lot::Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Initialize every channel and start the channel workers.
    ///
    /// Fails fast on the first channel that cannot initialize, shutting down
    /// the channels already brought up. Calling it again once initialized is
    /// a no-op.
    pub async fn initialize(&self) -> Result<(), CoordinatorError> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.is_initialized() {
            return Ok(());
        }

        for (index, slot) in self.slots.iter().enumerate() {
            if let Err(source) = slot.channel.initialize().await {
                tracing::error!(channel = %slot.name, error = %source, "Delivery channel failed to initialize");
                for ready in self.slots[..index].iter().rev() {
                    if let Err(e) = ready.channel.shutdown().await {
                        tracing::warn!(channel = %ready.name, error = %e, "Channel shutdown failed during rollback");
                    }
                }
                return Err(CoordinatorError::ChannelInit {
                    channel: slot.name.clone(),
                    source,
                });
            }
            let healthy =
                tokio::time::timeout(self.config.attempt_timeout, slot.channel.is_healthy())
                    .await
                    .unwrap_or(false);
            slot.healthy.store(healthy, Ordering::Release);
            tracing::info!(channel = %slot.name, healthy, "Delivery channel initialized");
        }

        let cancel = CancellationToken::new();
        let mut queues = Vec::with_capacity(self.slots.len());
        let mut tasks = Vec::new();

        for slot in &self.slots {
            let (tx, rx) = mpsc::channel(self.config.channel_queue_capacity.max(1));
            let rx: SharedJobQueue = Arc::new(tokio::sync::Mutex::new(rx));
            for worker_id in 0..self.config.workers_per_channel.max(1) {
                tasks.push(tokio::spawn(run_channel_worker(
                    Arc::clone(slot),
                    Arc::clone(&rx),
                    cancel.clone(),
                    self.config.attempt_timeout,
                    worker_id,
                )));
            }
            queues.push(tx);
        }

        tasks.push(tokio::spawn(run_health_probe(
            self.slots.clone(),
            cancel.clone(),
            self.config.health_probe_interval,
            self.config.attempt_timeout,
        )));

        *self.runtime.lock() = Some(WorkerRuntime {
            queues,
            tasks,
            cancel,
        });

        tracing::info!(
            channels = self.slots.len(),
            workers_per_channel = self.config.workers_per_channel.max(1),
            "Delivery coordinator initialized"
        );
        Ok(())
    }

    /// Stop the workers and shut every channel down.
    ///
    /// In-flight attempts are cancelled. Calling it when not initialized or
    /// already shut down is a no-op.
    pub async fn shutdown(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let Some(runtime) = self.runtime.lock().take() else {
            return;
        };

        runtime.cancel.cancel();
        drop(runtime.queues);

        let aborts: Vec<_> = runtime.tasks.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(self.config.shutdown_timeout, join_all(runtime.tasks))
            .await
            .is_err()
        {
            tracing::warn!(
                timeout_secs = self.config.shutdown_timeout.as_secs(),
                "Delivery workers did not stop in time, aborting"
            );
            for abort in aborts {
                abort.abort();
            }
        }

        for slot in self.slots.iter().rev() {
            if let Err(e) = slot.channel.shutdown().await {
                tracing::warn!(channel = %slot.name, error = %e, "Delivery channel shutdown failed");
            }
            slot.healthy.store(false, Ordering::Release);
        }

        tracing::info!("Delivery coordinator shut down");
    }

    /// Deliver `notification` to every channel.
    ///
    /// Returns `Err` only when the coordinator is not initialized; channel
    /// failures are reported in the [`DeliveryReport`].
    pub async fn send(
        &self,
        notification: Arc<Notification>,
    ) -> Result<DeliveryReport, DeliveryError> {
        let queues = self
            .runtime
            .lock()
            .as_ref()
            .map(|runtime| runtime.queues.clone())
            .ok_or(DeliveryError::NotInitialized)?;

        let attempts = self
            .slots
            .iter()
            .zip(queues.iter())
            .map(|(slot, queue)| self.attempt(slot, queue, Arc::clone(&notification)));
        let outcomes = join_all(attempts).await;

        for (slot, outcome) in self.slots.iter().zip(&outcomes) {
            slot.healthy.store(outcome.is_success(), Ordering::Release);
            match &outcome.result {
                Ok(()) => {
                    tracing::debug!(
                        notification_id = %outcome.notification_id,
                        channel = %outcome.channel,
                        elapsed_ms = outcome.elapsed.as_millis(),
                        "Notification delivered"
                    );
                    self.metrics
                        .record_notification(&notification, &outcome.channel);
                }
                Err(source) => {
                    tracing::warn!(
                        notification_id = %outcome.notification_id,
                        channel = %outcome.channel,
                        error = %source,
                        "Notification delivery failed"
                    );
                    self.metrics.record_error(&PipelineError::Delivery {
                        category: outcome.category,
                        channel: outcome.channel.clone(),
                        source: source.clone(),
                    });
                }
            }
        }

        Ok(DeliveryReport {
            notification_id: notification.id(),
            outcomes,
        })
    }

    async fn attempt(
        &self,
        slot: &ChannelSlot,
        queue: &mpsc::Sender<DeliveryJob>,
        notification: Arc<Notification>,
    ) -> DeliveryOutcome {
        let started = Instant::now();
        let notification_id = notification.id();
        let category = notification.category();
        let (reply, response) = oneshot::channel();

        let result = match queue.try_send(DeliveryJob {
            notification,
            reply,
        }) {
            Ok(()) => match tokio::time::timeout(self.config.reply_timeout, response).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(DeliveryError::WorkerUnavailable {
                    channel: slot.name.clone(),
                }),
                Err(_) => Err(DeliveryError::TimedOut {
                    channel: slot.name.clone(),
                    timeout: self.config.reply_timeout,
                }),
            },
            Err(TrySendError::Full(_)) => Err(DeliveryError::QueueFull {
                channel: slot.name.clone(),
            }),
            Err(TrySendError::Closed(_)) => Err(DeliveryError::WorkerUnavailable {
                channel: slot.name.clone(),
            }),
        };

        DeliveryOutcome {
            notification_id,
            category,
            channel: slot.name.clone(),
            elapsed: started.elapsed(),
            result,
        }
    }

    /// Refresh every channel's health flag from its own probe.
    pub async fn probe_health(&self) {
        probe_slots(&self.slots, self.config.attempt_timeout).await;
    }

    /// Whether `initialize` has completed and `shutdown` has not run since.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.runtime.lock().is_some()
    }

    /// Initialized and every channel currently healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.is_initialized()
            && self
                .slots
                .iter()
                .all(|slot| slot.healthy.load(Ordering::Acquire))
    }

    /// Health flag per channel.
    #[must_use]
    pub fn channel_health(&self) -> BTreeMap<String, bool> {
        self.slots
            .iter()
            .map(|slot| (slot.name.clone(), slot.healthy.load(Ordering::Acquire)))
            .collect()
    }

    /// Configured channel names, in delivery order.
    #[must_use]
    pub fn channel_names(&self) -> Vec<String> {
        self.slots.iter().map(|slot| slot.name.clone()).collect()
    }
}

impl std::fmt::Debug for DeliveryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryCoordinator")
            .field("channels", &self.channel_names())
            .field("initialized", &self.is_initialized())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Workers
// =============================================================================

async fn run_channel_worker(
    slot: Arc<ChannelSlot>,
    jobs: SharedJobQueue,
    cancel: CancellationToken,
    attempt_timeout: Duration,
    worker_id: usize,
) {
    loop {
        let job = {
            let mut jobs = jobs.lock().await;
            tokio::select! {
                () = cancel.cancelled() => None,
                job = jobs.recv() => job,
            }
        };
        let Some(mut job) = job else {
            break;
        };

        // The requester already gave up on this job.
        if job.reply.is_closed() {
            continue;
        }

        let result = tokio::select! {
            () = cancel.cancelled() => Err(DeliveryError::Cancelled {
                channel: slot.name.clone(),
            }),
            // The requester timed out mid-attempt; its outcome is already recorded.
            () = job.reply.closed() => {
                tracing::debug!(
                    channel = %slot.name,
                    notification_id = %job.notification.id(),
                    "Delivery abandoned after reply timeout"
                );
                continue;
            }
            attempt = tokio::time::timeout(attempt_timeout, slot.channel.send(&job.notification)) => {
                match attempt {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(DeliveryError::Failed {
                        channel: slot.name.clone(),
                        reason: e.to_string(),
                    }),
                    Err(_) => Err(DeliveryError::TimedOut {
                        channel: slot.name.clone(),
                        timeout: attempt_timeout,
                    }),
                }
            }
        };

        let _ = job.reply.send(result);
    }

    tracing::debug!(channel = %slot.name, worker_id, "Delivery worker stopped");
}

async fn run_health_probe(
    slots: Vec<Arc<ChannelSlot>>,
    cancel: CancellationToken,
    period: Duration,
    probe_timeout: Duration,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => probe_slots(&slots, probe_timeout).await,
        }
    }
}

async fn probe_slots(slots: &[Arc<ChannelSlot>], probe_timeout: Duration) {
    for slot in slots {
        let healthy = tokio::time::timeout(probe_timeout, slot.channel.is_healthy())
            .await
            .unwrap_or(false);
        let previous = slot.healthy.swap(healthy, Ordering::AcqRel);
        if previous != healthy {
            if healthy {
                tracing::info!(channel = %slot.name, "Delivery channel recovered");
            } else {
                tracing::warn!(channel = %slot.name, "Delivery channel unhealthy");
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
