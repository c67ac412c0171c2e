//! Platform Controller
//!
//! Owns the pipeline lifecycle. Startup runs a fixed sequence of stages and
//! rolls back every completed stage, in reverse, when one fails:
//!
//! ```text
//! feed_connect → event_subscription → delivery_initialize → api_start → metrics_start
//! ```
//!
//! Once running, a dispatcher task drains feed signals into bounded event
//! queues, one per pipeline worker. Events are sharded by asset so every
//! event for one asset is handled by the same worker, in feed order. Each
//! worker runs the event through the [`EventProcessor`] and hands every
//! resulting notification to the [`DeliveryCoordinator`].

use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{DeliveryCoordinator, EventProcessor, MetricsRegistry, MetricsSnapshot};
use crate::application::ports::{
    ApiSurface, FeedMonitor, FeedSignal, PlatformStatus, RuleEvaluator,
};
use crate::domain::event::{Asset, EventCategory, MarketEvent};
use crate::error::{PipelineError, PlatformError, StartupError, StartupStage};

const SIGNAL_BUFFER: usize = 256;

// =============================================================================
// State and signals
// =============================================================================

/// Platform lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformState {
    /// Not running; `start()` is allowed.
    Stopped,
    /// Startup sequence in progress.
    Starting,
    /// Pipeline running.
    Running,
    /// Teardown in progress.
    Stopping,
}

impl PlatformState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

impl fmt::Display for PlatformState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle and runtime signal published by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformSignal {
    /// Startup completed.
    Started,
    /// Teardown completed.
    Stopped,
    /// The feed reported an error.
    FeedError(String),
    /// The feed re-established its connection.
    Reconnected,
    /// Rule evaluation failed for one event.
    ProcessingError {
        /// Category of the failed event.
        category: EventCategory,
        /// Failure description.
        reason: String,
    },
}

// =============================================================================
// Configuration
// =============================================================================

/// Pipeline sizing.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Total capacity of the queues between the dispatcher and the workers,
    /// split evenly across workers.
    pub event_queue_capacity: usize,
    /// Number of pipeline workers. Events for one asset always go to the
    /// same worker.
    pub workers: usize,
    /// Recent event fingerprints kept for redelivery checks; 0 disables.
    pub dedup_window: usize,
    /// How long `stop()` waits for pipeline tasks before aborting them.
    pub stop_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            event_queue_capacity: 10_000,
            workers: 4,
            dedup_window: super::event_processor::DEFAULT_DEDUP_WINDOW,
            stop_timeout: Duration::from_secs(5),
        }
    }
}

/// Collaborators wired into the controller.
pub struct PlatformComponents {
    /// Market data source.
    pub feed: Arc<dyn FeedMonitor>,
    /// Alert rules.
    pub evaluator: Arc<dyn RuleEvaluator>,
    /// Channel fan-out.
    pub coordinator: Arc<DeliveryCoordinator>,
    /// Counters.
    pub metrics: Arc<MetricsRegistry>,
    /// Optional external surface.
    pub api: Option<Arc<dyn ApiSurface>>,
}

// =============================================================================
// Shared state
// =============================================================================

struct Shared {
    state: Mutex<PlatformState>,
    feed: Arc<dyn FeedMonitor>,
    coordinator: Arc<DeliveryCoordinator>,
    metrics: Arc<MetricsRegistry>,
}

impl PlatformStatus for Shared {
    fn state(&self) -> PlatformState {
        *self.state.lock()
    }

    fn is_healthy(&self) -> bool {
        self.state() == PlatformState::Running
            && self.feed.is_connected()
            && self.coordinator.is_healthy()
    }

    fn feed_connected(&self) -> bool {
        self.feed.is_connected()
    }

    fn channel_health(&self) -> BTreeMap<String, bool> {
        self.coordinator.channel_health()
    }

    fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[derive(Clone)]
struct Pipeline {
    processor: Arc<EventProcessor>,
    coordinator: Arc<DeliveryCoordinator>,
    metrics: Arc<MetricsRegistry>,
}

impl Pipeline {
    async fn handle_event(&self, event: MarketEvent) -> usize {
        let category = event.category();
        let notifications = self.processor.process(&event);
        let count = notifications.len();

        for notification in notifications {
            let notification = Arc::new(notification);
            match self.coordinator.send(Arc::clone(&notification)).await {
                Ok(report) if !report.all_delivered() => {
                    tracing::debug!(
                        notification_id = %notification.id(),
                        delivered = report.delivered(),
                        failed = report.failed(),
                        "Notification partially delivered"
                    );
                }
                Ok(_) => {}
                Err(source) => {
                    tracing::error!(
                        notification_id = %notification.id(),
                        error = %source,
                        "Notification not delivered"
                    );
                    self.metrics.record_error(&PipelineError::Delivery {
                        category,
                        channel: "coordinator".to_string(),
                        source,
                    });
                }
            }
        }

        count
    }
}

struct PipelineTasks {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl PipelineTasks {
    async fn join(self, timeout: Duration) {
        self.cancel.cancel();
        let aborts: Vec<_> = self.handles.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(timeout, join_all(self.handles)).await.is_err() {
            tracing::warn!("Pipeline tasks did not stop in time, aborting");
            for abort in aborts {
                abort.abort();
            }
        }
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Lifecycle owner of the notification pipeline.
pub struct PlatformController {
    shared: Arc<Shared>,
    pipeline: Pipeline,
    api: Option<Arc<dyn ApiSurface>>,
    config: PipelineConfig,
    signals: broadcast::Sender<PlatformSignal>,
    tasks: Mutex<Option<PipelineTasks>>,
}

impl PlatformController {
    /// Wire the controller. Nothing runs until [`start`](Self::start).
    #[must_use]
    pub fn new(components: PlatformComponents, config: PipelineConfig) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_BUFFER);
        let processor = EventProcessor::new(
            components.evaluator,
            Arc::clone(&components.metrics),
            config.dedup_window,
        )
        .with_signals(signals.clone());

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PlatformState::Stopped),
                feed: components.feed,
                coordinator: Arc::clone(&components.coordinator),
                metrics: Arc::clone(&components.metrics),
            }),
            pipeline: Pipeline {
                processor: Arc::new(processor),
                coordinator: components.coordinator,
                metrics: components.metrics,
            },
            api: components.api,
            config,
            signals,
            tasks: Mutex::new(None),
        }
    }

    /// Run the startup sequence.
    ///
    /// # Errors
    ///
    /// [`PlatformError::AlreadyStarted`] when not stopped (state unchanged),
    /// or [`PlatformError::Startup`] naming the failed stage after every
    /// completed stage was rolled back.
    pub async fn start(&self) -> Result<(), PlatformError> {
        {
            let mut state = self.shared.state.lock();
            if *state != PlatformState::Stopped {
                return Err(PlatformError::AlreadyStarted { state: *state });
            }
            *state = PlatformState::Starting;
        }

        tracing::info!("Starting notification platform");
        match self.run_startup().await {
            Ok(tasks) => {
                *self.tasks.lock() = Some(tasks);
                self.set_state(PlatformState::Running);
                let _ = self.signals.send(PlatformSignal::Started);
                tracing::info!(
                    channels = ?self.shared.coordinator.channel_names(),
                    workers = self.config.workers.max(1),
                    "Notification platform running"
                );
                Ok(())
            }
            Err(e) => {
                self.set_state(PlatformState::Stopped);
                tracing::error!(error = %e, "Notification platform failed to start");
                Err(e)
            }
        }
    }

    async fn run_startup(&self) -> Result<PipelineTasks, PlatformError> {
        let mut completed = Vec::with_capacity(5);

        if let Err(e) = self.shared.feed.connect().await {
            return Err(self.abort_startup(StartupStage::FeedConnect, e.into(), &completed).await);
        }
        completed.push(StartupStage::FeedConnect);

        let feed_signals = self.shared.feed.subscribe();
        completed.push(StartupStage::EventSubscription);

        if let Err(e) = self.shared.coordinator.initialize().await {
            return Err(self
                .abort_startup(StartupStage::DeliveryInitialize, e.into(), &completed)
                .await);
        }
        completed.push(StartupStage::DeliveryInitialize);

        if let Some(api) = &self.api {
            let status: Arc<dyn PlatformStatus> = Arc::clone(&self.shared) as _;
            if let Err(e) = api.start(status).await {
                return Err(self.abort_startup(StartupStage::ApiStart, e.into(), &completed).await);
            }
            completed.push(StartupStage::ApiStart);
        }

        self.shared.metrics.start();

        Ok(self.spawn_pipeline(feed_signals))
    }

    async fn abort_startup(
        &self,
        stage: StartupStage,
        source: StartupError,
        completed: &[StartupStage],
    ) -> PlatformError {
        tracing::error!(stage = %stage, error = %source, "Startup stage failed, rolling back");
        for done in completed.iter().rev() {
            self.teardown(*done).await;
        }
        PlatformError::Startup { stage, source }
    }

    async fn teardown(&self, stage: StartupStage) {
        tracing::debug!(stage = %stage, "Tearing down");
        match stage {
            StartupStage::FeedConnect => {
                if let Err(e) = self.shared.feed.disconnect().await {
                    tracing::warn!(error = %e, "Feed disconnect failed");
                }
            }
            // The subscription receiver is owned by the dispatcher.
            StartupStage::EventSubscription => {}
            StartupStage::DeliveryInitialize => self.shared.coordinator.shutdown().await,
            StartupStage::ApiStart => {
                if let Some(api) = &self.api {
                    if let Err(e) = api.stop().await {
                        tracing::warn!(error = %e, "API surface stop failed");
                    }
                }
            }
            StartupStage::MetricsStart => self.shared.metrics.stop().await,
        }
    }

    fn spawn_pipeline(&self, feed_signals: broadcast::Receiver<FeedSignal>) -> PipelineTasks {
        let cancel = CancellationToken::new();
        let workers = self.config.workers.max(1);
        let shard_capacity = self.config.event_queue_capacity.div_ceil(workers).max(1);

        let mut shards = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers + 1);
        for worker_id in 0..workers {
            let (events, queue) = mpsc::channel(shard_capacity);
            shards.push(events);
            handles.push(tokio::spawn(run_pipeline_worker(
                self.pipeline.clone(),
                queue,
                cancel.clone(),
                worker_id,
            )));
        }
        handles.push(tokio::spawn(run_dispatcher(
            feed_signals,
            shards,
            Arc::clone(&self.shared.metrics),
            self.signals.clone(),
            cancel.clone(),
        )));

        PipelineTasks { cancel, handles }
    }

    /// Tear everything down. A no-op unless running.
    ///
    /// In-flight deliveries are cancelled. Teardown failures are logged,
    /// never returned.
    pub async fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            if *state != PlatformState::Running {
                tracing::debug!(state = %*state, "Stop ignored");
                return;
            }
            *state = PlatformState::Stopping;
        }

        tracing::info!("Stopping notification platform");
        let tasks = self.tasks.lock().take();
        if let Some(tasks) = &tasks {
            tasks.cancel.cancel();
        }

        self.teardown(StartupStage::FeedConnect).await;
        if let Some(tasks) = tasks {
            tasks.join(self.config.stop_timeout).await;
        }
        self.teardown(StartupStage::DeliveryInitialize).await;
        self.teardown(StartupStage::ApiStart).await;
        self.teardown(StartupStage::MetricsStart).await;

        self.set_state(PlatformState::Stopped);
        let _ = self.signals.send(PlatformSignal::Stopped);
        tracing::info!("Notification platform stopped");
    }

    /// Run one event through the pipeline and return the number of
    /// notifications produced.
    pub async fn handle_event(&self, event: MarketEvent) -> usize {
        self.pipeline.handle_event(event).await
    }

    /// Running, feed connected and every channel healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.shared.is_healthy()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PlatformState {
        self.shared.state()
    }

    /// Current metrics.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Receive lifecycle and runtime signals.
    #[must_use]
    pub fn subscribe_signals(&self) -> broadcast::Receiver<PlatformSignal> {
        self.signals.subscribe()
    }

    /// Read-only status view, as handed to the API surface.
    #[must_use]
    pub fn status(&self) -> Arc<dyn PlatformStatus> {
        Arc::clone(&self.shared) as _
    }

    fn set_state(&self, state: PlatformState) {
        *self.shared.state.lock() = state;
    }
}

impl fmt::Debug for PlatformController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformController")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tasks
// =============================================================================

/// Worker index for an asset. Stable for the lifetime of the pipeline.
fn shard_for(asset: &Asset, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    asset.hash(&mut hasher);
    let shards = u64::try_from(shards.max(1)).unwrap_or(u64::MAX);
    usize::try_from(hasher.finish() % shards).unwrap_or_default()
}

async fn run_dispatcher(
    mut feed_signals: broadcast::Receiver<FeedSignal>,
    shards: Vec<mpsc::Sender<MarketEvent>>,
    metrics: Arc<MetricsRegistry>,
    signals: broadcast::Sender<PlatformSignal>,
    cancel: CancellationToken,
) {
    loop {
        let signal = tokio::select! {
            () = cancel.cancelled() => break,
            signal = feed_signals.recv() => signal,
        };

        match signal {
            Ok(FeedSignal::Event(event)) => {
                match shards[shard_for(event.asset(), shards.len())].try_send(event) {
                    Ok(()) => {}
                    Err(TrySendError::Full(event)) => {
                        tracing::warn!(
                            category = %event.category(),
                            asset = %event.asset(),
                            "Event queue full, dropping event"
                        );
                        metrics.record_error(&PipelineError::Dispatch {
                            dropped: 1,
                            reason: "event queue full".to_string(),
                        });
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
            }
            Ok(FeedSignal::Error(reason)) => {
                tracing::error!(error = %reason, "Feed error");
                metrics.record_error(&PipelineError::Connection(reason.clone()));
                let _ = signals.send(PlatformSignal::FeedError(reason));
            }
            Ok(FeedSignal::Reconnected) => {
                tracing::info!("Feed reconnected");
                let _ = signals.send(PlatformSignal::Reconnected);
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Dispatcher lagged behind feed");
                metrics.record_error(&PipelineError::Dispatch {
                    dropped: skipped,
                    reason: "feed signal stream lagged".to_string(),
                });
            }
            Err(RecvError::Closed) => {
                tracing::warn!("Feed signal stream closed");
                break;
            }
        }
    }

    tracing::debug!("Dispatcher stopped");
}

async fn run_pipeline_worker(
    pipeline: Pipeline,
    mut queue: mpsc::Receiver<MarketEvent>,
    cancel: CancellationToken,
    worker_id: usize,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => None,
            event = queue.recv() => event,
        };
        let Some(event) = event else {
            break;
        };

        tokio::select! {
            () = cancel.cancelled() => break,
            _ = pipeline.handle_event(event) => {}
        }
    }

    tracing::debug!(worker_id, "Pipeline worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_names() {
        assert_eq!(PlatformState::Stopped.to_string(), "stopped");
        assert_eq!(PlatformState::Stopping.to_string(), "stopping");
        assert_eq!(
            serde_json::to_string(&PlatformState::Running).unwrap(),
            "\"running\""
        );
    }

    #[test]
    fn default_pipeline_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.event_queue_capacity, 10_000);
        assert_eq!(config.workers, 4);
        assert_eq!(config.dedup_window, 4096);
    }

    #[test]
    fn shard_is_stable_per_asset() {
        let btc = Asset::new("BTC");
        let first = shard_for(&btc, 4);
        assert!(first < 4);
        for _ in 0..16 {
            assert_eq!(shard_for(&btc, 4), first);
        }
        assert_eq!(shard_for(&btc, 1), 0);
        assert_eq!(shard_for(&btc, 0), 0);
    }
}
