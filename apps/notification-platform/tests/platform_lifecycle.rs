//! Platform Lifecycle Integration Tests
//!
//! Startup ordering and rollback, double start, stop semantics and health
//! reporting of the platform controller wired with in-process adapters.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::time::timeout;

use notification_platform::application::ports::{
    ApiError, ApiSurface, DeliveryChannel, FeedMonitor, PlatformStatus,
};
use notification_platform::application::services::{
    DeliveryConfig, DeliveryCoordinator, MetricsRegistry, PipelineConfig, PlatformComponents,
    PlatformController, PlatformSignal, PlatformState,
};
use notification_platform::infrastructure::channels::MemoryChannel;
use notification_platform::infrastructure::feed::MockFeedMonitor;
use notification_platform::infrastructure::rules::ThresholdRuleEvaluator;
use notification_platform::{Asset, PlatformError, PriceAlertEvent, StartupStage};

/// API surface that records calls and optionally refuses to start.
#[derive(Default)]
struct RecordingApi {
    fail_start: bool,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

#[async_trait]
impl ApiSurface for RecordingApi {
    async fn start(&self, _status: Arc<dyn PlatformStatus>) -> Result<(), ApiError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(ApiError::BindFailed(8083, "address in use".to_string()));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), ApiError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    controller: PlatformController,
    feed: Arc<MockFeedMonitor>,
    channels: Vec<Arc<MemoryChannel>>,
    api: Arc<RecordingApi>,
}

fn harness(feed: MockFeedMonitor, channels: Vec<MemoryChannel>, api: RecordingApi) -> Harness {
    harness_with(feed, channels, api, DeliveryConfig::default())
}

fn harness_with(
    feed: MockFeedMonitor,
    channels: Vec<MemoryChannel>,
    api: RecordingApi,
    delivery: DeliveryConfig,
) -> Harness {
    let feed = Arc::new(feed);
    let channels: Vec<Arc<MemoryChannel>> = channels.into_iter().map(Arc::new).collect();
    let api = Arc::new(api);
    let metrics = Arc::new(MetricsRegistry::default());
    let coordinator = Arc::new(DeliveryCoordinator::new(
        channels
            .iter()
            .map(|c| Arc::clone(c) as Arc<dyn DeliveryChannel>)
            .collect(),
        delivery,
        Arc::clone(&metrics),
    ));

    let controller = PlatformController::new(
        PlatformComponents {
            feed: Arc::clone(&feed) as _,
            evaluator: Arc::new(ThresholdRuleEvaluator::default()),
            coordinator,
            metrics,
            api: Some(Arc::clone(&api) as _),
        },
        PipelineConfig::default(),
    );

    Harness {
        controller,
        feed,
        channels,
        api,
    }
}

fn price_alert(price: i64) -> PriceAlertEvent {
    PriceAlertEvent {
        timestamp: Utc::now(),
        asset: Asset::new("BTC"),
        price: Decimal::from(price),
        reference_price: None,
    }
}

fn startup_stage(err: &PlatformError) -> StartupStage {
    match err {
        PlatformError::Startup { stage, .. } => *stage,
        other => panic!("expected startup failure, got {other}"),
    }
}

async fn wait_until(condition: impl Fn() -> bool) {
    timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn start_brings_every_component_up() {
    let h = harness(
        MockFeedMonitor::new(),
        vec![MemoryChannel::new("a"), MemoryChannel::new("b")],
        RecordingApi::default(),
    );

    h.controller.start().await.unwrap();

    assert_eq!(h.controller.state(), PlatformState::Running);
    assert!(h.controller.is_healthy());
    assert_eq!(h.feed.connect_count(), 1);
    assert!(h.channels.iter().all(|c| c.initialize_count() == 1));
    assert_eq!(h.api.starts.load(Ordering::SeqCst), 1);

    h.controller.stop().await;
}

#[tokio::test]
async fn double_start_is_rejected_without_state_change() {
    let h = harness(
        MockFeedMonitor::new(),
        vec![MemoryChannel::new("a")],
        RecordingApi::default(),
    );
    h.controller.start().await.unwrap();

    let err = h.controller.start().await.unwrap_err();

    assert!(err.is_already_started());
    assert_eq!(h.controller.state(), PlatformState::Running);
    assert_eq!(h.feed.connect_count(), 1);
    assert_eq!(h.channels[0].initialize_count(), 1);

    h.controller.stop().await;
}

#[tokio::test]
async fn stop_before_start_is_noop() {
    let h = harness(
        MockFeedMonitor::new(),
        vec![MemoryChannel::new("a")],
        RecordingApi::default(),
    );

    h.controller.stop().await;

    assert_eq!(h.controller.state(), PlatformState::Stopped);
    assert_eq!(h.feed.disconnect_count(), 0);
    assert_eq!(h.channels[0].shutdown_count(), 0);
    assert_eq!(h.api.stops.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stop_tears_everything_down_and_allows_restart() {
    let h = harness(
        MockFeedMonitor::new(),
        vec![MemoryChannel::new("a")],
        RecordingApi::default(),
    );
    let mut signals = h.controller.subscribe_signals();

    h.controller.start().await.unwrap();
    h.controller.stop().await;

    assert_eq!(h.controller.state(), PlatformState::Stopped);
    assert!(!h.controller.is_healthy());
    assert_eq!(h.feed.disconnect_count(), 1);
    assert_eq!(h.channels[0].shutdown_count(), 1);
    assert_eq!(h.api.stops.load(Ordering::SeqCst), 1);
    assert_eq!(signals.recv().await.unwrap(), PlatformSignal::Started);
    assert_eq!(signals.recv().await.unwrap(), PlatformSignal::Stopped);

    h.controller.start().await.unwrap();
    assert_eq!(h.controller.state(), PlatformState::Running);
    h.controller.stop().await;
}

#[tokio::test]
async fn feed_failure_aborts_before_anything_else() {
    let h = harness(
        MockFeedMonitor::failing(),
        vec![MemoryChannel::new("a")],
        RecordingApi::default(),
    );

    let err = h.controller.start().await.unwrap_err();

    assert_eq!(startup_stage(&err), StartupStage::FeedConnect);
    assert_eq!(h.controller.state(), PlatformState::Stopped);
    assert_eq!(h.channels[0].initialize_count(), 0);
    assert_eq!(h.api.starts.load(Ordering::SeqCst), 0);
    assert_eq!(h.feed.disconnect_count(), 0);
}

#[tokio::test]
async fn channel_init_failure_rolls_back_feed_and_earlier_channels() {
    let h = harness(
        MockFeedMonitor::new(),
        vec![
            MemoryChannel::new("a"),
            MemoryChannel::new("b").failing_initialize(),
        ],
        RecordingApi::default(),
    );

    let err = h.controller.start().await.unwrap_err();

    assert_eq!(startup_stage(&err), StartupStage::DeliveryInitialize);
    assert_eq!(h.controller.state(), PlatformState::Stopped);
    assert_eq!(h.channels[0].shutdown_count(), 1);
    assert!(!h.channels[0].is_initialized());
    assert_eq!(h.feed.disconnect_count(), 1);
    assert!(!h.feed.is_connected());
    assert_eq!(h.api.starts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn api_failure_rolls_back_delivery_and_feed() {
    let h = harness(
        MockFeedMonitor::new(),
        vec![MemoryChannel::new("a")],
        RecordingApi {
            fail_start: true,
            ..RecordingApi::default()
        },
    );

    let err = h.controller.start().await.unwrap_err();

    assert_eq!(startup_stage(&err), StartupStage::ApiStart);
    assert!(err.to_string().contains("api_start"));
    assert_eq!(h.controller.state(), PlatformState::Stopped);
    assert_eq!(h.channels[0].shutdown_count(), 1);
    assert_eq!(h.feed.disconnect_count(), 1);
    assert_eq!(h.api.stops.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unhealthy_while_feed_is_disconnected() {
    let h = harness(
        MockFeedMonitor::new(),
        vec![MemoryChannel::new("a")],
        RecordingApi::default(),
    );
    h.controller.start().await.unwrap();
    assert!(h.controller.is_healthy());

    h.feed.drop_connection("connection reset");
    assert!(!h.controller.is_healthy());
    assert_eq!(h.controller.state(), PlatformState::Running);

    h.feed.reconnect();
    assert!(h.controller.is_healthy());

    h.controller.stop().await;
}

#[tokio::test]
async fn status_view_reports_channels() {
    let h = harness(
        MockFeedMonitor::new(),
        vec![MemoryChannel::new("a"), MemoryChannel::new("b").failing()],
        RecordingApi::default(),
    );
    h.controller.start().await.unwrap();

    let status = h.controller.status();

    assert!(status.feed_connected());
    let health = status.channel_health();
    assert_eq!(health.get("a"), Some(&true));
    assert_eq!(health.get("b"), Some(&false));
    assert!(!status.is_healthy());

    h.controller.stop().await;
}

#[tokio::test]
async fn stop_cancels_stuck_delivery() {
    let delivery = DeliveryConfig {
        attempt_timeout: Duration::from_secs(120),
        reply_timeout: Duration::from_secs(120),
        ..DeliveryConfig::default()
    };
    let h = harness_with(
        MockFeedMonitor::new(),
        vec![MemoryChannel::new("stuck").with_delay(Duration::from_secs(60))],
        RecordingApi::default(),
        delivery,
    );
    h.controller.start().await.unwrap();

    h.feed.emit(price_alert(50_000));
    let channel = Arc::clone(&h.channels[0]);
    wait_until(|| channel.attempts() == 1).await;

    timeout(Duration::from_secs(10), h.controller.stop())
        .await
        .expect("stop must not wait for the stuck channel");

    assert_eq!(h.controller.state(), PlatformState::Stopped);
    assert!(h.channels[0].delivered().is_empty());
}
