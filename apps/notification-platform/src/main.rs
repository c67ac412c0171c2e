//! Notification Platform Binary
//!
//! Starts the market alert pipeline.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin notification-platform
//! ```
//!
//! # Environment Variables
//!
//! ## Feed
//! - `FEED_WS_URL`: Feed endpoint (default: `wss://api.hyperliquid.xyz/ws`)
//! - `FEED_ASSETS`: Comma separated assets (default: BTC,ETH)
//!
//! ## Server
//! - `NOTIFY_HEALTH_PORT`: Health, metrics and stats HTTP port (default: 8083)
//!
//! ## Telemetry
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: notification-platform)
//! - `RUST_LOG`: Log level (default: info)
//!
//! Pipeline, delivery and rule tuning variables are listed in
//! `infrastructure::config`.

use std::sync::Arc;

use anyhow::Context;
use notification_platform::application::ports::{ApiSurface, DeliveryChannel};
use notification_platform::application::services::{
    DeliveryCoordinator, MetricsRegistry, PlatformComponents, PlatformController,
};
use notification_platform::infrastructure::channels::LogChannel;
use notification_platform::infrastructure::feed::{WebSocketFeedConfig, WebSocketFeedMonitor};
use notification_platform::infrastructure::health::HealthServer;
use notification_platform::infrastructure::rules::ThresholdRuleEvaluator;
use notification_platform::infrastructure::telemetry;
use notification_platform::{PlatformConfig, init_metrics};
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("failed to install rustls crypto provider");
    }

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Notification Platform");

    init_metrics().context("failed to install Prometheus recorder")?;

    let config = PlatformConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let metrics = Arc::new(MetricsRegistry::new(config.metrics_export_interval));
    let channels: Vec<Arc<dyn DeliveryChannel>> = vec![Arc::new(LogChannel::default())];
    let coordinator = Arc::new(DeliveryCoordinator::new(
        channels,
        config.delivery.clone(),
        Arc::clone(&metrics),
    ));
    let api: Arc<dyn ApiSurface> = Arc::new(HealthServer::new(config.server.health_port));

    let controller = PlatformController::new(
        PlatformComponents {
            feed: Arc::new(WebSocketFeedMonitor::new(WebSocketFeedConfig::from_settings(
                &config.feed,
            ))),
            evaluator: Arc::new(ThresholdRuleEvaluator::new(config.rules.clone())),
            coordinator,
            metrics,
            api: Some(api),
        },
        config.pipeline.clone(),
    );

    controller
        .start()
        .await
        .context("notification platform failed to start")?;

    tracing::info!("Notification platform ready");

    await_shutdown().await;
    controller.stop().await;

    let snapshot = controller.metrics();
    tracing::info!(
        sent = snapshot.sent,
        failed = snapshot.failed,
        errors = snapshot.errors,
        uptime_secs = snapshot.uptime_secs,
        "Notification platform exited"
    );
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &PlatformConfig) {
    tracing::info!(
        feed_url = %config.feed.ws_url,
        assets = ?config.feed.assets,
        health_port = config.server.health_port,
        workers = config.pipeline.workers,
        channel_workers = config.delivery.workers_per_channel,
        "Configuration loaded"
    );
    tracing::debug!(rules = ?config.rules, "Alert thresholds");
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
