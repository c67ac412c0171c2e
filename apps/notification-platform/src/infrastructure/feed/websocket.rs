//! WebSocket Feed Monitor
//!
//! Connects to the Hyperliquid public WebSocket feed, subscribes to the
//! configured assets and republishes decoded frames as [`FeedSignal`]s.
//!
//! # Stream URL
//!
//! - Mainnet: `wss://api.hyperliquid.xyz/ws`
//! - Testnet: `wss://api.hyperliquid-testnet.xyz/ws`
//!
//! The first connection is made by `connect()` and its failure is returned
//! to the caller. Once established, drops are retried in the background
//! with [`ReconnectPolicy`]; each drop emits [`FeedSignal::Error`] and each
//! successful reconnect emits [`FeedSignal::Reconnected`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::codec;
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{FeedError, FeedMonitor, FeedSignal};
use crate::domain::event::Asset;
use crate::infrastructure::config::FeedSettings;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SIGNAL_BUFFER: usize = 4096;

// =============================================================================
// Configuration
// =============================================================================

/// WebSocket feed configuration.
#[derive(Debug, Clone)]
pub struct WebSocketFeedConfig {
    /// Feed URL.
    pub url: String,
    /// Assets to subscribe to.
    pub assets: Vec<Asset>,
    /// Backoff for reconnects after a drop.
    pub reconnect: ReconnectConfig,
    /// Interval of application-level keep-alive pings.
    pub ping_interval: Duration,
}

impl WebSocketFeedConfig {
    /// Build from feed settings.
    #[must_use]
    pub fn from_settings(settings: &FeedSettings) -> Self {
        Self {
            url: settings.ws_url.clone(),
            assets: settings.assets.iter().map(Asset::new).collect(),
            reconnect: ReconnectConfig::from_feed_settings(settings),
            ping_interval: settings.ping_interval,
        }
    }
}

// =============================================================================
// Monitor
// =============================================================================

struct Session {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Feed monitor backed by a WebSocket connection.
pub struct WebSocketFeedMonitor {
    config: WebSocketFeedConfig,
    signals: broadcast::Sender<FeedSignal>,
    connected: Arc<AtomicBool>,
    session: tokio::sync::Mutex<Option<Session>>,
}

impl WebSocketFeedMonitor {
    /// Create a disconnected monitor.
    #[must_use]
    pub fn new(config: WebSocketFeedConfig) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_BUFFER);
        Self {
            config,
            signals,
            connected: Arc::new(AtomicBool::new(false)),
            session: tokio::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl FeedMonitor for WebSocketFeedMonitor {
    async fn connect(&self) -> Result<(), FeedError> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Ok(());
        }

        let stream = open(&self.config).await?;
        self.connected.store(true, Ordering::Release);
        tracing::info!(
            url = %self.config.url,
            assets = self.config.assets.len(),
            "Feed connected"
        );

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_session(
            stream,
            self.config.clone(),
            self.signals.clone(),
            Arc::clone(&self.connected),
            cancel.clone(),
        ));
        *session = Some(Session { cancel, handle });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), FeedError> {
        let Some(session) = self.session.lock().await.take() else {
            return Ok(());
        };

        session.cancel.cancel();
        let result = session.handle.await;
        self.connected.store(false, Ordering::Release);
        tracing::info!("Feed disconnected");

        result.map_err(|e| FeedError::WebSocket(format!("reader task failed: {e}")))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn subscribe(&self) -> broadcast::Receiver<FeedSignal> {
        self.signals.subscribe()
    }
}

impl std::fmt::Debug for WebSocketFeedMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketFeedMonitor")
            .field("config", &self.config)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Connection
// =============================================================================

async fn open(config: &WebSocketFeedConfig) -> Result<WsStream, FeedError> {
    tracing::debug!(url = %config.url, "Opening feed connection");
    let (mut stream, _response) = tokio_tungstenite::connect_async(&config.url)
        .await
        .map_err(|e| FeedError::ConnectionFailed(e.to_string()))?;

    for request in codec::subscription_requests(&config.assets)? {
        stream
            .send(Message::Text(request.into()))
            .await
            .map_err(|e| FeedError::ConnectionFailed(format!("subscribe failed: {e}")))?;
    }

    Ok(stream)
}

async fn run_session(
    mut stream: WsStream,
    config: WebSocketFeedConfig,
    signals: broadcast::Sender<FeedSignal>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let mut policy = ReconnectPolicy::new(config.reconnect.clone());

    loop {
        let reason = match read_until_closed(stream, &config, &signals, &cancel).await {
            Ok(()) => return,
            Err(e) => e,
        };

        connected.store(false, Ordering::Release);
        tracing::warn!(error = %reason, "Feed connection lost");
        let _ = signals.send(FeedSignal::Error(reason.to_string()));

        stream = loop {
            let Some(delay) = policy.next_delay() else {
                let error = FeedError::MaxReconnectAttemptsExceeded(policy.attempt_count());
                tracing::error!(error = %error, "Giving up on feed");
                let _ = signals.send(FeedSignal::Error(error.to_string()));
                return;
            };

            tracing::info!(
                attempt = policy.attempt_count(),
                delay_ms = delay.as_millis(),
                "Reconnecting to feed"
            );
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }

            let attempt = tokio::select! {
                () = cancel.cancelled() => return,
                attempt = open(&config) => attempt,
            };
            match attempt {
                Ok(stream) => break stream,
                Err(e) => {
                    tracing::warn!(error = %e, "Feed reconnect attempt failed");
                    let _ = signals.send(FeedSignal::Error(e.to_string()));
                }
            }
        };

        policy.reset();
        connected.store(true, Ordering::Release);
        tracing::info!("Feed reconnected");
        let _ = signals.send(FeedSignal::Reconnected);
    }
}

/// Pump frames until cancelled (`Ok`) or the connection fails (`Err`).
async fn read_until_closed(
    stream: WsStream,
    config: &WebSocketFeedConfig,
    signals: &broadcast::Sender<FeedSignal>,
    cancel: &CancellationToken,
) -> Result<(), FeedError> {
    let (mut write, mut read) = stream.split();
    let mut ping = tokio::time::interval_at(
        tokio::time::Instant::now() + config.ping_interval,
        config.ping_interval,
    );

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
            _ = ping.tick() => {
                write
                    .send(Message::Text(codec::PING.into()))
                    .await
                    .map_err(|e| FeedError::WebSocket(e.to_string()))?;
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => match codec::decode_frame(&text) {
                    Ok(events) => {
                        for event in events {
                            let _ = signals.send(FeedSignal::Event(event));
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "Dropping undecodable frame"),
                },
                Some(Ok(Message::Ping(data))) => {
                    write
                        .send(Message::Pong(data))
                        .await
                        .map_err(|e| FeedError::WebSocket(e.to_string()))?;
                }
                Some(Ok(Message::Close(_))) | None => return Err(FeedError::ConnectionClosed),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(FeedError::WebSocket(e.to_string())),
            },
        }
    }
}
