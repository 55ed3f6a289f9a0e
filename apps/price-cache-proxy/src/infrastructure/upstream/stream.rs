//! Upstream Live Feed Client
//!
//! Maintains the single WebSocket connection to the upstream tick stream.
//!
//! # Protocol
//!
//! 1. Connect to `{stream_url}?token={token}`
//! 2. Send one `l1-subscription` frame per instrument
//! 3. Receive tick documents; each is relayed as [`FeedEvent::Tick`]
//!
//! # Resubscription
//!
//! Every subscribe request is remembered. After a reconnect, only the
//! remembered instruments that still have a local subscriber are
//! re-requested; the rest are forgotten, which is the point where a shared
//! upstream subscription is released.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::backoff::{Backoff, BackoffConfig};
use super::heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatMonitor};
use super::messages::{SubscribeFrame, tick_instrument_id};
use crate::application::ports::{FeedError, UpstreamSubscriber, UpstreamSubscription};
use crate::domain::market::InstrumentId;
use crate::domain::subscription::SubscriptionRegistry;
use crate::infrastructure::config::{ApiToken, UpstreamSettings, WebSocketSettings};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

// =============================================================================
// Configuration
// =============================================================================

/// Live feed client configuration.
#[derive(Debug, Clone)]
pub struct LiveFeedConfig {
    /// Stream URL without the token.
    pub url: String,
    /// Bearer token appended as a query parameter.
    pub token: ApiToken,
    /// Reconnect backoff.
    pub reconnect: BackoffConfig,
    /// Heartbeat timing.
    pub heartbeat: HeartbeatConfig,
}

impl LiveFeedConfig {
    /// Build from service settings.
    #[must_use]
    pub fn from_settings(upstream: &UpstreamSettings, websocket: &WebSocketSettings) -> Self {
        Self {
            url: upstream.stream_url.clone(),
            token: upstream.token.clone(),
            reconnect: BackoffConfig::from_websocket_settings(websocket),
            heartbeat: HeartbeatConfig::from_websocket_settings(websocket),
        }
    }

    /// URL actually dialed, token included.
    #[must_use]
    pub fn connect_url(&self) -> String {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{separator}token={}", self.url, self.token.expose())
    }
}

// =============================================================================
// Events & Errors
// =============================================================================

/// Events emitted by the live feed client.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Socket opened and subscriptions restored.
    Connected,
    /// Socket lost.
    Disconnected,
    /// About to reconnect after a backoff delay.
    Reconnecting {
        /// Attempt number since the last successful connect.
        attempt: u32,
    },
    /// Tick for one instrument; `payload` is the upstream text, untouched.
    Tick {
        /// Instrument the tick belongs to.
        instrument_id: InstrumentId,
        /// Raw upstream document.
        payload: Arc<str>,
    },
    /// Connection error.
    Error(String),
}

/// Live feed client error.
#[derive(Debug, thiserror::Error)]
pub enum LiveFeedError {
    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Subscribe frame could not be encoded.
    #[error("failed to encode subscribe frame: {0}")]
    Encode(#[from] serde_json::Error),

    /// Upstream closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// No traffic within the heartbeat timeout.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    /// Reconnect attempts exhausted.
    #[error("gave up after {0} reconnect attempts")]
    MaxReconnectAttemptsExceeded(u32),
}

impl From<tokio_tungstenite::tungstenite::Error> for LiveFeedError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(e.to_string())
    }
}

// =============================================================================
// Client
// =============================================================================

/// Client for the upstream live tick stream.
pub struct LiveFeedClient {
    config: LiveFeedConfig,
    registry: Arc<SubscriptionRegistry>,
    event_tx: mpsc::Sender<FeedEvent>,
    cancel: CancellationToken,
    desired: parking_lot::RwLock<HashMap<InstrumentId, UpstreamSubscription>>,
    command_tx: mpsc::UnboundedSender<UpstreamSubscription>,
    command_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<UpstreamSubscription>>,
}

impl LiveFeedClient {
    /// Create a new client. Nothing connects until [`LiveFeedClient::run`].
    #[must_use]
    pub fn new(
        config: LiveFeedConfig,
        registry: Arc<SubscriptionRegistry>,
        event_tx: mpsc::Sender<FeedEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        Self {
            config,
            registry,
            event_tx,
            cancel,
            desired: parking_lot::RwLock::new(HashMap::new()),
            command_tx,
            command_rx: tokio::sync::Mutex::new(command_rx),
        }
    }

    /// Instruments that will be re-requested on the next connect.
    #[must_use]
    pub fn remembered_instruments(&self) -> Vec<InstrumentId> {
        self.desired.read().keys().copied().collect()
    }

    /// Run the client with automatic reconnection.
    ///
    /// # Errors
    ///
    /// Returns an error once reconnect attempts are exhausted.
    pub async fn run(self: Arc<Self>) -> Result<(), LiveFeedError> {
        let mut backoff = Backoff::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Live feed client cancelled");
                return Ok(());
            }

            match self.connect_and_run(&mut backoff).await {
                Ok(()) => {
                    tracing::info!("Live feed connection closed gracefully");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Live feed connection error");

                    let _ = self.event_tx.send(FeedEvent::Error(e.to_string())).await;
                    let _ = self.event_tx.send(FeedEvent::Disconnected).await;

                    let Some(delay) = backoff.next_delay() else {
                        return Err(LiveFeedError::MaxReconnectAttemptsExceeded(
                            backoff.attempts(),
                        ));
                    };

                    let attempt = backoff.attempts();
                    tracing::info!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        "Reconnecting to live feed"
                    );
                    let _ = self
                        .event_tx
                        .send(FeedEvent::Reconnecting { attempt })
                        .await;

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            tracing::info!("Live feed client cancelled during reconnect delay");
                            return Ok(());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Connect and pump frames until error or cancellation.
    async fn connect_and_run(&self, backoff: &mut Backoff) -> Result<(), LiveFeedError> {
        tracing::info!(url = %self.config.url, "Connecting to live feed");

        let (ws_stream, _response) =
            tokio_tungstenite::connect_async(self.config.connect_url()).await?;
        let (mut write, mut read) = ws_stream.split();
        backoff.reset();

        // Queued requests are already remembered and get restored below.
        let mut commands = self.command_rx.lock().await;
        while commands.try_recv().is_ok() {}

        let restored = self.resubscriptions();
        for subscription in &restored {
            send_subscription(&mut write, subscription).await?;
        }
        tracing::info!(restored = restored.len(), "Live feed connected");
        let _ = self.event_tx.send(FeedEvent::Connected).await;

        let mut heartbeat = HeartbeatMonitor::new(self.config.heartbeat);
        let period = self.config.heartbeat.ping_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = ticker.tick() => {
                    match heartbeat.on_tick() {
                        HeartbeatAction::SendPing => {
                            write.send(Message::Ping(vec![].into())).await?;
                        }
                        HeartbeatAction::TimedOut => {
                            return Err(LiveFeedError::HeartbeatTimeout);
                        }
                    }
                }
                command = commands.recv() => {
                    if let Some(subscription) = command {
                        send_subscription(&mut write, &subscription).await?;
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            heartbeat.record_activity();
                            self.relay(text.as_str()).await;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            heartbeat.record_activity();
                        }
                        Some(Ok(Message::Ping(data))) => {
                            heartbeat.record_activity();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("Upstream sent close frame");
                            return Err(LiveFeedError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!("Live feed stream ended");
                            return Err(LiveFeedError::ConnectionClosed);
                        }
                    }
                }
            }
        }
    }

    /// Prune remembered subscriptions to locally active instruments.
    fn resubscriptions(&self) -> Vec<UpstreamSubscription> {
        let active = self.registry.active_instruments();
        let mut desired = self.desired.write();

        let before = desired.len();
        desired.retain(|instrument, _| active.contains(instrument));
        let released = before - desired.len();
        if released > 0 {
            tracing::info!(released, "Released upstream subscriptions without local subscribers");
        }

        desired.values().cloned().collect()
    }

    async fn relay(&self, text: &str) {
        let Some(instrument_id) = tick_instrument_id(text) else {
            tracing::debug!(len = text.len(), "Skipping upstream frame without instrumentId");
            return;
        };

        let event = FeedEvent::Tick {
            instrument_id,
            payload: Arc::from(text),
        };
        if self.event_tx.send(event).await.is_err() {
            tracing::debug!("Feed event receiver dropped");
        }
    }
}

impl UpstreamSubscriber for LiveFeedClient {
    fn subscribe(&self, subscription: UpstreamSubscription) -> Result<(), FeedError> {
        self.desired
            .write()
            .insert(subscription.instrument_id, subscription.clone());
        self.command_tx
            .send(subscription)
            .map_err(|_| FeedError::ChannelClosed)
    }
}

async fn send_subscription(
    write: &mut WsSink,
    subscription: &UpstreamSubscription,
) -> Result<(), LiveFeedError> {
    let frame = SubscribeFrame::new(subscription).to_json()?;
    tracing::debug!(
        instrument_id = %subscription.instrument_id,
        provider = %subscription.provider,
        "Sending upstream subscribe"
    );
    write.send(Message::Text(frame.into())).await?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
