//! HTTP Surface
//!
//! One axum server carrying every inbound surface of the proxy.
//!
//! # Endpoints
//!
//! - `GET /api/prices/range` - Aggregated historical bars (gap-filled)
//! - `GET /api/prices/current` - Most recent bar for an instrument
//! - `GET /api/assets` - Instrument catalog (`?refresh=true` syncs from upstream first)
//! - `GET /ws` - Client live tick channel
//! - `GET /health` - JSON health status
//! - `GET /healthz` - Liveness check
//! - `GET /readyz` - Readiness check
//! - `GET /metrics` - Prometheus metrics in text format

mod assets;
mod health;
mod prices;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{AssetService, BroadcastDispatcher, PriceService};
use crate::infrastructure::upstream::FeedState;

pub use health::{FeedInfo, HealthResponse, HealthStatus};
pub use prices::{ApiError, DEGRADED_HEADER};

// =============================================================================
// Shared State
// =============================================================================

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    version: String,
    started_at: Instant,
    prices: Arc<PriceService>,
    assets: Arc<AssetService>,
    dispatcher: Arc<BroadcastDispatcher>,
    feed: Arc<FeedState>,
}

impl AppState {
    /// Create handler state.
    #[must_use]
    pub fn new(
        version: impl Into<String>,
        prices: Arc<PriceService>,
        assets: Arc<AssetService>,
        dispatcher: Arc<BroadcastDispatcher>,
        feed: Arc<FeedState>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                version: version.into(),
                started_at: Instant::now(),
                prices,
                assets,
                dispatcher,
                feed,
            }),
        }
    }

    fn prices(&self) -> &PriceService {
        &self.inner.prices
    }

    fn assets(&self) -> &AssetService {
        &self.inner.assets
    }

    fn dispatcher(&self) -> &Arc<BroadcastDispatcher> {
        &self.inner.dispatcher
    }

    fn feed(&self) -> &FeedState {
        &self.inner.feed
    }
}

/// Build the full router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/prices/range", get(prices::range_handler))
        .route("/api/prices/current", get(prices::current_handler))
        .route("/api/assets", get(assets::assets_handler))
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(health::health_handler))
        .route("/healthz", get(health::liveness_handler))
        .route("/readyz", get(health::readiness_handler))
        .route("/metrics", get(health::metrics_handler))
        .with_state(state)
}

// =============================================================================
// Server
// =============================================================================

/// HTTP server.
pub struct HttpServer {
    port: u16,
    state: AppState,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(port: u16, state: AppState, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the server encounters
    /// a fatal error while running.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "HTTP server listening");

        let dispatcher = Arc::clone(self.state.dispatcher());
        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        dispatcher.close_all();
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
