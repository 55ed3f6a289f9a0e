//! Price Cache Proxy Binary
//!
//! Starts the range cache and live relay.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin price-cache-proxy
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `UPSTREAM_REST_URL`: Base URL of the upstream bar and instrument API
//! - `UPSTREAM_STREAM_URL`: Upstream live tick WebSocket URL
//! - `UPSTREAM_API_TOKEN`: Bearer token for both
//!
//! ## Optional
//! - `PRICE_PROXY_HTTP_PORT`: HTTP port (default: 8083)
//! - `PRICE_PROXY_DATABASE_URL`: `SQLite` URL or `memory` (default: `sqlite://prices.db?mode=rwc`)
//! - `PRICE_PROXY_DATABASE_MAX_CONNECTIONS`: `SQLite` pool size (default: 5)
//! - `PRICE_PROXY_FRESHNESS_SECS`: Current-price freshness window (default: 7200)
//! - `PRICE_PROXY_CONNECTION_BUFFER`: Per-client outbound queue (default: 256)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log filter (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use price_cache_proxy::application::ports::{
    AssetStore, BarStore, CoverageStore, InstrumentCatalog, MarketDataProvider, SystemClock,
};
use price_cache_proxy::infrastructure::upstream::FeedState;
use price_cache_proxy::{
    AppState, AssetService, AssetServiceConfig, BroadcastDispatcher, CoverageTracker, HttpServer, InMemoryStore, LiveFeedClient,
    LiveFeedConfig, PriceService, RestMarketDataClient, ServiceConfig, SqliteStore,
    SubscriptionRegistry, handle_feed_events, init_metrics, init_telemetry,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Feed event channel capacity.
const FEED_EVENT_CAPACITY: usize = 4096;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("failed to install rustls crypto provider");
    }

    load_dotenv();

    let _telemetry_guard = init_telemetry();

    tracing::info!("Starting Price Cache Proxy");

    let _metrics_handle = init_metrics();

    let config = ServiceConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Storage
    let (bars, coverage_store, asset_store) = if config.storage.is_memory() {
        tracing::warn!("Using in-memory store; cached bars and assets are lost on restart");
        split_store(Arc::new(InMemoryStore::new()))
    } else {
        split_store(Arc::new(
            SqliteStore::connect(&config.storage.database_url, config.storage.max_connections)
                .await
                .context("failed to open bar store")?,
        ))
    };

    // Range query path
    let rest_client = Arc::new(
        RestMarketDataClient::new(
            config.upstream.rest_url.clone(),
            config.upstream.token.clone(),
            &config.rest,
        )
        .context("failed to build upstream REST client")?,
    );
    let provider: Arc<dyn MarketDataProvider> = rest_client.clone();
    let catalog: Arc<dyn InstrumentCatalog> = rest_client;
    let coverage = Arc::new(CoverageTracker::new(coverage_store));
    let prices = Arc::new(PriceService::new(
        bars,
        coverage,
        provider,
        Arc::new(SystemClock),
        config.cache.price_service_config(),
    ));

    // Asset catalog
    let assets = Arc::new(AssetService::new(
        catalog,
        asset_store,
        AssetServiceConfig::default(),
    ));

    // Live path
    let registry = Arc::new(SubscriptionRegistry::new());
    let (feed_tx, feed_rx) = mpsc::channel(FEED_EVENT_CAPACITY);
    let feed_client = Arc::new(LiveFeedClient::new(
        LiveFeedConfig::from_settings(&config.upstream, &config.websocket),
        Arc::clone(&registry),
        feed_tx,
        shutdown_token.clone(),
    ));
    let dispatcher = Arc::new(BroadcastDispatcher::new(
        Arc::clone(&registry),
        feed_client.clone(),
        config.dispatch.dispatcher_config(),
    ));
    let feed_state = Arc::new(FeedState::new());

    // Spawn feed event handler
    tokio::spawn(handle_feed_events(
        feed_rx,
        Arc::clone(&dispatcher),
        Arc::clone(&feed_state),
    ));

    // Spawn live feed client
    let feed_client_state = Arc::clone(&feed_state);
    tokio::spawn(async move {
        if let Err(e) = feed_client.run().await {
            feed_client_state.set_error(e.to_string());
            tracing::error!(error = %e, "Live feed client error");
        }
    });

    // Spawn HTTP server
    let app_state = AppState::new(
        env!("CARGO_PKG_VERSION"),
        prices,
        assets,
        Arc::clone(&dispatcher),
        Arc::clone(&feed_state),
    );
    let http_server = HttpServer::new(config.server.http_port, app_state, shutdown_token.clone());
    let http_handle = tokio::spawn(async move {
        if let Err(e) = http_server.run().await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    tracing::info!("Price cache proxy ready");

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, http_handle).await.is_err() {
        tracing::warn!("HTTP server did not stop within the shutdown timeout");
    }
    dispatcher.close_all();

    tracing::info!("Price cache proxy stopped");
    Ok(())
}

/// One store serving every storage port.
fn split_store<S>(
    store: Arc<S>,
) -> (Arc<dyn BarStore>, Arc<dyn CoverageStore>, Arc<dyn AssetStore>)
where
    S: BarStore + CoverageStore + AssetStore + 'static,
{
    (store.clone(), store.clone(), store)
}

/// Load .env file from current or ancestor directories.
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

/// Log the parsed configuration.
fn log_config(config: &ServiceConfig) {
    tracing::info!(
        http_port = config.server.http_port,
        database_url = %config.storage.database_url,
        base_interval = config.cache.base_interval,
        freshness_secs = config.cache.freshness.as_secs(),
        connection_buffer = config.dispatch.connection_buffer,
        "Configuration loaded"
    );
    tracing::debug!(
        rest_url = %config.upstream.rest_url,
        stream_url = %config.upstream.stream_url,
        "Upstream endpoints"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
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

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
