//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Range queries**: request outcomes, gap fills, degraded responses
//! - **Live feed**: ticks received, reconnects, errors
//! - **Fan-out**: deliveries, delivery failures, connections, active instruments
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first.
///
/// # Panics
///
/// Panics if the recorder cannot be installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "price_proxy_range_requests_total",
        "Range queries served, by outcome"
    );
    describe_counter!(
        "price_proxy_gaps_fetched_total",
        "Coverage gaps filled from upstream"
    );
    describe_counter!(
        "price_proxy_bars_fetched_total",
        "Bars fetched from upstream during gap fills"
    );
    describe_counter!(
        "price_proxy_degraded_responses_total",
        "Range responses served while the cache could not be updated"
    );
    describe_histogram!(
        "price_proxy_range_request_seconds",
        "Range query latency including gap fills"
    );

    describe_counter!(
        "price_proxy_ticks_received_total",
        "Ticks received from the upstream live feed"
    );
    describe_counter!(
        "price_proxy_ticks_delivered_total",
        "Tick deliveries to client connections"
    );
    describe_counter!(
        "price_proxy_delivery_failures_total",
        "Tick deliveries that failed and closed the connection"
    );
    describe_counter!(
        "price_proxy_feed_reconnects_total",
        "Live feed reconnection attempts"
    );
    describe_counter!("price_proxy_feed_errors_total", "Live feed connection errors");

    describe_counter!(
        "price_proxy_asset_syncs_total",
        "Asset catalog syncs, by outcome"
    );
    describe_counter!(
        "price_proxy_assets_added_total",
        "Instruments added to the asset catalog"
    );

    describe_gauge!(
        "price_proxy_feed_connected",
        "1 while the upstream live feed is connected"
    );
    describe_gauge!(
        "price_proxy_client_connections",
        "Open client WebSocket connections"
    );
    describe_gauge!(
        "price_proxy_active_instruments",
        "Instruments with at least one local subscriber"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Range query outcome label.
#[derive(Debug, Clone, Copy)]
pub enum RangeOutcome {
    /// Served.
    Ok,
    /// Rejected as an invalid range.
    InvalidRange,
    /// Aborted by an upstream failure.
    UpstreamError,
    /// Cache read failed.
    StoreError,
}

impl RangeOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::InvalidRange => "invalid_range",
            Self::UpstreamError => "upstream_error",
            Self::StoreError => "store_error",
        }
    }
}

/// Record one range query.
pub fn record_range_request(outcome: RangeOutcome, duration: Duration) {
    counter!(
        "price_proxy_range_requests_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
    histogram!("price_proxy_range_request_seconds").record(duration.as_secs_f64());
}

/// Record the gap-fill work done by a successful range query.
pub fn record_gap_fill(gaps: usize, bars: usize, degraded: bool) {
    counter!("price_proxy_gaps_fetched_total").increment(gaps as u64);
    counter!("price_proxy_bars_fetched_total").increment(bars as u64);
    if degraded {
        counter!("price_proxy_degraded_responses_total").increment(1);
    }
}

/// Record one asset catalog sync; `added` is `None` when it failed.
pub fn record_asset_sync(added: Option<usize>) {
    let outcome = if added.is_some() { "ok" } else { "error" };
    counter!("price_proxy_asset_syncs_total", "outcome" => outcome).increment(1);
    if let Some(added) = added {
        counter!("price_proxy_assets_added_total").increment(added as u64);
    }
}

/// Record a tick received from upstream.
pub fn record_tick_received() {
    counter!("price_proxy_ticks_received_total").increment(1);
}

/// Record the outcome of one broadcast pass.
pub fn record_broadcast(delivered: usize, failed: usize) {
    counter!("price_proxy_ticks_delivered_total").increment(delivered as u64);
    if failed > 0 {
        counter!("price_proxy_delivery_failures_total").increment(failed as u64);
    }
}

/// Record a live feed reconnection attempt.
pub fn record_feed_reconnect() {
    counter!("price_proxy_feed_reconnects_total").increment(1);
}

/// Record a live feed error.
pub fn record_feed_error() {
    counter!("price_proxy_feed_errors_total").increment(1);
}

/// Update the live feed connection gauge.
pub fn set_feed_connected(connected: bool) {
    gauge!("price_proxy_feed_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Update the open client connection gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_client_connections(count: usize) {
    gauge!("price_proxy_client_connections").set(count as f64);
}

/// Update the active instrument gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_instruments(count: usize) {
    gauge!("price_proxy_active_instruments").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================
