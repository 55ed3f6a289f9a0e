//! Health check and metrics handlers.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::AppState;
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::upstream::{ConnectionState, FeedState};

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream live feed status.
    pub feed: FeedInfo,
    /// Open client connections.
    pub client_connections: usize,
    /// Instruments with at least one local subscriber.
    pub active_instruments: usize,
    /// Total `(connection, instrument)` subscriptions.
    pub subscriptions: usize,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational.
    Healthy,
    /// Live feed down; range queries still served.
    Degraded,
    /// Live feed gave up.
    Unhealthy,
}

/// Live feed status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    /// Connection state.
    pub state: ConnectionState,
    /// Whether the feed is connected.
    pub connected: bool,
    /// Ticks relayed since start.
    pub ticks_received: u64,
    /// Current reconnect attempts (0 if connected).
    pub reconnect_attempts: u32,
    /// Last successful connect.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Last error, if the feed is in the error state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FeedInfo {
    fn from_state(state: &FeedState) -> Self {
        let connection_state = state.state();
        Self {
            state: connection_state,
            connected: connection_state == ConnectionState::Connected,
            ticks_received: state.ticks_received(),
            reconnect_attempts: state.reconnect_attempts(),
            last_connected_at: state.last_connected_at(),
            error: state.error_message(),
        }
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

pub(super) async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

pub(super) async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

pub(super) async fn readiness_handler(State(state): State<AppState>) -> impl IntoResponse {
    if state.feed().state() == ConnectionState::Error {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    } else {
        (StatusCode::OK, "READY")
    }
}

pub(super) async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &AppState) -> HealthResponse {
    let feed = FeedInfo::from_state(state.feed());
    let stats = state.dispatcher().registry().stats();

    HealthResponse {
        status: determine_health_status(feed.state),
        version: state.inner.version.clone(),
        uptime_secs: state.inner.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feed,
        client_connections: state.dispatcher().connection_count(),
        active_instruments: stats.instrument_count,
        subscriptions: stats.subscription_count,
    }
}

const fn determine_health_status(feed: ConnectionState) -> HealthStatus {
    match feed {
        ConnectionState::Connected => HealthStatus::Healthy,
        ConnectionState::Disconnected | ConnectionState::Reconnecting => HealthStatus::Degraded,
        ConnectionState::Error => HealthStatus::Unhealthy,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn status_follows_feed() {
        assert_eq!(
            determine_health_status(ConnectionState::Connected),
            HealthStatus::Healthy
        );
        assert_eq!(
            determine_health_status(ConnectionState::Reconnecting),
            HealthStatus::Degraded
        );
        assert_eq!(
            determine_health_status(ConnectionState::Disconnected),
            HealthStatus::Degraded
        );
        assert_eq!(
            determine_health_status(ConnectionState::Error),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn feed_info_snapshot() {
        let state = FeedState::new();
        state.set_state(ConnectionState::Connected);
        state.increment_ticks();

        let info = FeedInfo::from_state(&state);

        assert!(info.connected);
        assert_eq!(info.ticks_received, 1);
        assert!(info.last_connected_at.is_some());
        assert!(info.error.is_none());
    }
}
