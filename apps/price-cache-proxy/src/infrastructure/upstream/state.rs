//! Live Feed State
//!
//! Connection state of the upstream live feed, shared between the event
//! pump (writer) and the health endpoints (readers).

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Upstream connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected and not yet trying.
    #[default]
    Disconnected,
    /// Socket is open.
    Connected,
    /// Waiting out a backoff delay before reconnecting.
    Reconnecting,
    /// Feed gave up or hit a fatal error.
    Error,
}

impl ConnectionState {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        }
    }
}

/// Tracks the state of the upstream live feed.
#[derive(Debug, Default)]
pub struct FeedState {
    state: parking_lot::RwLock<ConnectionState>,
    last_connected_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
    error_message: parking_lot::RwLock<Option<String>>,
    reconnect_attempts: AtomicU32,
    ticks_received: AtomicU64,
}

impl FeedState {
    /// Fresh, disconnected state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection state.
    pub fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        if state == ConnectionState::Connected {
            *self.last_connected_at.write() = Some(Utc::now());
            self.reconnect_attempts.store(0, Ordering::Relaxed);
            *self.error_message.write() = None;
        }
    }

    /// Record a reconnect attempt.
    pub fn set_reconnecting(&self, attempt: u32) {
        *self.state.write() = ConnectionState::Reconnecting;
        self.reconnect_attempts.store(attempt, Ordering::Relaxed);
    }

    /// Set an error state with message.
    pub fn set_error(&self, message: String) {
        *self.state.write() = ConnectionState::Error;
        *self.error_message.write() = Some(message);
    }

    /// Count one relayed tick.
    pub fn increment_ticks(&self) {
        self.ticks_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the socket is currently open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// When the feed last connected.
    #[must_use]
    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        *self.last_connected_at.read()
    }

    /// Last error reported by the feed.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.error_message.read().clone()
    }

    /// Reconnect attempts since the last successful connect.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Ticks relayed since start.
    #[must_use]
    pub fn ticks_received(&self) -> u64 {
        self.ticks_received.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disconnected() {
        let state = FeedState::new();
        assert_eq!(state.state(), ConnectionState::Disconnected);
        assert!(state.last_connected_at().is_none());
    }

    #[test]
    fn connecting_clears_error_and_attempts() {
        let state = FeedState::new();
        state.set_reconnecting(3);
        state.set_error("boom".to_string());

        state.set_state(ConnectionState::Connected);

        assert!(state.is_connected());
        assert_eq!(state.reconnect_attempts(), 0);
        assert!(state.error_message().is_none());
        assert!(state.last_connected_at().is_some());
    }

    #[test]
    fn tick_counter() {
        let state = FeedState::new();
        state.increment_ticks();
        state.increment_ticks();
        assert_eq!(state.ticks_received(), 2);
    }

    #[test]
    fn state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ConnectionState::Reconnecting).unwrap(),
            "\"reconnecting\""
        );
        assert_eq!(ConnectionState::Error.as_str(), "error");
    }
}
