//! Heartbeat Monitor
//!
//! Tracks liveness of the upstream socket. The feed loop calls
//! [`HeartbeatMonitor::on_tick`] on every ping interval and
//! [`HeartbeatMonitor::record_activity`] whenever anything arrives.

use std::time::Duration;

use tokio::time::Instant;

use crate::infrastructure::config::WebSocketSettings;

/// Heartbeat timing.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    /// Interval between pings.
    pub ping_interval: Duration,
    /// Silence tolerated after a ping before the socket is considered dead.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(60),
        }
    }
}

impl HeartbeatConfig {
    /// Build from WebSocket settings.
    #[must_use]
    pub const fn from_websocket_settings(settings: &WebSocketSettings) -> Self {
        Self {
            ping_interval: settings.heartbeat_interval,
            pong_timeout: settings.heartbeat_timeout,
        }
    }
}

/// What the feed loop should do on a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a ping frame.
    SendPing,
    /// No traffic since the last ping for longer than the timeout.
    TimedOut,
}

/// Per-connection heartbeat state.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    pong_timeout: Duration,
    last_activity: Instant,
    awaiting_pong: bool,
}

impl HeartbeatMonitor {
    /// Fresh monitor for a just-opened connection.
    #[must_use]
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            pong_timeout: config.pong_timeout,
            last_activity: Instant::now(),
            awaiting_pong: false,
        }
    }

    /// Any inbound frame proves the connection is alive.
    pub fn record_activity(&mut self) {
        self.last_activity = Instant::now();
        self.awaiting_pong = false;
    }

    /// Whether a ping is outstanding.
    #[must_use]
    pub const fn awaiting_pong(&self) -> bool {
        self.awaiting_pong
    }

    /// Decide the action for this tick.
    pub fn on_tick(&mut self) -> HeartbeatAction {
        let silence = self.last_activity.elapsed();
        if self.awaiting_pong && silence > self.pong_timeout {
            tracing::warn!(
                silence_secs = silence.as_secs(),
                timeout_secs = self.pong_timeout.as_secs(),
                "Heartbeat timeout detected"
            );
            return HeartbeatAction::TimedOut;
        }
        self.awaiting_pong = true;
        HeartbeatAction::SendPing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> HeartbeatMonitor {
        HeartbeatMonitor::new(HeartbeatConfig {
            ping_interval: Duration::from_secs(10),
            pong_timeout: Duration::from_secs(20),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_pings() {
        let mut monitor = monitor();

        assert_eq!(monitor.on_tick(), HeartbeatAction::SendPing);
        assert!(monitor.awaiting_pong());
    }

    #[tokio::test(start_paused = true)]
    async fn activity_clears_outstanding_ping() {
        let mut monitor = monitor();
        monitor.on_tick();
        tokio::time::advance(Duration::from_secs(30)).await;

        monitor.record_activity();

        assert!(!monitor.awaiting_pong());
        assert_eq!(monitor.on_tick(), HeartbeatAction::SendPing);
    }

    #[tokio::test(start_paused = true)]
    async fn silence_past_timeout_after_ping_times_out() {
        let mut monitor = monitor();
        monitor.on_tick();

        tokio::time::advance(Duration::from_secs(21)).await;

        assert_eq!(monitor.on_tick(), HeartbeatAction::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn silence_without_outstanding_ping_just_pings() {
        let mut monitor = monitor();

        tokio::time::advance(Duration::from_secs(300)).await;

        assert_eq!(monitor.on_tick(), HeartbeatAction::SendPing);
    }

    #[test]
    fn default_config_values() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.ping_interval, Duration::from_secs(30));
        assert_eq!(config.pong_timeout, Duration::from_secs(60));
    }
}
