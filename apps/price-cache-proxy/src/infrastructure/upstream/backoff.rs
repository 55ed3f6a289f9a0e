//! Retry Backoff
//!
//! Exponential backoff with optional jitter, shared by the REST retry loop
//! and the live feed reconnect loop.

use std::time::Duration;

use rand::Rng;

use crate::infrastructure::config::{RestSettings, WebSocketSettings};

/// Backoff parameters.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// First delay.
    pub initial_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Maximum delays handed out before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 0,
        }
    }
}

impl BackoffConfig {
    /// Live feed reconnect parameters.
    #[must_use]
    pub const fn from_websocket_settings(settings: &WebSocketSettings) -> Self {
        Self {
            initial_delay: settings.reconnect_delay_initial,
            max_delay: settings.reconnect_delay_max,
            multiplier: settings.reconnect_delay_multiplier,
            jitter_factor: 0.1,
            max_attempts: settings.max_reconnect_attempts,
        }
    }

    /// REST retry parameters. Jitter-free; attempts are bounded by the caller.
    #[must_use]
    pub const fn from_rest_settings(settings: &RestSettings) -> Self {
        Self {
            initial_delay: settings.retry_initial_backoff,
            max_delay: settings.retry_max_backoff,
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 0,
        }
    }
}

/// Stateful backoff sequence.
///
/// ```rust
/// use price_cache_proxy::infrastructure::upstream::{Backoff, BackoffConfig};
/// use std::time::Duration;
///
/// let mut backoff = Backoff::new(BackoffConfig {
///     initial_delay: Duration::from_millis(100),
///     jitter_factor: 0.0,
///     ..BackoffConfig::default()
/// });
///
/// assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
/// assert_eq!(backoff.next_delay(), Some(Duration::from_millis(200)));
///
/// backoff.reset();
/// assert_eq!(backoff.attempts(), 0);
/// ```
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    /// Start a new sequence.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        let current = config.initial_delay;
        Self {
            config,
            current,
            attempts: 0,
        }
    }

    /// Next delay, or `None` once `max_attempts` delays have been handed out.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.config.max_attempts > 0 && self.attempts >= self.config.max_attempts {
            return None;
        }
        self.attempts += 1;

        let delay = self.jittered(self.current);
        let grown = self.current.as_secs_f64() * self.config.multiplier;
        self.current = if grown.is_finite() && grown > 0.0 {
            Duration::from_secs_f64(grown.min(self.config.max_delay.as_secs_f64()))
        } else {
            self.config.max_delay
        };

        Some(delay)
    }

    /// Restart from the initial delay.
    pub const fn reset(&mut self) {
        self.current = self.config.initial_delay;
        self.attempts = 0;
    }

    /// Delays handed out since the last reset.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return delay;
        }

        let base = delay.as_secs_f64();
        let spread = base * self.config.jitter_factor;
        let offset: f64 = rand::rng().random_range(-spread..=spread);
        Duration::from_secs_f64((base + offset).max(0.001))
    }
}
