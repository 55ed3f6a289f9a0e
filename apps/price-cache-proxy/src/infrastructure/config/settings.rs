//! Service Configuration Settings
//!
//! Configuration types for the price cache proxy, loaded from environment
//! variables (optionally seeded from a `.env` file by the binary).

use std::time::Duration;

use chrono::TimeDelta;

use crate::application::services::{DispatcherConfig, PriceServiceConfig};

/// Bearer token for the upstream provider.
#[derive(Clone)]
pub struct ApiToken(String);

impl ApiToken {
    /// Wrap a raw token.
    #[must_use]
    pub const fn new(token: String) -> Self {
        Self(token)
    }

    /// The raw token.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiToken([REDACTED])")
    }
}

/// Upstream provider endpoints and credentials.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Base URL of the historical bar REST API.
    pub rest_url: String,
    /// WebSocket URL of the live tick stream.
    pub stream_url: String,
    /// Bearer token for both.
    pub token: ApiToken,
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Port serving the query API, `/ws`, health and metrics.
    pub http_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { http_port: 8083 }
    }
}

/// Durable store settings.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// `SQLite` connection URL, or `memory` for a process-local store.
    pub database_url: String,
    /// Pool size.
    pub max_connections: u32,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://prices.db?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

impl StorageSettings {
    /// Whether the in-process store was requested.
    #[must_use]
    pub fn is_memory(&self) -> bool {
        self.database_url.eq_ignore_ascii_case("memory")
    }
}

/// Cache behaviour.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Interval multiplier for current-price lookups.
    pub base_interval: u32,
    /// Age under which a cached latest bar is served without asking upstream.
    pub freshness: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            base_interval: 1,
            freshness: Duration::from_secs(7200),
        }
    }
}

impl CacheSettings {
    /// Price service parameters derived from these settings.
    #[must_use]
    pub fn price_service_config(&self) -> PriceServiceConfig {
        PriceServiceConfig {
            latest_interval: self.base_interval,
            freshness: TimeDelta::from_std(self.freshness).unwrap_or(TimeDelta::hours(2)),
            ..PriceServiceConfig::default()
        }
    }
}

/// Client fan-out settings.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Outbound queue capacity per client connection.
    pub connection_buffer: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            connection_buffer: 256,
        }
    }
}

impl DispatchSettings {
    /// Dispatcher parameters derived from these settings.
    #[must_use]
    pub const fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            connection_buffer: self.connection_buffer,
        }
    }
}

/// Upstream REST client settings.
#[derive(Debug, Clone)]
pub struct RestSettings {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Total attempts per request, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub retry_initial_backoff: Duration,
    /// Upper bound on retry delays.
    pub retry_max_backoff: Duration,
}

impl Default for RestSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            retry_initial_backoff: Duration::from_millis(500),
            retry_max_backoff: Duration::from_secs(10),
        }
    }
}

/// Live feed WebSocket settings.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Heartbeat timeout before considering connection dead.
    pub heartbeat_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0,
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Upstream provider.
    pub upstream: UpstreamSettings,
    /// HTTP server.
    pub server: ServerSettings,
    /// Durable store.
    pub storage: StorageSettings,
    /// Cache behaviour.
    pub cache: CacheSettings,
    /// Client fan-out.
    pub dispatch: DispatchSettings,
    /// REST client.
    pub rest: RestSettings,
    /// Live feed connection.
    pub websocket: WebSocketSettings,
}

impl ServiceConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvSource(lookup);

        let upstream = UpstreamSettings {
            rest_url: env.required("UPSTREAM_REST_URL")?,
            stream_url: env.required("UPSTREAM_STREAM_URL")?,
            token: ApiToken::new(env.required("UPSTREAM_API_TOKEN")?),
        };

        let server = ServerSettings {
            http_port: env.parse("PRICE_PROXY_HTTP_PORT", ServerSettings::default().http_port),
        };

        let storage = StorageSettings {
            database_url: env
                .get("PRICE_PROXY_DATABASE_URL")
                .unwrap_or_else(|| StorageSettings::default().database_url),
            max_connections: env.parse(
                "PRICE_PROXY_DATABASE_MAX_CONNECTIONS",
                StorageSettings::default().max_connections,
            ),
        };

        let cache = CacheSettings {
            base_interval: env.parse(
                "PRICE_PROXY_BASE_INTERVAL",
                CacheSettings::default().base_interval,
            ),
            freshness: env.duration_secs(
                "PRICE_PROXY_FRESHNESS_SECS",
                CacheSettings::default().freshness,
            ),
        };

        let dispatch = DispatchSettings {
            connection_buffer: env.parse(
                "PRICE_PROXY_CONNECTION_BUFFER",
                DispatchSettings::default().connection_buffer,
            ),
        };

        let rest = RestSettings {
            timeout: env.duration_secs(
                "PRICE_PROXY_REST_TIMEOUT_SECS",
                RestSettings::default().timeout,
            ),
            max_attempts: env
                .parse("PRICE_PROXY_REST_MAX_ATTEMPTS", RestSettings::default().max_attempts)
                .max(1),
            ..RestSettings::default()
        };

        let websocket = WebSocketSettings {
            heartbeat_interval: env.duration_secs(
                "PRICE_PROXY_HEARTBEAT_INTERVAL_SECS",
                WebSocketSettings::default().heartbeat_interval,
            ),
            heartbeat_timeout: env.duration_secs(
                "PRICE_PROXY_HEARTBEAT_TIMEOUT_SECS",
                WebSocketSettings::default().heartbeat_timeout,
            ),
            reconnect_delay_initial: env.duration_millis(
                "PRICE_PROXY_RECONNECT_DELAY_INITIAL_MS",
                WebSocketSettings::default().reconnect_delay_initial,
            ),
            reconnect_delay_max: env.duration_secs(
                "PRICE_PROXY_RECONNECT_DELAY_MAX_SECS",
                WebSocketSettings::default().reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env.parse(
                "PRICE_PROXY_RECONNECT_DELAY_MULTIPLIER",
                WebSocketSettings::default().reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: env.parse(
                "PRICE_PROXY_MAX_RECONNECT_ATTEMPTS",
                WebSocketSettings::default().max_reconnect_attempts,
            ),
        };

        Ok(Self {
            upstream,
            server,
            storage,
            cache,
            dispatch,
            rest,
            websocket,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

struct EnvSource<F>(F);

impl<F> EnvSource<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        let value = self
            .get(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
        if value.trim().is_empty() {
            return Err(ConfigError::EmptyValue(key.to_string()));
        }
        Ok(value)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}
