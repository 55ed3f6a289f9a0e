//! Configuration Module
//!
//! Environment-driven configuration for the price cache proxy.

mod settings;

pub use settings::{
    ApiToken, CacheSettings, ConfigError, DispatchSettings, RestSettings, ServerSettings,
    ServiceConfig, StorageSettings, UpstreamSettings, WebSocketSettings,
};
