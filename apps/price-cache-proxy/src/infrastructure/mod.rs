//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Upstream REST and live feed clients.
pub mod upstream;

/// Bar and coverage storage (`SQLite` and in-memory).
pub mod persistence;

/// HTTP server: query API, client WebSocket, health and metrics.
pub mod http;

/// Configuration loading.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
