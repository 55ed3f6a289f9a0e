#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_possible_wrap
    )
)]

//! Price Cache Proxy - Market Data Range Cache and Live Relay
//!
//! Fronts an upstream market data provider. Historical range queries are
//! answered from a local bar cache that tracks which time ranges it already
//! holds and fetches only the gaps. Live ticks arrive over one upstream
//! WebSocket and are fanned out to every interested client connection.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and algorithms
//!   - `market`: Instruments, bars, periodicities, time ranges
//!   - `coverage`: Covered-range sets and gap computation
//!   - `aggregation`: Resampling base bars into coarser buckets
//!   - `subscription`: Connection ↔ instrument registry
//!   - `asset`: Instrument catalog entries
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Storage, upstream provider, live feed and clock interfaces
//!   - `services`: Coverage tracking, range orchestration, live dispatch,
//!     asset catalog sync
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `upstream`: REST bar and instrument client, live feed client
//!   - `persistence`: `SQLite` and in-memory stores
//!   - `http`: Query API, client WebSocket, health
//!   - `config`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!                 ┌──────────────┐  gaps   ┌──────────────┐
//! GET /range ────►│ PriceService │────────►│ Upstream REST│
//!                 └──────┬───────┘         └──────────────┘
//!                        │ append / query
//!                 ┌──────▼───────┐
//!                 │  Bar store + │
//!                 │  coverage    │
//!                 └──────────────┘
//!
//! Upstream WS ──► LiveFeedClient ──► BroadcastDispatcher ──► Client 1..N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types and algorithms with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::asset::Asset;
pub use domain::coverage::{CoverageSet, compute_gaps};
pub use domain::market::{
    AggregatedBar, BASE_PERIODICITY, Bar, InstrumentId, InstrumentKey, Periodicity, Provider,
    TimeRange,
};
pub use domain::subscription::{ConnectionId, SubscriptionChanges, SubscriptionRegistry};

// Application services
pub use application::services::{
    AssetService, AssetServiceConfig, AssetServiceError, BroadcastDispatcher, CoverageTracker, PriceRange, PriceService, PriceServiceConfig,
    PriceServiceError, RangeRequest,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, ServiceConfig};

// HTTP server
pub use infrastructure::http::{AppState, HttpServer, HttpServerError, router};

// Upstream clients
pub use infrastructure::upstream::{
    FeedEvent, FeedState, LiveFeedClient, LiveFeedConfig, RestMarketDataClient,
    handle_feed_events,
};

// Storage
pub use infrastructure::persistence::{InMemoryStore, SqliteStore};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
