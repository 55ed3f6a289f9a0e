//! Port Interfaces
//!
//! Contracts that infrastructure adapters implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `BarStore`: durable append-only bar storage
//! - `CoverageStore`: persisted coverage intervals per key
//! - `AssetStore`: persisted instrument catalog
//! - `MarketDataProvider`: upstream historical bar API
//! - `InstrumentCatalog`: upstream instrument listing
//! - `UpstreamSubscriber`: live subscription requests to the upstream feed
//! - `Clock`: wall-clock source

mod clock_port;
mod live_feed_port;
mod market_data_port;
mod storage_port;

pub use clock_port::{Clock, SystemClock};
pub use live_feed_port::{DEFAULT_TICK_KINDS, FeedError, UpstreamSubscriber, UpstreamSubscription};
pub use market_data_port::{InstrumentCatalog, InstrumentPage, MarketDataProvider, ProviderError};
pub use storage_port::{AssetStore, BarStore, CoverageStore, StoreError};

#[cfg(test)]
pub use live_feed_port::MockUpstreamSubscriber;
