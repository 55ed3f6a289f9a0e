//! Application Services
//!
//! - `CoverageTracker`: per-key cached coverage with serialized merges
//! - `PriceService`: range queries with gap-fill and current price lookup
//! - `BroadcastDispatcher`: live connection lifecycle and tick fan-out
//! - `AssetService`: instrument catalog sync and listing

mod assets;
mod coverage;
mod dispatcher;
mod prices;

pub use assets::{AssetService, AssetServiceConfig, AssetServiceError};
pub use coverage::CoverageTracker;
pub use dispatcher::{
    BroadcastDispatcher, BroadcastReport, ClientCommand, ClientConnection, CommandOutcome,
    ConnectionPhase, DispatcherConfig, IgnoreReason,
};
pub use prices::{PriceRange, PriceService, PriceServiceConfig, PriceServiceError, RangeRequest};
