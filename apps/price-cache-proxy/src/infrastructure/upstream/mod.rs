//! Upstream Provider Adapters
//!
//! Clients for the upstream market data provider:
//!
//! - [`RestMarketDataClient`]: historical bars over REST
//! - [`LiveFeedClient`]: the single live tick WebSocket
//!
//! Both share the [`Backoff`] retry policy.

mod backoff;
mod events;
mod heartbeat;
pub mod messages;
mod rest;
mod state;
mod stream;

pub use backoff::{Backoff, BackoffConfig};
pub use events::handle_feed_events;
pub use heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatMonitor};
pub use rest::RestMarketDataClient;
pub use state::{ConnectionState, FeedState};
pub use stream::{FeedEvent, LiveFeedClient, LiveFeedConfig, LiveFeedError};
