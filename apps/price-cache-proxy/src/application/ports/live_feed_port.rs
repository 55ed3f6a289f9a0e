//! Live Feed Port (Driven Port)
//!
//! Subscription requests toward the single upstream live connection.

use serde::{Deserialize, Serialize};

use crate::domain::market::{InstrumentId, Provider};

/// Tick kinds requested when a client does not name any.
pub const DEFAULT_TICK_KINDS: [&str; 3] = ["ask", "bid", "last"];

/// One upstream live subscription request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamSubscription {
    /// Instrument to stream.
    pub instrument_id: InstrumentId,
    /// Data provider name.
    pub provider: Provider,
    /// Tick kinds (`ask`, `bid`, `last`, ...).
    pub kinds: Vec<String>,
}

/// Live feed error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FeedError {
    /// The feed client is no longer accepting commands.
    #[error("live feed command channel closed")]
    ChannelClosed,
}

/// Port for issuing upstream live subscriptions.
///
/// Requests are fire-and-forget; the adapter remembers them and re-issues
/// them after reconnecting.
#[cfg_attr(test, mockall::automock)]
pub trait UpstreamSubscriber: Send + Sync {
    /// Ask upstream to stream `subscription`.
    ///
    /// # Errors
    ///
    /// Returns an error if the feed client can no longer accept requests.
    fn subscribe(&self, subscription: UpstreamSubscription) -> Result<(), FeedError>;
}
