//! Subscription Registry
//!
//! Bidirectional many-to-many map between live client connections and the
//! instruments they follow.
//!
//! # Design
//!
//! Both directions live behind a single lock so that a reader never sees a
//! connection listed under an instrument that the connection no longer
//! holds. Empty sets are removed eagerly: an instrument with no
//! subscribers is absent from the map, not present with an empty set.
//!
//! Every mutation reports which instruments gained their first local
//! subscriber or lost their last one, which is what upstream
//! subscription bookkeeping needs.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::domain::market::InstrumentId;

// =============================================================================
// Types
// =============================================================================

/// Process-unique identifier of a live client connection.
pub type ConnectionId = u64;

/// Instruments whose local subscriber set changed between empty and
/// non-empty as a result of one registry mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    /// Instruments that gained their first subscriber.
    pub activated: HashSet<InstrumentId>,
    /// Instruments that lost their last subscriber.
    pub deactivated: HashSet<InstrumentId>,
}

impl SubscriptionChanges {
    /// Check if there are any changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.activated.is_empty() && self.deactivated.is_empty()
    }

    /// Create changes with only activations.
    #[must_use]
    pub fn activated_only(instruments: impl IntoIterator<Item = InstrumentId>) -> Self {
        Self {
            activated: instruments.into_iter().collect(),
            deactivated: HashSet::new(),
        }
    }

    /// Create changes with only deactivations.
    #[must_use]
    pub fn deactivated_only(instruments: impl IntoIterator<Item = InstrumentId>) -> Self {
        Self {
            activated: HashSet::new(),
            deactivated: instruments.into_iter().collect(),
        }
    }
}

// =============================================================================
// Registry State
// =============================================================================

#[derive(Debug, Default)]
struct RegistryState {
    connection_instruments: HashMap<ConnectionId, HashSet<InstrumentId>>,
    instrument_connections: HashMap<InstrumentId, HashSet<ConnectionId>>,
}

impl RegistryState {
    /// Returns `Some(first_subscriber)` when the pair was added.
    fn add(&mut self, connection: ConnectionId, instrument: InstrumentId) -> Option<bool> {
        if !self
            .connection_instruments
            .entry(connection)
            .or_default()
            .insert(instrument)
        {
            return None;
        }

        let subscribers = self.instrument_connections.entry(instrument).or_default();
        subscribers.insert(connection);
        Some(subscribers.len() == 1)
    }

    /// Drop `connection` from the reverse entry of `instrument`.
    ///
    /// Returns true when the instrument has no subscribers left.
    fn detach(&mut self, connection: ConnectionId, instrument: InstrumentId) -> bool {
        let Some(subscribers) = self.instrument_connections.get_mut(&instrument) else {
            return false;
        };

        subscribers.remove(&connection);
        if subscribers.is_empty() {
            self.instrument_connections.remove(&instrument);
            true
        } else {
            false
        }
    }

    /// Returns `Some(last_subscriber)` when the pair was removed.
    fn remove(&mut self, connection: ConnectionId, instrument: InstrumentId) -> Option<bool> {
        let instruments = self.connection_instruments.get_mut(&connection)?;
        if !instruments.remove(&instrument) {
            return None;
        }
        if instruments.is_empty() {
            self.connection_instruments.remove(&connection);
        }

        Some(self.detach(connection, instrument))
    }

    fn remove_connection(&mut self, connection: ConnectionId) -> Vec<InstrumentId> {
        let Some(instruments) = self.connection_instruments.remove(&connection) else {
            return vec![];
        };

        instruments
            .into_iter()
            .filter(|instrument| self.detach(connection, *instrument))
            .collect()
    }
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Thread-safe connection ↔ instrument registry.
///
/// # Example
///
/// ```rust
/// use price_cache_proxy::domain::subscription::SubscriptionRegistry;
/// use uuid::Uuid;
///
/// let registry = SubscriptionRegistry::new();
/// let eurusd = Uuid::new_v4();
///
/// let changes = registry.subscribe(1, eurusd);
/// assert!(changes.activated.contains(&eurusd));
///
/// // A second subscriber does not re-activate the instrument.
/// assert!(registry.subscribe(2, eurusd).is_empty());
///
/// registry.remove_connection(1);
/// assert_eq!(registry.subscribers(&eurusd).len(), 1);
///
/// let changes = registry.unsubscribe(2, eurusd);
/// assert!(changes.deactivated.contains(&eurusd));
/// assert!(registry.subscribers(&eurusd).is_empty());
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    state: RwLock<RegistryState>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `connection` follows `instrument`. Repeating a
    /// subscription is a no-op.
    pub fn subscribe(
        &self,
        connection: ConnectionId,
        instrument: InstrumentId,
    ) -> SubscriptionChanges {
        match self.state.write().add(connection, instrument) {
            Some(true) => SubscriptionChanges::activated_only([instrument]),
            _ => SubscriptionChanges::default(),
        }
    }

    /// Remove one subscription. Unknown pairs are ignored.
    pub fn unsubscribe(
        &self,
        connection: ConnectionId,
        instrument: InstrumentId,
    ) -> SubscriptionChanges {
        match self.state.write().remove(connection, instrument) {
            Some(true) => SubscriptionChanges::deactivated_only([instrument]),
            _ => SubscriptionChanges::default(),
        }
    }

    /// Remove every subscription held by `connection`.
    pub fn remove_connection(&self, connection: ConnectionId) -> SubscriptionChanges {
        let deactivated = self.state.write().remove_connection(connection);
        SubscriptionChanges::deactivated_only(deactivated)
    }

    /// Connections currently following `instrument` (empty if none).
    #[must_use]
    pub fn subscribers(&self, instrument: &InstrumentId) -> HashSet<ConnectionId> {
        self.state
            .read()
            .instrument_connections
            .get(instrument)
            .cloned()
            .unwrap_or_default()
    }

    /// Instruments with at least one local subscriber.
    #[must_use]
    pub fn active_instruments(&self) -> HashSet<InstrumentId> {
        self.state
            .read()
            .instrument_connections
            .keys()
            .copied()
            .collect()
    }

    /// Instruments followed by `connection` (empty if none).
    #[must_use]
    pub fn connection_instruments(&self, connection: ConnectionId) -> HashSet<InstrumentId> {
        self.state
            .read()
            .connection_instruments
            .get(&connection)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether `connection` follows `instrument`.
    #[must_use]
    pub fn is_subscribed(&self, connection: ConnectionId, instrument: &InstrumentId) -> bool {
        self.state
            .read()
            .connection_instruments
            .get(&connection)
            .is_some_and(|set| set.contains(instrument))
    }

    /// Current counts.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let state = self.state.read();
        RegistryStats {
            instrument_count: state.instrument_connections.len(),
            connection_count: state.connection_instruments.len(),
            subscription_count: state.connection_instruments.values().map(HashSet::len).sum(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Instruments with at least one subscriber.
    pub instrument_count: usize,
    /// Connections holding at least one subscription.
    pub connection_count: usize,
    /// Total `(connection, instrument)` pairs.
    pub subscription_count: usize,
}

// =============================================================================
// Tests
// =============================================================================
