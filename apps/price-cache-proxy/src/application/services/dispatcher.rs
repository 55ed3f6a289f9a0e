//! Broadcast Dispatcher
//!
//! Owns the set of live client connections. Routes raw upstream ticks to
//! the connections subscribed to the tick's instrument and applies client
//! subscribe/unsubscribe commands.
//!
//! # Delivery
//!
//! Each connection has a bounded outbound queue drained by its socket
//! writer. Fan-out uses `try_send`, so a slow or dead client can never
//! stall delivery to the others. Connections whose queue is full or
//! closed are collected during the pass and torn down after it.
//!
//! # Upstream subscriptions
//!
//! Every client subscribe is forwarded upstream. Unsubscribes are local
//! only: the upstream subscription is shared by all local subscribers of
//! the instrument and is released when the live feed reconnects without
//! any local subscriber left.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Deserialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{DEFAULT_TICK_KINDS, UpstreamSubscriber, UpstreamSubscription};
use crate::domain::market::{InstrumentId, Provider};
use crate::domain::subscription::{ConnectionId, SubscriptionChanges, SubscriptionRegistry};

// =============================================================================
// Configuration
// =============================================================================

/// Dispatcher configuration.
#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// Outbound queue capacity per connection.
    pub connection_buffer: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            connection_buffer: 256,
        }
    }
}

// =============================================================================
// Client Commands
// =============================================================================

/// Subscribe/unsubscribe command sent by a client as JSON text.
///
/// ```json
/// {"instrumentId": "…", "provider": "oanda", "subscribe": true, "kinds": ["bid"]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCommand {
    /// Target instrument.
    pub instrument_id: InstrumentId,
    /// Data provider; empty when omitted.
    #[serde(default)]
    pub provider: Provider,
    /// `true` to subscribe, `false` to unsubscribe.
    pub subscribe: bool,
    /// Tick kinds; defaults to ask, bid and last.
    #[serde(default)]
    pub kinds: Option<Vec<String>>,
}

impl ClientCommand {
    /// Requested kinds, falling back to the defaults when absent or empty.
    #[must_use]
    pub fn kinds_or_default(&self) -> Vec<String> {
        match &self.kinds {
            Some(kinds) if !kinds.is_empty() => kinds.clone(),
            _ => DEFAULT_TICK_KINDS.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Why a client message was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Not a valid command document.
    Malformed,
    /// Instrument id was the nil UUID.
    NilInstrument,
    /// The connection is closing or gone.
    UnknownConnection,
}

/// Result of handling one client message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Subscription recorded and forwarded upstream.
    Subscribed(InstrumentId),
    /// Local subscription removed.
    Unsubscribed(InstrumentId),
    /// Message dropped; the connection stays open.
    Ignored(IgnoreReason),
}

// =============================================================================
// Connections
// =============================================================================

/// Lifecycle phase of a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Attached, no subscriptions.
    Open,
    /// Holding at least one subscription.
    Subscribed,
    /// Teardown in progress.
    Closing,
    /// Gone. Terminal.
    Removed,
}

/// Handles returned to the transport when a connection attaches.
#[derive(Debug)]
pub struct ClientConnection {
    /// Connection identifier.
    pub id: ConnectionId,
    /// Outbound tick payloads for this connection.
    pub outbound: mpsc::Receiver<Arc<str>>,
    /// Cancelled when the dispatcher removes the connection.
    pub closed: CancellationToken,
}

#[derive(Debug)]
struct ConnectionHandle {
    sender: mpsc::Sender<Arc<str>>,
    closed: CancellationToken,
    closing: bool,
}

/// Outcome of one tick fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the payload was queued for.
    pub delivered: usize,
    /// Connections that failed and were removed.
    pub failed: usize,
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Live connection registry and tick router.
pub struct BroadcastDispatcher {
    registry: Arc<SubscriptionRegistry>,
    upstream: Arc<dyn UpstreamSubscriber>,
    connections: RwLock<HashMap<ConnectionId, ConnectionHandle>>,
    next_id: AtomicU64,
    config: DispatcherConfig,
}

impl BroadcastDispatcher {
    /// Create a new dispatcher.
    #[must_use]
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        upstream: Arc<dyn UpstreamSubscriber>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            registry,
            upstream,
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            config,
        }
    }

    /// Subscription registry shared with the live feed.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Register a new connection in the `Open` phase.
    pub fn attach(&self) -> ClientConnection {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, outbound) = mpsc::channel(self.config.connection_buffer.max(1));
        let closed = CancellationToken::new();

        self.connections.write().insert(
            id,
            ConnectionHandle {
                sender,
                closed: closed.clone(),
                closing: false,
            },
        );
        tracing::debug!(connection_id = id, "Client connection attached");

        ClientConnection {
            id,
            outbound,
            closed,
        }
    }

    /// Number of attached connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Current lifecycle phase of `connection`.
    #[must_use]
    pub fn phase(&self, connection: ConnectionId) -> ConnectionPhase {
        let connections = self.connections.read();
        match connections.get(&connection) {
            None => ConnectionPhase::Removed,
            Some(handle) if handle.closing => ConnectionPhase::Closing,
            Some(_) if self.registry.connection_instruments(connection).is_empty() => {
                ConnectionPhase::Open
            }
            Some(_) => ConnectionPhase::Subscribed,
        }
    }

    /// Route one upstream tick to every subscriber of `instrument`.
    ///
    /// The payload is forwarded unmodified.
    pub fn on_upstream_tick(&self, instrument: &InstrumentId, payload: Arc<str>) -> BroadcastReport {
        let subscribers = self.registry.subscribers(instrument);
        if subscribers.is_empty() {
            return BroadcastReport::default();
        }

        let mut delivered = 0;
        let mut failed = Vec::new();

        {
            let connections = self.connections.read();
            for id in subscribers {
                let Some(handle) = connections.get(&id) else {
                    failed.push(id);
                    continue;
                };
                if handle.closing {
                    continue;
                }
                match handle.sender.try_send(Arc::clone(&payload)) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!(connection_id = id, "Outbound queue full, dropping client");
                        failed.push(id);
                    }
                    Err(TrySendError::Closed(_)) => {
                        tracing::debug!(connection_id = id, "Outbound queue closed");
                        failed.push(id);
                    }
                }
            }
        }

        for id in &failed {
            self.remove_connection(*id);
        }

        BroadcastReport {
            delivered,
            failed: failed.len(),
        }
    }

    /// Apply one text command from `connection`.
    pub fn on_client_message(&self, connection: ConnectionId, text: &str) -> CommandOutcome {
        let command = match serde_json::from_str::<ClientCommand>(text) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(connection_id = connection, error = %e, "Malformed client command");
                return CommandOutcome::Ignored(IgnoreReason::Malformed);
            }
        };

        if command.instrument_id.is_nil() {
            tracing::warn!(connection_id = connection, "Client command with nil instrument id");
            return CommandOutcome::Ignored(IgnoreReason::NilInstrument);
        }

        let changes = {
            // Registry updates happen under the connections lock so a
            // concurrent removal cannot leave a subscription behind.
            let connections = self.connections.read();
            if !connections
                .get(&connection)
                .is_some_and(|handle| !handle.closing)
            {
                return CommandOutcome::Ignored(IgnoreReason::UnknownConnection);
            }
            if command.subscribe {
                self.registry.subscribe(connection, command.instrument_id)
            } else {
                self.registry.unsubscribe(connection, command.instrument_id)
            }
        };

        if command.subscribe {
            self.forward_subscribe(connection, &command, &changes)
        } else {
            Self::log_unsubscribe(connection, command.instrument_id, &changes)
        }
    }

    fn forward_subscribe(
        &self,
        connection: ConnectionId,
        command: &ClientCommand,
        changes: &SubscriptionChanges,
    ) -> CommandOutcome {
        let subscription = UpstreamSubscription {
            instrument_id: command.instrument_id,
            provider: command.provider.clone(),
            kinds: command.kinds_or_default(),
        };
        if let Err(e) = self.upstream.subscribe(subscription) {
            tracing::warn!(
                instrument_id = %command.instrument_id,
                error = %e,
                "Upstream subscribe failed"
            );
        }

        tracing::info!(
            connection_id = connection,
            instrument_id = %command.instrument_id,
            provider = %command.provider,
            first_subscriber = !changes.activated.is_empty(),
            "Client subscribed"
        );
        CommandOutcome::Subscribed(command.instrument_id)
    }

    fn log_unsubscribe(
        connection: ConnectionId,
        instrument: InstrumentId,
        changes: &SubscriptionChanges,
    ) -> CommandOutcome {
        if changes.deactivated.contains(&instrument) {
            tracing::info!(
                instrument_id = %instrument,
                "No local subscribers left, upstream subscription retained until reconnect"
            );
        }
        tracing::info!(connection_id = connection, instrument_id = %instrument, "Client unsubscribed");
        CommandOutcome::Unsubscribed(instrument)
    }

    /// Tear down `connection`: drop its subscriptions and close its channel.
    ///
    /// Idempotent; returns `false` if the connection was already removed.
    pub fn remove_connection(&self, connection: ConnectionId) -> bool {
        let marked = match self.connections.write().get_mut(&connection) {
            Some(handle) if !handle.closing => {
                handle.closing = true;
                Some(true)
            }
            Some(_) => Some(false),
            None => None,
        };

        match marked {
            Some(true) => {}
            Some(false) => return false,
            None => {
                // Stale registry entry without a live handle.
                self.registry.remove_connection(connection);
                return false;
            }
        }

        let changes = self.registry.remove_connection(connection);
        if let Some(handle) = self.connections.write().remove(&connection) {
            handle.closed.cancel();
        }

        tracing::debug!(
            connection_id = connection,
            released = changes.deactivated.len(),
            "Client connection removed"
        );
        true
    }

    /// Close every connection.
    pub fn close_all(&self) {
        let ids: Vec<ConnectionId> = self.connections.read().keys().copied().collect();
        for id in ids {
            self.remove_connection(id);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{FeedError, MockUpstreamSubscriber};
    use mockall::predicate::function;
    use uuid::Uuid;

    fn instrument(n: u128) -> InstrumentId {
        Uuid::from_u128(n)
    }

    fn subscribe_json(instrument: InstrumentId) -> String {
        format!(r#"{{"instrumentId":"{instrument}","provider":"oanda","subscribe":true}}"#)
    }

    fn unsubscribe_json(instrument: InstrumentId) -> String {
        format!(r#"{{"instrumentId":"{instrument}","provider":"oanda","subscribe":false}}"#)
    }

    fn permissive_upstream() -> Arc<MockUpstreamSubscriber> {
        let mut upstream = MockUpstreamSubscriber::new();
        upstream.expect_subscribe().returning(|_| Ok(()));
        Arc::new(upstream)
    }

    fn dispatcher_with(upstream: Arc<MockUpstreamSubscriber>, buffer: usize) -> BroadcastDispatcher {
        BroadcastDispatcher::new(
            Arc::new(SubscriptionRegistry::new()),
            upstream,
            DispatcherConfig {
                connection_buffer: buffer,
            },
        )
    }

    #[test]
    fn subscribe_forwards_upstream_with_default_kinds() {
        let mut upstream = MockUpstreamSubscriber::new();
        upstream
            .expect_subscribe()
            .with(function(|s: &UpstreamSubscription| {
                s.instrument_id == Uuid::from_u128(1)
                    && s.provider == "oanda"
                    && s.kinds == ["ask", "bid", "last"]
            }))
            .times(2)
            .returning(|_| Ok(()));
        let dispatcher = dispatcher_with(Arc::new(upstream), 8);
        let a = dispatcher.attach();
        let b = dispatcher.attach();

        assert_eq!(
            dispatcher.on_client_message(a.id, &subscribe_json(instrument(1))),
            CommandOutcome::Subscribed(instrument(1))
        );
        dispatcher.on_client_message(b.id, &subscribe_json(instrument(1)));

        assert_eq!(dispatcher.registry().subscribers(&instrument(1)).len(), 2);
    }

    #[test]
    fn explicit_kinds_are_forwarded() {
        let mut upstream = MockUpstreamSubscriber::new();
        upstream
            .expect_subscribe()
            .with(function(|s: &UpstreamSubscription| s.kinds == ["bid"]))
            .times(1)
            .returning(|_| Ok(()));
        let dispatcher = dispatcher_with(Arc::new(upstream), 8);
        let conn = dispatcher.attach();

        let text = format!(
            r#"{{"instrumentId":"{}","provider":"oanda","subscribe":true,"kinds":["bid"]}}"#,
            instrument(3)
        );
        dispatcher.on_client_message(conn.id, &text);
    }

    #[test]
    fn unsubscribe_never_calls_upstream() {
        let mut upstream = MockUpstreamSubscriber::new();
        upstream.expect_subscribe().times(1).returning(|_| Ok(()));
        let dispatcher = dispatcher_with(Arc::new(upstream), 8);
        let conn = dispatcher.attach();

        dispatcher.on_client_message(conn.id, &subscribe_json(instrument(1)));
        let outcome = dispatcher.on_client_message(conn.id, &unsubscribe_json(instrument(1)));

        assert_eq!(outcome, CommandOutcome::Unsubscribed(instrument(1)));
        assert!(dispatcher.registry().active_instruments().is_empty());
        assert_eq!(dispatcher.phase(conn.id), ConnectionPhase::Open);
    }

    #[test]
    fn malformed_and_nil_commands_are_ignored() {
        let mut upstream = MockUpstreamSubscriber::new();
        upstream.expect_subscribe().never();
        let dispatcher = dispatcher_with(Arc::new(upstream), 8);
        let conn = dispatcher.attach();

        assert_eq!(
            dispatcher.on_client_message(conn.id, "not json"),
            CommandOutcome::Ignored(IgnoreReason::Malformed)
        );
        assert_eq!(
            dispatcher.on_client_message(conn.id, &subscribe_json(Uuid::nil())),
            CommandOutcome::Ignored(IgnoreReason::NilInstrument)
        );
        assert_eq!(dispatcher.phase(conn.id), ConnectionPhase::Open);
    }

    #[test]
    fn subscribe_without_provider_forwards_empty_provider() {
        let mut upstream = MockUpstreamSubscriber::new();
        upstream
            .expect_subscribe()
            .with(function(|s: &UpstreamSubscription| s.provider.is_empty()))
            .times(1)
            .returning(|_| Ok(()));
        let dispatcher = dispatcher_with(Arc::new(upstream), 8);
        let conn = dispatcher.attach();

        let outcome = dispatcher.on_client_message(
            conn.id,
            &format!(r#"{{"instrumentId":"{}","subscribe":true}}"#, instrument(1)),
        );

        assert_eq!(outcome, CommandOutcome::Subscribed(instrument(1)));
        assert_eq!(dispatcher.phase(conn.id), ConnectionPhase::Subscribed);
    }

    #[test]
    fn subscribe_racing_removal_leaves_no_subscription() {
        let dispatcher = dispatcher_with(permissive_upstream(), 8);

        for round in 0..200 {
            let conn = dispatcher.attach();
            let text = subscribe_json(instrument(round));

            std::thread::scope(|scope| {
                scope.spawn(|| dispatcher.on_client_message(conn.id, &text));
                scope.spawn(|| dispatcher.remove_connection(conn.id));
            });

            assert_eq!(dispatcher.phase(conn.id), ConnectionPhase::Removed);
            assert!(dispatcher.registry().connection_instruments(conn.id).is_empty());
        }

        assert!(dispatcher.registry().active_instruments().is_empty());
    }

    #[test]
    fn upstream_failure_keeps_local_subscription() {
        let mut upstream = MockUpstreamSubscriber::new();
        upstream
            .expect_subscribe()
            .returning(|_| Err(FeedError::ChannelClosed));
        let dispatcher = dispatcher_with(Arc::new(upstream), 8);
        let conn = dispatcher.attach();

        let outcome = dispatcher.on_client_message(conn.id, &subscribe_json(instrument(1)));

        assert_eq!(outcome, CommandOutcome::Subscribed(instrument(1)));
        assert_eq!(dispatcher.phase(conn.id), ConnectionPhase::Subscribed);
    }

    #[tokio::test]
    async fn tick_reaches_only_subscribers_unmodified() {
        let dispatcher = dispatcher_with(permissive_upstream(), 8);
        let mut a = dispatcher.attach();
        let mut b = dispatcher.attach();
        dispatcher.on_client_message(a.id, &subscribe_json(instrument(1)));
        dispatcher.on_client_message(b.id, &subscribe_json(instrument(2)));

        let payload: Arc<str> = Arc::from(r#"{"instrumentId":"x","bid":1.1}"#);
        let report = dispatcher.on_upstream_tick(&instrument(1), Arc::clone(&payload));

        assert_eq!(report, BroadcastReport { delivered: 1, failed: 0 });
        assert_eq!(a.outbound.recv().await.unwrap(), payload);
        assert!(b.outbound.try_recv().is_err());
    }

    #[test]
    fn tick_without_subscribers_is_noop() {
        let dispatcher = dispatcher_with(permissive_upstream(), 8);
        dispatcher.attach();

        let report = dispatcher.on_upstream_tick(&instrument(5), Arc::from("{}"));

        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn broken_subscriber_is_removed_after_pass() {
        let dispatcher = dispatcher_with(permissive_upstream(), 8);
        let mut c1 = dispatcher.attach();
        let c2 = dispatcher.attach();
        let mut c3 = dispatcher.attach();
        for conn in [c1.id, c2.id, c3.id] {
            dispatcher.on_client_message(conn, &subscribe_json(instrument(1)));
        }
        let c2_id = c2.id;
        let c2_closed = c2.closed.clone();
        drop(c2.outbound);

        let report = dispatcher.on_upstream_tick(&instrument(1), Arc::from("tick"));

        assert_eq!(report, BroadcastReport { delivered: 2, failed: 1 });
        assert_eq!(&*c1.outbound.recv().await.unwrap(), "tick");
        assert_eq!(&*c3.outbound.recv().await.unwrap(), "tick");
        assert!(!dispatcher.registry().subscribers(&instrument(1)).contains(&c2_id));
        assert_eq!(dispatcher.phase(c2_id), ConnectionPhase::Removed);
        assert!(c2_closed.is_cancelled());
    }

    #[test]
    fn full_queue_counts_as_failure() {
        let dispatcher = dispatcher_with(permissive_upstream(), 1);
        let slow = dispatcher.attach();
        dispatcher.on_client_message(slow.id, &subscribe_json(instrument(1)));

        let first = dispatcher.on_upstream_tick(&instrument(1), Arc::from("1"));
        let second = dispatcher.on_upstream_tick(&instrument(1), Arc::from("2"));

        assert_eq!(first.delivered, 1);
        assert_eq!(second.failed, 1);
        assert_eq!(dispatcher.connection_count(), 0);
        assert!(dispatcher.registry().active_instruments().is_empty());
    }

    #[test]
    fn remove_connection_is_idempotent() {
        let dispatcher = dispatcher_with(permissive_upstream(), 8);
        let conn = dispatcher.attach();
        dispatcher.on_client_message(conn.id, &subscribe_json(instrument(1)));

        assert!(dispatcher.remove_connection(conn.id));
        assert!(!dispatcher.remove_connection(conn.id));
        assert!(conn.closed.is_cancelled());
        assert_eq!(
            dispatcher.on_client_message(conn.id, &subscribe_json(instrument(1))),
            CommandOutcome::Ignored(IgnoreReason::UnknownConnection)
        );
        assert!(dispatcher.registry().subscribers(&instrument(1)).is_empty());
    }

    #[test]
    fn close_all_cancels_every_connection() {
        let dispatcher = dispatcher_with(permissive_upstream(), 8);
        let a = dispatcher.attach();
        let b = dispatcher.attach();

        dispatcher.close_all();

        assert!(a.closed.is_cancelled());
        assert!(b.closed.is_cancelled());
        assert_eq!(dispatcher.connection_count(), 0);
    }

    #[test]
    fn kinds_default_when_empty_list() {
        let command: ClientCommand = serde_json::from_str(&format!(
            r#"{{"instrumentId":"{}","provider":"oanda","subscribe":true,"kinds":[]}}"#,
            instrument(1)
        ))
        .unwrap();

        assert_eq!(command.kinds_or_default(), vec!["ask", "bid", "last"]);
    }
}
