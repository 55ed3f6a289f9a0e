//! Live Feed Event Pump
//!
//! Drains [`FeedEvent`]s from the live feed client: ticks go to the
//! dispatcher, connection events update [`FeedState`] and metrics.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::state::{ConnectionState, FeedState};
use super::stream::FeedEvent;
use crate::application::services::BroadcastDispatcher;
use crate::infrastructure::metrics;

/// Process feed events until the channel closes.
pub async fn handle_feed_events(
    mut rx: mpsc::Receiver<FeedEvent>,
    dispatcher: Arc<BroadcastDispatcher>,
    feed_state: Arc<FeedState>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            FeedEvent::Tick {
                instrument_id,
                payload,
            } => {
                feed_state.increment_ticks();
                metrics::record_tick_received();
                let report = dispatcher.on_upstream_tick(&instrument_id, payload);
                metrics::record_broadcast(report.delivered, report.failed);
                if report.failed > 0 {
                    metrics::set_client_connections(dispatcher.connection_count());
                }
            }
            FeedEvent::Connected => {
                feed_state.set_state(ConnectionState::Connected);
                metrics::set_feed_connected(true);
                tracing::info!("Live feed connected");
            }
            FeedEvent::Disconnected => {
                feed_state.set_state(ConnectionState::Disconnected);
                metrics::set_feed_connected(false);
                tracing::warn!("Live feed disconnected");
            }
            FeedEvent::Reconnecting { attempt } => {
                feed_state.set_reconnecting(attempt);
                metrics::record_feed_reconnect();
                tracing::info!(attempt, "Live feed reconnecting");
            }
            FeedEvent::Error(msg) => {
                metrics::record_feed_error();
                tracing::error!(error = %msg, "Live feed error");
            }
        }
    }

    tracing::debug!("Feed event channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::MockUpstreamSubscriber;
    use crate::application::services::DispatcherConfig;
    use crate::domain::subscription::SubscriptionRegistry;
    use uuid::Uuid;

    fn dispatcher() -> Arc<BroadcastDispatcher> {
        let mut upstream = MockUpstreamSubscriber::new();
        upstream.expect_subscribe().returning(|_| Ok(()));
        Arc::new(BroadcastDispatcher::new(
            Arc::new(SubscriptionRegistry::new()),
            Arc::new(upstream),
            DispatcherConfig::default(),
        ))
    }

    #[tokio::test]
    async fn ticks_reach_subscribers_and_state_tracks_connection() {
        let dispatcher = dispatcher();
        let state = Arc::new(FeedState::new());
        let instrument = Uuid::new_v4();
        let mut conn = dispatcher.attach();
        let command = format!(r#"{{"instrumentId":"{instrument}","provider":"simulation","subscribe":true}}"#);
        let _ = dispatcher.on_client_message(conn.id, &command);

        let (tx, rx) = mpsc::channel(8);
        let pump = tokio::spawn(handle_feed_events(rx, Arc::clone(&dispatcher), Arc::clone(&state)));

        tx.send(FeedEvent::Connected).await.unwrap();
        tx.send(FeedEvent::Tick {
            instrument_id: instrument,
            payload: Arc::from("{\"tick\":1}"),
        })
        .await
        .unwrap();
        tx.send(FeedEvent::Reconnecting { attempt: 2 }).await.unwrap();
        drop(tx);
        pump.await.unwrap();

        assert_eq!(conn.outbound.recv().await.as_deref(), Some("{\"tick\":1}"));
        assert_eq!(state.ticks_received(), 1);
        assert_eq!(state.state(), ConnectionState::Reconnecting);
        assert_eq!(state.reconnect_attempts(), 2);
    }
}
