//! Client live channel.
//!
//! Each upgraded socket is attached to the dispatcher. Text frames from the
//! client are subscription commands; tick payloads flow back unmodified.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};

use super::AppState;
use crate::application::services::{BroadcastDispatcher, ClientConnection};
use crate::infrastructure::metrics;

pub(super) async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let dispatcher = Arc::clone(state.dispatcher());
    ws.on_upgrade(move |socket| serve_client(socket, dispatcher))
}

async fn serve_client(socket: WebSocket, dispatcher: Arc<BroadcastDispatcher>) {
    let ClientConnection {
        id,
        mut outbound,
        closed,
    } = dispatcher.attach();
    metrics::set_client_connections(dispatcher.connection_count());
    tracing::info!(connection = id, "Client connected");

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            () = closed.cancelled() => break,
            payload = outbound.recv() => {
                let Some(payload) = payload else { break };
                if let Err(e) = sink.send(Message::Text(payload.to_string().into())).await {
                    tracing::debug!(connection = id, error = %e, "Client write failed");
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let outcome = dispatcher.on_client_message(id, text.as_str());
                        tracing::debug!(connection = id, ?outcome, "Client command handled");
                        metrics::set_active_instruments(
                            dispatcher.registry().stats().instrument_count,
                        );
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(connection = id, error = %e, "Client read failed");
                        break;
                    }
                }
            }
        }
    }

    dispatcher.remove_connection(id);
    let _ = sink.close().await;
    metrics::set_client_connections(dispatcher.connection_count());
    metrics::set_active_instruments(dispatcher.registry().stats().instrument_count);
    tracing::info!(connection = id, "Client disconnected");
}
