//! WebSocket fan-out of a trip's live topic: every enriched point, alert and
//! incident published for the trip is forwarded as a JSON text frame.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use ride_tracking_engine::collaborators::trip_topic;
use tokio::sync::broadcast;

use crate::server_state::ServerState;

pub async fn live_feed(
    State(state): State<Arc<ServerState>>,
    Path(trip_id): Path<i64>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| subscriber_loop(socket, state, trip_id))
}

async fn subscriber_loop(socket: WebSocket, state: Arc<ServerState>, trip_id: i64) {
    let topic = trip_topic(trip_id);
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.tx.subscribe();
    tracing::debug!("live subscriber attached to {topic}");

    loop {
        tokio::select! {
            message = rx.recv() => match message {
                Ok(message) if message.topic == topic => {
                    if sender.send(Message::Text(message.payload.into())).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {} // another trip's traffic
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("live subscriber for {topic} lagged, skipped {skipped} frames");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                // Nothing meaningful arrives from subscribers; a close or
                // error ends the stream.
                Some(Ok(_)) => {}
                _ => break,
            },
        }
    }

    tracing::debug!("live subscriber detached from {topic}");
}
