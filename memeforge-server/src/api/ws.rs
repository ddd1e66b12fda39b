//! WebSocket event channel
//!
//! `GET /ws` pushes every `MemeEvent` as a JSON text frame. A client can
//! narrow creation events to one creation:
//!
//! ```json
//! {"action": "subscribe", "creation_id": "…"}
//! {"action": "unsubscribe"}
//! ```
//!
//! Events that don't belong to a creation are always forwarded.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;
use memeforge_common::events::MemeEvent;

use crate::AppState;

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Message sent by the browser
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { creation_id: Uuid },
    Unsubscribe,
}

/// Whether an event passes the connection's creation filter
pub fn should_forward(filter: Option<Uuid>, event: &MemeEvent) -> bool {
    match (filter, event.creation_id()) {
        (Some(wanted), Some(id)) => wanted == id,
        _ => true,
    }
}

/// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4();
    tracing::info!(client_id = %client_id, "WebSocket client connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut events = state.event_bus.subscribe();
    let mut filter: Option<Uuid> = None;

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.tick().await; // first tick is immediate

    loop {
        tokio::select! {
            received = events.recv() => {
                match received {
                    Ok(event) => {
                        if !should_forward(filter, &event) {
                            continue;
                        }
                        match serde_json::to_string(&event) {
                            Ok(text) => {
                                if ws_tx.send(Message::Text(text)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::warn!("WS: Failed to serialize event {}: {}", event.event_type(), e);
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(client_id = %client_id, skipped, "WS client lagging, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::Subscribe { creation_id }) => {
                                filter = Some(creation_id);
                                json!({"type": "Subscribed", "creation_id": creation_id})
                            }
                            Ok(ClientMessage::Unsubscribe) => {
                                filter = None;
                                json!({"type": "Unsubscribed"})
                            }
                            Err(e) => json!({"type": "Error", "message": e.to_string()}),
                        };
                        if ws_tx.send(Message::Text(reply.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // pings are answered by axum
                    Some(Err(e)) => {
                        tracing::debug!(client_id = %client_id, error = %e, "WS receive error");
                        break;
                    }
                }
            }

            _ = ping_interval.tick() => {
                if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    tracing::info!(client_id = %client_id, "WebSocket client disconnected");
}
